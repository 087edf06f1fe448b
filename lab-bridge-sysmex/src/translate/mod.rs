//! ASTM ↔ HL7 translation for the three IHE LAB transactions.
//!
//! Outbound HL7 is assembled as raw ER7 strings so the exact number of
//! separators per segment is under our control; inbound HL7 goes through
//! the segment-level parser in `lab-bridge-hl7`.

use crate::protocol::record::{Record, RecordKind};

pub mod order;
pub mod query;
pub mod results;

/// Positive ASTM termination returned to the analyzer.
pub const ASTM_ACCEPT: &str = "L|1|Y";
/// Negative ASTM termination returned to the analyzer.
pub const ASTM_REJECT: &str = "L|1|N";

/// HL7 accept / application-error acknowledgment codes.
pub const ACK_ACCEPT: &str = "AA";
pub const ACK_ERROR: &str = "AE";

/// Analysis parameter list requested in every downloaded order: the XP
/// minimal CBC panel, repetition-separated.
pub const REQUESTED_PARAMS: &str = "^^^^WBC\\^^^^RBC\\^^^^HGB\\^^^^HCT\\^^^^PLT";

/// Width of the instrument specimen-ID field in O records.
pub const SPECIMEN_ID_WIDTH: usize = 15;

/// Sample ID the XP uses for its background (blank) check runs.
const BACKGROUND_CHECK_ID: &str = "BACKGROUNDCHECK";

/// Extract the specimen ID from the first O record of a message.
///
/// The XP places it in O.field[3] as `^^<id>^A`; the first `^` component
/// after the `^^` prefix is the ID. Some firmwares put a bare ID in
/// O.field[2] instead, which serves as the fallback. The result is trimmed.
pub fn extract_specimen_id(records: &[Record]) -> Option<String> {
    let order = records.iter().find(|r| r.kind == RecordKind::Order)?;

    let instrument_field = order.field_or_empty(3);
    if let Some(rest) = instrument_field.strip_prefix("^^") {
        let id = rest.split('^').next().unwrap_or("").trim();
        if !id.is_empty() {
            return Some(id.to_string());
        }
    }

    let fallback = order.field_or_empty(2).trim();
    if fallback.is_empty() {
        None
    } else {
        Some(fallback.to_string())
    }
}

/// True when the specimen ID marks a background check run. Background
/// checks are archived but never forwarded to the LIS.
pub fn is_background_check(specimen_id: &str) -> bool {
    specimen_id.trim().eq_ignore_ascii_case(BACKGROUND_CHECK_ID)
}

/// Right-align a specimen ID in the 15-character instrument field.
pub fn pad_specimen_id(specimen_id: &str) -> String {
    format!("{:>width$}", specimen_id, width = SPECIMEN_ID_WIDTH)
}

/// Build the four-record H/P/O/L order block the XP accepts for a single
/// specimen. Byte layout follows the XP host-to-analyzer profile; the
/// pipe counts in the O record are load-bearing.
pub fn order_block(specimen_id: &str) -> Vec<String> {
    let padded = pad_specimen_id(specimen_id);
    vec![
        "H|\\^&|||||||||||E1394-97".to_string(),
        "P|1".to_string(),
        format!("O|1||^^{padded}^A|{REQUESTED_PARAMS}|||||||N||||||||||||||F"),
        "L|1|N".to_string(),
    ]
}

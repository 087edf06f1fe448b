//! Builders for the handful of ER7 lines the bridge synthesizes itself.
//!
//! HL7 messages leaving the bridge are assembled as raw strings so that the
//! exact number of separators is under our control; downstream parsers map
//! fields positionally and pay no attention to trailing prettiness.

use chrono::Utc;

/// HL7 v2.5.1 version literal used in every MSH-12 we emit.
pub const HL7_VERSION: &str = "2.5.1";
/// Processing ID used in MSH-11.
pub const PROCESSING_ID: &str = "P";

/// Current timestamp in the `YYYYMMDDhhmmss` form used by MSH-7 and OBX-14.
pub fn timestamp_now() -> String {
    Utc::now().format("%Y%m%d%H%M%S").to_string()
}

/// Fresh message control ID: `MSG` followed by the epoch millisecond clock.
pub fn control_id_now() -> String {
    format!("MSG{}", Utc::now().timestamp_millis())
}

/// Identity of one side of an HL7 exchange (application + facility).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint<'a> {
    pub application: &'a str,
    pub facility: &'a str,
}

impl<'a> Endpoint<'a> {
    pub const fn new(application: &'a str, facility: &'a str) -> Self {
        Self {
            application,
            facility,
        }
    }
}

/// The analyzer side of every exchange this bridge originates.
pub const ANALYZER: Endpoint<'static> = Endpoint::new("Sysmex", "Analyzer");
/// The LIS side of every exchange this bridge originates.
pub const LIS: Endpoint<'static> = Endpoint::new("LabBook", "LIS");

/// Build an MSH segment line (no trailing CR).
///
/// Layout: `MSH|^~\&|app|fac|app|fac|ts||type|control|P|2.5.1`.
pub fn msh(from: Endpoint<'_>, to: Endpoint<'_>, message_type: &str, control_id: &str) -> String {
    format!(
        "MSH|^~\\&|{}|{}|{}|{}|{}||{}|{}|{}|{}",
        from.application,
        from.facility,
        to.application,
        to.facility,
        timestamp_now(),
        message_type,
        control_id,
        PROCESSING_ID,
        HL7_VERSION,
    )
}

/// Build an MSA segment line (no trailing CR).
pub fn msa(ack_code: &str, control_id: &str) -> String {
    format!("MSA|{ack_code}|{control_id}")
}

/// Join segment lines into a wire-ready ER7 payload (CR-terminated).
pub fn join_segments<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for seg in segments {
        out.push_str(seg.as_ref());
        out.push('\r');
    }
    out
}

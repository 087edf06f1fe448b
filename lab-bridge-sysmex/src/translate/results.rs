//! LAB-29: analyzer results to HL7 and the acknowledgment back.

use crate::{
    mapping::{is_no_value, MappingTable},
    protocol::record::{Record, RecordKind},
    translate::{ASTM_ACCEPT, ASTM_REJECT},
};
use lab_bridge_hl7::builder::{self, ANALYZER, LIS};
use lab_bridge_hl7::{looks_like_er7, Message};
use tracing::warn;

/// Synthesize an OUL^R22 from a parsed ASTM result message.
///
/// Record handling:
/// - `P` → PID with PID-3 from P.field[2]
/// - `O` → SPM / ORC / OBR carrying the specimen ID and requested panel
/// - `R` → one OBX per result, mapped through the LIVD table
/// - `C` → NTE with the remaining fields joined by spaces
///
/// Other record types are skipped. Every segment is emitted with its exact
/// separator count; downstream parsers map OBX fields positionally.
pub fn astm_to_oul_r22(records: &[Record], mapping: &MappingTable) -> String {
    let mut segments: Vec<String> = Vec::new();
    segments.push(builder::msh(
        ANALYZER,
        LIS,
        "OUL^R22",
        &builder::control_id_now(),
    ));

    let mut obx_index = 0usize;

    for record in records {
        match record.kind {
            RecordKind::Patient => {
                let patient_id = record.field_or_empty(2);
                segments.push(format!("PID|||{patient_id}||"));
            }
            RecordKind::Order => {
                let specimen_id = super::extract_specimen_id(std::slice::from_ref(record))
                    .unwrap_or_default();
                segments.push(format!("SPM|1|{specimen_id}"));
                segments.push(format!("ORC|RE|{specimen_id}"));
                let requested = record.field_or_empty(4);
                segments.push(format!("OBR|1|{specimen_id}||{requested}"));
            }
            RecordKind::Result => {
                obx_index += 1;
                segments.push(result_to_obx(record, obx_index, mapping));
            }
            RecordKind::Comment => {
                let note = record.tail_fields().join(" ");
                segments.push(format!("NTE|1|L|{note}"));
            }
            _ => {}
        }
    }

    builder::join_segments(segments)
}

/// Map one R record into an OBX segment.
///
/// Field layout (HL7 numbering, 16 fields emitted):
/// OBX-1 running index, OBX-2 `NM`, OBX-3 mapped or raw analyte code,
/// OBX-4 R.field[1], OBX-5 processed value, OBX-6 unit, OBX-8 abnormal
/// flag, OBX-11 `F`, OBX-14 completion timestamp, OBX-16 operator.
fn result_to_obx(record: &Record, index: usize, mapping: &MappingTable) -> String {
    let analyte = record.field_or_empty(2).trim();
    let raw_value = record.field_or_empty(3);
    let raw_unit = record.field_or_empty(4);
    let flag = record.field_or_empty(6);
    let operator = record.field_or_empty(10);
    let timestamp = record.field_or_empty(12);

    let row = mapping.lookup(analyte);

    let code = match row {
        Some(r) if !r.lis_result_code.is_empty() => r.lis_result_code.as_str(),
        _ => analyte,
    };
    let unit = match row {
        Some(r) if !r.lis_unit.is_empty() => r.lis_unit.as_str(),
        _ => raw_unit,
    };

    let value = process_value(raw_value, unit, row);

    format!(
        "OBX|{index}|NM|{code}|{seq}|{value}|{unit}||{flag}|||F|||{timestamp}||{operator}",
        seq = record.field_or_empty(1),
    )
}

/// Normalize a raw result value: no-value tokens become empty, a trailing
/// unit echo is stripped, and the mapping conversion (if any) is applied.
fn process_value(raw: &str, unit: &str, row: Option<&crate::mapping::MappingRow>) -> String {
    if is_no_value(raw) {
        return String::new();
    }
    let mut value = raw.trim();
    if !unit.is_empty() {
        if let Some(stripped) = value.strip_suffix(unit) {
            value = stripped.trim();
        }
    }
    match row {
        Some(r) => r.convert_value(value),
        None => value.to_string(),
    }
}

/// Map the LIS's HL7 ACK back to the minimal ASTM termination record:
/// `L|1|Y` when MSA-1 is `AA`, `L|1|N` for everything else (including
/// replies that are not HL7 at all).
pub fn ack_to_astm(hl7_ack: &str) -> String {
    if !looks_like_er7(hl7_ack) {
        warn!("upstream reply is not HL7, returning negative ASTM termination");
        return ASTM_REJECT.to_string();
    }
    match Message::parse(hl7_ack) {
        Ok(msg) if msg.ack_code() == Some("AA") => ASTM_ACCEPT.to_string(),
        Ok(_) => ASTM_REJECT.to_string(),
        Err(e) => {
            warn!(error = %e, "failed to parse upstream ACK");
            ASTM_REJECT.to_string()
        }
    }
}

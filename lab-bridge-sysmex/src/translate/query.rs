//! LAB-27: analyzer worklist query and the LIS's response.

use crate::{
    error::{BridgeError, BridgeResult},
    protocol::record::{Record, RecordKind},
    translate::order_block,
};
use lab_bridge_hl7::builder::{self, ANALYZER, LIS};
use tracing::warn;

/// Convert an ASTM query (first Q record) into a QBP^Q11.
///
/// QPD-1 carries the IHE query name `LAB-27^IHE`, QPD-2 a fixed query tag,
/// QPD-3 the specimen/query ID from Q.field[2]; RCP-1 requests an
/// immediate response.
pub fn astm_query_to_qbp_q11(records: &[Record]) -> BridgeResult<String> {
    let query = records
        .iter()
        .find(|r| r.kind == RecordKind::Query)
        .ok_or_else(|| BridgeError::Conversion("no Q record in ASTM query message".to_string()))?;

    let query_id = query.field_or_empty(2).trim();

    let segments = [
        builder::msh(ANALYZER, LIS, "QBP^Q11", &builder::control_id_now()),
        format!("QPD|LAB-27^IHE|SYSMEX|{query_id}"),
        "RCP|I".to_string(),
    ];
    Ok(builder::join_segments(segments))
}

/// Convert the LIS's RSP^K11 back into the ASTM order block the analyzer
/// expects: H/P/O/L with the specimen ID from the first SPM segment.
///
/// Segments are scanned manually; an RSP without an SPM yields an order
/// block with an empty (all-spaces) specimen ID, which the instrument
/// treats as "no order".
pub fn rsp_k11_to_astm(hl7: &str) -> Vec<String> {
    let mut specimen_id = "";
    for segment in hl7.split('\r') {
        if let Some(rest) = segment.strip_prefix("SPM|") {
            let fields: Vec<&str> = rest.split('|').collect();
            if fields.len() > 1 {
                specimen_id = fields[1].trim();
            }
            break;
        }
    }
    if specimen_id.is_empty() {
        warn!("RSP^K11 carries no SPM specimen id, emitting empty order block");
    }
    order_block(specimen_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::record::parse_message;
    use lab_bridge_hl7::Message;

    #[test]
    fn qbp_carries_query_name_tag_and_specimen() {
        let records = parse_message("H|\\^&\rQ|1|20359|ALL\rL|1|N");
        let qbp = astm_query_to_qbp_q11(&records).unwrap();
        let msg = Message::parse(&qbp).unwrap();
        assert_eq!(msg.message_type(), Some("QBP^Q11"));
        let qpd = msg.segment("QPD").unwrap();
        assert_eq!(qpd.field(1), Some("LAB-27^IHE"));
        assert_eq!(qpd.field(2), Some("SYSMEX"));
        assert_eq!(qpd.field(3), Some("20359"));
        let rcp = msg.segment("RCP").unwrap();
        assert_eq!(rcp.field(1), Some("I"));
    }

    #[test]
    fn qbp_tolerates_prefixed_query_record() {
        let records = parse_message("2Q|1|20360");
        let qbp = astm_query_to_qbp_q11(&records).unwrap();
        assert!(qbp.contains("QPD|LAB-27^IHE|SYSMEX|20360"));
    }

    #[test]
    fn missing_query_record_is_an_error() {
        let records = parse_message("H|\\^&\rL|1|N");
        assert!(astm_query_to_qbp_q11(&records).is_err());
    }

    #[test]
    fn rsp_specimen_id_feeds_the_order_block() {
        let rsp = "MSH|^~\\&|LabBook|LIS|Sysmex|Analyzer|20250101||RSP^K11|M9|P|2.5.1\r\
QAK|SYSMEX|OK\rSPM|1|20359||BLD\r";
        let block = rsp_k11_to_astm(rsp);
        assert_eq!(block.len(), 4);
        assert_eq!(
            block[2],
            "O|1||^^          20359^A|^^^^WBC\\^^^^RBC\\^^^^HGB\\^^^^HCT\\^^^^PLT|||||||N||||||||||||||F"
        );
        assert_eq!(block[3], "L|1|N");
    }

    #[test]
    fn rsp_without_spm_yields_blank_specimen() {
        let rsp = "MSH|^~\\&|LabBook|LIS|Sysmex|Analyzer|20250101||RSP^K11|M9|P|2.5.1\rQAK|SYSMEX|NF\r";
        let block = rsp_k11_to_astm(rsp);
        assert!(block[2].starts_with("O|1||^^               ^A|"));
    }
}

//! LAB-28: order download from the LIS and the ACK^R22 back.

use crate::{
    error::{BridgeError, BridgeResult},
    translate::order_block,
};
use lab_bridge_hl7::builder::{self, Endpoint, ANALYZER};
use lab_bridge_hl7::{component, subcomponent, Message};

/// Convert an OML^O33 into the four-record ASTM order block.
///
/// The specimen ID is the placer-assigned entity identifier of the first
/// SPM segment (SPM-2, first component, first subcomponent). A message
/// without any SPM cannot be ordered on the instrument and is rejected.
pub fn oml_o33_to_astm(oml: &str) -> BridgeResult<Vec<String>> {
    let message = Message::parse(oml)
        .map_err(|e| BridgeError::Conversion(format!("invalid OML^O33: {e}")))?;

    let spm = message
        .segment("SPM")
        .ok_or_else(|| BridgeError::Conversion("OML^O33 has no SPM segment".to_string()))?;

    let specimen_field = spm.field(2).unwrap_or("");
    let placer = component(specimen_field, 0)
        .and_then(|c| subcomponent(c, 0))
        .unwrap_or("")
        .trim();

    Ok(order_block(placer))
}

/// Generate the ACK^R22 returned to the LIS after an order download.
///
/// Sending and receiving applications swap relative to the original OML,
/// and both MSH-10 and MSA-2 reuse the original message control ID so the
/// LIS can correlate the acknowledgment.
pub fn ack_r22(original_oml: &str, ack_code: &str) -> BridgeResult<String> {
    let original = Message::parse(original_oml)
        .map_err(|e| BridgeError::Conversion(format!("invalid OML^O33: {e}")))?;

    let control_id = original.control_id().unwrap_or("").to_string();
    let msh = original.msh();
    let lis = Endpoint::new(
        msh.hl7_field(3).unwrap_or(""),
        msh.hl7_field(4).unwrap_or(""),
    );

    let segments = [
        builder::msh(ANALYZER, lis, "ACK^R22", &control_id),
        builder::msa(ack_code, &control_id),
    ];
    Ok(builder::join_segments(segments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::{ACK_ACCEPT, ACK_ERROR};

    const OML: &str = "MSH|^~\\&|LabBook|LIS|Sysmex|Analyzer|20250101120000||OML^O33|ORD77|P|2.5.1\r\
PID|||PAT1\r\
SPM|1|20359&LabBook^||BLD\r\
ORC|NW|20359\r\
OBR|1|20359||^^^^WBC\r";

    #[test]
    fn order_block_uses_placer_entity_id() {
        let block = oml_o33_to_astm(OML).unwrap();
        assert_eq!(block.len(), 4);
        assert_eq!(block[0], "H|\\^&|||||||||||E1394-97");
        assert_eq!(block[1], "P|1");
        assert!(block[2].contains("^^          20359^A"));
        assert_eq!(block[3], "L|1|N");
    }

    #[test]
    fn plain_specimen_id_works_too() {
        let oml = OML.replace("20359&LabBook^", "20359");
        let block = oml_o33_to_astm(&oml).unwrap();
        assert!(block[2].contains("^^          20359^A"));
    }

    #[test]
    fn missing_spm_is_rejected() {
        let oml = "MSH|^~\\&|LabBook|LIS|Sysmex|Analyzer|20250101||OML^O33|ORD1|P|2.5.1\rPID|||P\r";
        assert!(matches!(
            oml_o33_to_astm(oml),
            Err(BridgeError::Conversion(_))
        ));
    }

    #[test]
    fn ack_swaps_endpoints_and_reuses_control_id() {
        let ack = ack_r22(OML, ACK_ACCEPT).unwrap();
        let msg = Message::parse(&ack).unwrap();
        let msh = msg.msh();
        assert_eq!(msh.hl7_field(3), Some("Sysmex"));
        assert_eq!(msh.hl7_field(4), Some("Analyzer"));
        assert_eq!(msh.hl7_field(5), Some("LabBook"));
        assert_eq!(msh.hl7_field(6), Some("LIS"));
        assert_eq!(msg.message_type(), Some("ACK^R22"));
        assert_eq!(msg.control_id(), Some("ORD77"));
        let msa = msg.segment("MSA").unwrap();
        assert_eq!(msa.field(1), Some("AA"));
        assert_eq!(msa.field(2), Some("ORD77"));
    }

    #[test]
    fn ack_error_code_is_carried() {
        let ack = ack_r22(OML, ACK_ERROR).unwrap();
        assert!(ack.contains("MSA|AE|ORD77"));
    }
}

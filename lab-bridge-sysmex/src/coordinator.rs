//! End-to-end orchestration of the three LAB transactions.
//!
//! The coordinator owns the conversion pipeline and the collaborator
//! handles; the link itself belongs to the connection loop, which hands
//! inbound messages here and services outbound requests submitted through
//! the mpsc channel. Conversion and upstream failures never escape as
//! errors; every path collapses into a protocol-appropriate reply.

use crate::{
    dispatch::{classify, Route},
    error::{BridgeError, BridgeResult},
    mapping::MappingTable,
    protocol::{record::parse_message, ProtocolError},
    translate::{
        self,
        order::{ack_r22, oml_o33_to_astm},
        query::{astm_query_to_qbp_q11, rsp_k11_to_astm},
        results::{ack_to_astm, astm_to_oul_r22},
        ACK_ACCEPT, ACK_ERROR, ASTM_ACCEPT, ASTM_REJECT,
    },
    types::AnalyzerConfig,
    upstream::{MessageArchiver, UpstreamClient},
};
use lab_bridge_hl7::looks_like_er7;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

/// An ASTM message queued for transmission to the analyzer, with a oneshot
/// for the link-layer outcome.
#[derive(Debug)]
pub struct OutboundRequest {
    pub records: Vec<String>,
    pub reply: oneshot::Sender<Result<(), ProtocolError>>,
}

/// Shared link health flag, set by the connection loop while a transport
/// is established. Lets `lab28` fail fast instead of queueing orders for a
/// link that is not there.
#[derive(Debug, Default)]
pub struct LinkHealth {
    healthy: AtomicBool,
}

impl LinkHealth {
    pub fn set(&self, up: bool) {
        self.healthy.store(up, Ordering::Release);
    }

    pub fn is_up(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }
}

pub struct TransactionCoordinator {
    config: Arc<AnalyzerConfig>,
    mapping: Arc<MappingTable>,
    upstream: Arc<dyn UpstreamClient>,
    archiver: Arc<dyn MessageArchiver>,
    outbound_tx: mpsc::Sender<OutboundRequest>,
    link_health: Arc<LinkHealth>,
}

impl TransactionCoordinator {
    pub fn new(
        config: Arc<AnalyzerConfig>,
        mapping: Arc<MappingTable>,
        upstream: Arc<dyn UpstreamClient>,
        archiver: Arc<dyn MessageArchiver>,
        outbound_tx: mpsc::Sender<OutboundRequest>,
        link_health: Arc<LinkHealth>,
    ) -> Self {
        Self {
            config,
            mapping,
            upstream,
            archiver,
            outbound_tx,
            link_health,
        }
    }

    async fn archive(&self, payload: &str, label: &str, direction: &str) {
        if self.config.archiving_enabled() {
            self.archiver
                .archive(&self.config.id_analyzer, payload, label, direction)
                .await;
        }
    }

    /// Route a received ASTM message to its transaction. Returns the reply
    /// to transmit back to the analyzer, if any.
    pub async fn handle_incoming(&self, message: &str) -> Option<String> {
        match classify(message) {
            Route::Lab27 => self.lab27(message).await,
            Route::Lab29 => Some(self.lab29(message).await),
            Route::Ignore => {
                warn!("ASTM message without H or Q record, ignoring");
                None
            }
        }
    }

    /// LAB-27: worklist query. ASTM `Q` → QBP^Q11 → LIS → RSP^K11 →
    /// ASTM order block. Any failure yields no reply at all.
    pub async fn lab27(&self, message: &str) -> Option<String> {
        info!(analyzer = %self.config.id_analyzer, "LAB-27 query received");
        self.archive(message, "LAB-27", "Analyzer").await;

        let records = parse_message(message);
        let qbp = match astm_query_to_qbp_q11(&records) {
            Ok(qbp) => qbp,
            Err(e) => {
                error!(error = %e, "LAB-27: cannot convert ASTM query to QBP^Q11");
                return None;
            }
        };

        let rsp = match self
            .upstream
            .send(&self.config.url_upstream_lab27, &qbp)
            .await
        {
            Ok(rsp) => rsp,
            Err(e) => {
                error!(error = %e, "LAB-27: upstream query failed");
                return None;
            }
        };
        if !looks_like_er7(&rsp) {
            error!("LAB-27: upstream reply is not HL7");
            return None;
        }

        let block = rsp_k11_to_astm(&rsp);
        Some(block.join("\r"))
    }

    /// LAB-29: result upload. ASTM results → OUL^R22 → LIS → HL7 ACK →
    /// `L|1|Y` / `L|1|N`. Background-check runs are archived and
    /// acknowledged positively without touching the LIS.
    pub async fn lab29(&self, message: &str) -> String {
        info!(analyzer = %self.config.id_analyzer, "LAB-29 results received");
        self.archive(message, "LAB-29", "Analyzer").await;

        let records = parse_message(message);

        if let Some(specimen_id) = translate::extract_specimen_id(&records) {
            if translate::is_background_check(&specimen_id) {
                info!(
                    specimen_id,
                    "LAB-29: background check detected, skipping upstream"
                );
                return ASTM_ACCEPT.to_string();
            }
        }

        let oul = astm_to_oul_r22(&records, &self.mapping);
        if oul.is_empty() {
            error!("LAB-29: conversion produced an empty OUL^R22");
            return ASTM_REJECT.to_string();
        }

        let reply = match self
            .upstream
            .send(&self.config.url_upstream_lab29, &oul)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %e, "LAB-29: upstream send failed");
                return ASTM_REJECT.to_string();
            }
        };

        ack_to_astm(&reply)
    }

    /// LAB-28: order download. OML^O33 → ASTM order block → analyzer →
    /// ACK^R22 with `AA` when the link accepted every frame, `AE`
    /// otherwise.
    pub async fn lab28(&self, oml: &str) -> String {
        info!(analyzer = %self.config.id_analyzer, "LAB-28 order received");
        self.archive(oml, "LAB-28", "LIS").await;

        let block = match oml_o33_to_astm(oml) {
            Ok(block) => block,
            Err(e) => {
                error!(error = %e, "LAB-28: cannot convert OML^O33 to ASTM");
                return self.lab28_ack(oml, ACK_ERROR);
            }
        };

        let ack_code = match self.send_to_analyzer(block).await {
            Ok(()) => ACK_ACCEPT,
            Err(e) => {
                error!(error = %e, "LAB-28: order download to analyzer failed");
                ACK_ERROR
            }
        };
        self.lab28_ack(oml, ack_code)
    }

    fn lab28_ack(&self, oml: &str, code: &str) -> String {
        match ack_r22(oml, code) {
            Ok(ack) => ack,
            Err(e) => {
                error!(error = %e, "LAB-28: cannot generate ACK^R22");
                format!("ERROR: failed to generate ACK^R22: {e}")
            }
        }
    }

    /// Queue an ASTM message for the connection loop and wait for the
    /// link-layer outcome.
    async fn send_to_analyzer(&self, records: Vec<String>) -> BridgeResult<()> {
        if !self.link_health.is_up() {
            return Err(BridgeError::NotConnected);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = OutboundRequest {
            records,
            reply: reply_tx,
        };
        self.outbound_tx
            .send(request)
            .await
            .map_err(|_| BridgeError::NotConnected)?;
        match reply_rx.await {
            Ok(result) => result.map_err(BridgeError::from),
            Err(_) => Err(BridgeError::Session(
                "connection closed while sending order".to_string(),
            )),
        }
    }
}

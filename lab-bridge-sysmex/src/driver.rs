//! Driver facade: one instance per analyzer, owning configuration,
//! collaborators and the supervisor lifecycle.

use crate::{
    coordinator::{LinkHealth, OutboundRequest, TransactionCoordinator},
    error::{BridgeError, BridgeResult},
    mapping::MappingTable,
    supervisor::LinkSupervisor,
    types::{AnalyzerConfig, LinkConnectionState, LinkMode},
    upstream::{MessageArchiver, UpstreamClient},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::{
    net::TcpListener,
    sync::{mpsc, watch, Mutex},
};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Capacity of the outbound order queue. Orders are rare and the link is
/// half-duplex; anything beyond a couple of pending sends means trouble.
const OUTBOUND_QUEUE: usize = 8;

/// Sysmex XP analyzer driver.
///
/// Exposes the operation set of the original plugin contract: `listen`,
/// `stop_listening`, `is_listening`, `info`, and the three LAB
/// transactions. `lab27`/`lab29` are normally invoked by the connection
/// loop when the analyzer transmits; `lab28` is invoked by the LIS-facing
/// caller and is routed through the active link.
pub struct SysmexDriver {
    config: Arc<AnalyzerConfig>,
    coordinator: Arc<TransactionCoordinator>,
    listening: Arc<AtomicBool>,
    health: Arc<LinkHealth>,
    cancel: CancellationToken,
    started: AtomicBool,
    state_tx: watch::Sender<LinkConnectionState>,
    state_rx: watch::Receiver<LinkConnectionState>,
    /// Consumed by the supervisor on the single `listen` call.
    outbound_rx: Mutex<Option<mpsc::Receiver<OutboundRequest>>>,
}

impl SysmexDriver {
    /// Build a driver from validated configuration and its collaborators.
    pub fn new(
        config: AnalyzerConfig,
        mapping: MappingTable,
        upstream: Arc<dyn UpstreamClient>,
        archiver: Arc<dyn MessageArchiver>,
    ) -> BridgeResult<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let health = Arc::new(LinkHealth::default());
        let coordinator = Arc::new(TransactionCoordinator::new(
            Arc::clone(&config),
            Arc::new(mapping),
            upstream,
            archiver,
            outbound_tx,
            Arc::clone(&health),
        ));
        let (state_tx, state_rx) = watch::channel(LinkConnectionState::Disconnected);

        Ok(Self {
            config,
            coordinator,
            listening: Arc::new(AtomicBool::new(false)),
            health,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            state_tx,
            state_rx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
        })
    }

    /// Start driving the analyzer link in the configured mode.
    ///
    /// Server mode binds the listening socket here so bind failures
    /// surface to the caller; the supervisor then runs in a background
    /// task until `stop_listening`.
    pub async fn listen(&self) -> BridgeResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(BridgeError::Configuration(
                "driver already started".to_string(),
            ));
        }
        let outbound_rx = self.outbound_rx.lock().await.take().ok_or_else(|| {
            BridgeError::Configuration("outbound receiver already consumed".to_string())
        })?;

        self.listening.store(true, Ordering::Release);
        let supervisor = LinkSupervisor::new(
            Arc::clone(&self.config),
            Arc::clone(&self.coordinator),
            Arc::clone(&self.listening),
            Arc::clone(&self.health),
            self.cancel.clone(),
            self.state_tx.clone(),
            outbound_rx,
        );

        match self.config.mode {
            LinkMode::Client => {
                info!(
                    analyzer = %self.config.id_analyzer,
                    addr = %self.config.analyzer_addr(),
                    "starting ASTM client mode"
                );
                tokio::spawn(supervisor.run_client());
            }
            LinkMode::Server => {
                let port = self.config.port_analyzer;
                let listener = TcpListener::bind(("0.0.0.0", port)).await.map_err(|e| {
                    self.listening.store(false, Ordering::Release);
                    BridgeError::Bind(format!("cannot bind ASTM server on port {port}: {e}"))
                })?;
                info!(
                    analyzer = %self.config.id_analyzer,
                    port,
                    "ASTM server listening"
                );
                tokio::spawn(supervisor.run_server(listener));
            }
        }
        Ok(())
    }

    /// Stop the supervisor and release all sockets. Idempotent; in-flight
    /// reads are unblocked by the connection loop dropping its transport.
    pub fn stop_listening(&self) {
        if self.listening.swap(false, Ordering::AcqRel) {
            info!(analyzer = %self.config.id_analyzer, "stopping analyzer link");
        }
        self.cancel.cancel();
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    /// Observe link state transitions.
    pub fn subscribe_connection_state(&self) -> watch::Receiver<LinkConnectionState> {
        self.state_rx.clone()
    }

    /// One-line configuration summary for diagnostics.
    pub fn info(&self) -> String {
        let c = &self.config;
        format!(
            "Analyzer Info: [Crate={}, Version={}, ID={}, Lab27={}, Lab29={}, TypeCnx={}, TypeMsg={}, ArchiveMsg={}, MappingPath={}, OperationMode={}, Mode={}, IP={}, Port={}]",
            env!("CARGO_PKG_VERSION"),
            c.version,
            c.id_analyzer,
            c.url_upstream_lab27,
            c.url_upstream_lab29,
            c.type_cnx.as_str(),
            c.type_msg,
            c.archive_msg,
            c.mapping_path,
            c.operation_mode,
            c.mode.as_str(),
            c.ip_analyzer,
            c.port_analyzer,
        )
    }

    /// LAB-27: worklist query from the analyzer.
    pub async fn lab27(&self, astm_message: &str) -> Option<String> {
        self.coordinator.lab27(astm_message).await
    }

    /// LAB-28: order download from the LIS. Returns the ACK^R22 for the
    /// LIS (or an ERROR string when even that cannot be generated).
    pub async fn lab28(&self, oml_o33: &str) -> String {
        self.coordinator.lab28(oml_o33).await
    }

    /// LAB-29: result upload from the analyzer. Returns the ASTM
    /// termination record for the analyzer.
    pub async fn lab29(&self, astm_message: &str) -> String {
        self.coordinator.lab29(astm_message).await
    }
}

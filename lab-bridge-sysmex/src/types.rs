use crate::error::{BridgeError, BridgeResult};
use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Analyzer-facing transport kind. Only raw TCP sockets speaking E1381
/// framing are supported; anything else is rejected at validation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionKind {
    #[serde(rename = "socket")]
    Socket,
    #[serde(rename = "socket_E1381")]
    SocketE1381,
}

impl ConnectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionKind::Socket => "socket",
            ConnectionKind::SocketE1381 => "socket_E1381",
        }
    }
}

/// Whether the bridge dials the analyzer or accepts connections from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    Client,
    Server,
}

impl LinkMode {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkMode::Client => "client",
            LinkMode::Server => "server",
        }
    }
}

/// Reconnect backoff policy for client mode.
///
/// Defaults: start at 5 s, double per failure, cap at 60 s, no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConnectionPolicy {
    #[serde(default = "ConnectionPolicy::default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default = "ConnectionPolicy::default_max_interval_ms")]
    pub max_interval_ms: u64,
    #[serde(default = "ConnectionPolicy::default_multiplier")]
    pub multiplier: f64,
    #[serde(default)]
    pub randomization_factor: f64,
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: Self::default_initial_interval_ms(),
            max_interval_ms: Self::default_max_interval_ms(),
            multiplier: Self::default_multiplier(),
            randomization_factor: 0.0,
        }
    }
}

impl ConnectionPolicy {
    fn default_initial_interval_ms() -> u64 {
        5_000
    }

    fn default_max_interval_ms() -> u64 {
        60_000
    }

    fn default_multiplier() -> f64 {
        2.0
    }

    /// Build an `ExponentialBackoff` that never gives up; the supervisor's
    /// cancellation token is the only way out of the reconnect loop.
    pub fn build_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(self.initial_interval_ms.max(1)),
            max_interval: Duration::from_millis(self.max_interval_ms.max(self.initial_interval_ms)),
            multiplier: self.multiplier.max(1.0),
            randomization_factor: self.randomization_factor.clamp(0.0, 1.0),
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }
}

/// Flat analyzer configuration, one instance per driven analyzer.
///
/// Field names match the deployment's key-value convention rather than
/// Rust style; they come straight from the operator-facing config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    pub id_analyzer: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub url_upstream_lab27: String,
    #[serde(default)]
    pub url_upstream_lab29: String,
    pub type_cnx: ConnectionKind,
    #[serde(default)]
    pub type_msg: String,
    #[serde(default)]
    pub archive_msg: String,
    #[serde(default = "AnalyzerConfig::default_operation_mode")]
    pub operation_mode: String,
    pub mode: LinkMode,
    #[serde(default)]
    pub ip_analyzer: String,
    pub port_analyzer: u16,
    #[serde(default)]
    pub mapping_path: String,
    #[serde(default)]
    pub connection_policy: ConnectionPolicy,
}

impl AnalyzerConfig {
    fn default_operation_mode() -> String {
        "batch".to_string()
    }

    /// Reject configurations the supervisor cannot run with. Runs at
    /// driver construction, so a broken deployment fails at startup
    /// rather than on the first transaction.
    ///
    /// `type_cnx` values outside `socket`/`socket_E1381` are already
    /// rejected by the `ConnectionKind` enum when the config is parsed.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.port_analyzer == 0 {
            return Err(BridgeError::Configuration(
                "port_analyzer must be non-zero".to_string(),
            ));
        }
        if self.mode == LinkMode::Client && self.ip_analyzer.trim().is_empty() {
            return Err(BridgeError::Configuration(
                "ip_analyzer is required in client mode".to_string(),
            ));
        }
        if self.url_upstream_lab27.trim().is_empty() {
            return Err(BridgeError::Configuration(
                "url_upstream_lab27 is required".to_string(),
            ));
        }
        if self.url_upstream_lab29.trim().is_empty() {
            return Err(BridgeError::Configuration(
                "url_upstream_lab29 is required".to_string(),
            ));
        }
        Ok(())
    }

    /// `ip:port` string for client-mode dialing.
    pub fn analyzer_addr(&self) -> String {
        format!("{}:{}", self.ip_analyzer, self.port_analyzer)
    }

    /// True when message archiving is enabled.
    pub fn archiving_enabled(&self) -> bool {
        matches!(
            self.archive_msg.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "1" | "on"
        )
    }
}

/// Observable state of the analyzer link, published by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed(String),
}

//! Shared plumbing for the LAB transaction integration tests: tracing
//! setup, scripted collaborator doubles, and a minimal analyzer simulator
//! speaking the instrument side of ASTM E1381 over TCP.

#![allow(dead_code)]

use async_trait::async_trait;
use lab_bridge_sysmex::{
    protocol::error::ctrl,
    protocol::frame::{Frame, FrameDecoder, Terminator},
    AnalyzerConfig, BridgeError, BridgeResult, ConnectionKind, ConnectionPolicy,
    LinkConnectionState, LinkMode, MappingTable, MessageArchiver, SysmexDriver, UpstreamClient,
};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::watch,
};
use tracing::Level;

/// Global one-time tracing initialization for integration tests.
static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_target(false)
            .without_time()
            .try_init();
    });
}

/// Deadline wrapper so a broken exchange fails the test instead of
/// hanging it.
pub async fn within<T, F: std::future::Future<Output = T>>(fut: F) -> T {
    tokio::time::timeout(Duration::from_secs(20), fut)
        .await
        .expect("test step exceeded its deadline")
}

/// Grab a free TCP port by binding an ephemeral listener and dropping it.
pub async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
        .await
        .expect("bind ephemeral port");
    listener.local_addr().unwrap().port()
}

/// Analyzer configuration used across the flow tests. The reconnect
/// policy is tightened so client-mode tests converge quickly.
pub fn test_config(mode: LinkMode, port: u16) -> AnalyzerConfig {
    AnalyzerConfig {
        id_analyzer: "XP-TEST".into(),
        version: "1".into(),
        url_upstream_lab27: "http://lis.test/lab27".into(),
        url_upstream_lab29: "http://lis.test/lab29".into(),
        type_cnx: ConnectionKind::SocketE1381,
        type_msg: "astm".into(),
        archive_msg: "true".into(),
        operation_mode: "batch".into(),
        mode,
        ip_analyzer: "127.0.0.1".into(),
        port_analyzer: port,
        mapping_path: String::new(),
        connection_policy: ConnectionPolicy {
            initial_interval_ms: 50,
            max_interval_ms: 500,
            multiplier: 2.0,
            randomization_factor: 0.0,
        },
    }
}

/// Upstream double returning a scripted reply and recording every call.
pub struct ScriptedUpstream {
    reply: Result<String, String>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedUpstream {
    pub fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(reply.to_string()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(reason.to_string()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Recorded `(url, payload)` pairs.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpstreamClient for ScriptedUpstream {
    async fn send(&self, url: &str, er7: &str) -> BridgeResult<String> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), er7.to_string()));
        match &self.reply {
            Ok(reply) => Ok(reply.clone()),
            Err(reason) => Err(BridgeError::Upstream(reason.clone())),
        }
    }
}

/// Archiver double recording every archived message.
#[derive(Default)]
pub struct RecordingArchiver {
    entries: Mutex<Vec<ArchivedMessage>>,
}

#[derive(Debug, Clone)]
pub struct ArchivedMessage {
    pub analyzer_id: String,
    pub payload: String,
    pub label: String,
    pub direction: String,
}

impl RecordingArchiver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn entries(&self) -> Vec<ArchivedMessage> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageArchiver for RecordingArchiver {
    async fn archive(&self, analyzer_id: &str, payload: &str, label: &str, direction: &str) {
        self.entries.lock().unwrap().push(ArchivedMessage {
            analyzer_id: analyzer_id.to_string(),
            payload: payload.to_string(),
            label: label.to_string(),
            direction: direction.to_string(),
        });
    }
}

/// Assemble a driver with test doubles already coerced to trait objects.
pub fn build_driver(
    config: AnalyzerConfig,
    mapping: MappingTable,
    upstream: Arc<ScriptedUpstream>,
    archiver: Arc<RecordingArchiver>,
) -> Arc<SysmexDriver> {
    Arc::new(
        SysmexDriver::new(
            config,
            mapping,
            upstream as Arc<dyn UpstreamClient>,
            archiver as Arc<dyn MessageArchiver>,
        )
        .expect("driver construction"),
    )
}

/// Block until the link state watch reaches `Connected`.
pub async fn wait_connected(rx: &mut watch::Receiver<LinkConnectionState>) {
    within(async {
        loop {
            if *rx.borrow() == LinkConnectionState::Connected {
                return;
            }
            rx.changed().await.expect("state channel closed");
        }
    })
    .await;
}

/// The instrument side of the link, scripted over a plain TCP stream.
pub struct AnalyzerSim {
    pub stream: TcpStream,
}

impl AnalyzerSim {
    pub async fn connect(port: u16) -> Self {
        let stream = within(TcpStream::connect(("127.0.0.1", port)))
            .await
            .expect("analyzer sim connect");
        Self { stream }
    }

    pub async fn from_accept(listener: &tokio::net::TcpListener) -> Self {
        let (stream, _) = within(listener.accept()).await.expect("accept bridge");
        Self { stream }
    }

    async fn read_byte(&mut self) -> u8 {
        let mut buf = [0u8; 1];
        within(self.stream.read_exact(&mut buf))
            .await
            .expect("sim read");
        buf[0]
    }

    pub async fn expect_ctrl(&mut self, expected: u8) {
        let got = self.read_byte().await;
        assert_eq!(got, expected, "expected control byte {expected:#04x}");
    }

    pub async fn write_ctrl(&mut self, byte: u8) {
        within(self.stream.write_all(&[byte]))
            .await
            .expect("sim write");
    }

    /// Transmit an ASTM message exactly as the XP would: ENQ, one frame
    /// per record with cycling frame numbers, EOT.
    pub async fn send_astm(&mut self, records: &[&str]) {
        self.write_ctrl(ctrl::ENQ).await;
        self.expect_ctrl(ctrl::ACK).await;
        for (i, record) in records.iter().enumerate() {
            let number = ((i + 1) % 8) as u8;
            let frame = Frame::new(number, record.as_bytes().to_vec(), Terminator::Etx);
            let wire = frame.encode().expect("encode sim frame");
            within(self.stream.write_all(&wire)).await.expect("sim write");
            self.expect_ctrl(ctrl::ACK).await;
        }
        self.write_ctrl(ctrl::EOT).await;
    }

    /// Read one frame without acknowledging it, or `None` for EOT.
    pub async fn read_frame_silent(&mut self) -> Option<Frame> {
        let first = self.read_byte().await;
        if first == ctrl::EOT {
            return None;
        }
        assert_eq!(first, ctrl::STX, "expected STX or EOT from bridge");
        let mut decoder = FrameDecoder::new();
        decoder.push(ctrl::STX).expect("decoder accepts STX");
        loop {
            let byte = self.read_byte().await;
            match decoder.push(byte) {
                Ok(Some(frame)) => return Some(frame),
                Ok(None) => {}
                Err(e) => panic!("bridge sent malformed frame: {e}"),
            }
        }
    }

    /// Read one frame (ACKing it) or `None` for EOT.
    pub async fn read_frame(&mut self) -> Option<Frame> {
        match self.read_frame_silent().await {
            Some(frame) => {
                self.write_ctrl(ctrl::ACK).await;
                Some(frame)
            }
            None => None,
        }
    }

    /// Receive a complete host→analyzer message, acknowledging every
    /// frame. Returns the frame numbers and the record payloads.
    pub async fn recv_astm(&mut self) -> (Vec<u8>, Vec<String>) {
        self.expect_ctrl(ctrl::ENQ).await;
        self.write_ctrl(ctrl::ACK).await;
        let mut numbers = Vec::new();
        let mut records = Vec::new();
        while let Some(frame) = self.read_frame().await {
            numbers.push(frame.number);
            records.push(String::from_utf8(frame.payload).expect("ascii payload"));
        }
        (numbers, records)
    }
}

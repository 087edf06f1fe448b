use std::time::Duration;
use thiserror::Error;

/// ASTM E1381 control bytes.
pub mod ctrl {
    pub const STX: u8 = 0x02;
    pub const ETX: u8 = 0x03;
    pub const EOT: u8 = 0x04;
    pub const ENQ: u8 = 0x05;
    pub const ACK: u8 = 0x06;
    pub const CR: u8 = 0x0D;
    pub const LF: u8 = 0x0A;
    pub const NAK: u8 = 0x15;
    pub const ETB: u8 = 0x17;
}

/// Printable name of a control or ASCII byte, used in link-level traces.
pub fn printable(b: u8) -> String {
    match b {
        ctrl::STX => "STX".to_string(),
        ctrl::ETX => "ETX".to_string(),
        ctrl::EOT => "EOT".to_string(),
        ctrl::ENQ => "ENQ".to_string(),
        ctrl::ACK => "ACK".to_string(),
        ctrl::NAK => "NAK".to_string(),
        ctrl::CR => "CR".to_string(),
        ctrl::LF => "LF".to_string(),
        ctrl::ETB => "ETB".to_string(),
        0x20..=0x7E => format!("'{}'", b as char),
        other => format!("0x{other:02X}"),
    }
}

/// Link-level error domain for the ASTM E1381 engine.
///
/// This error is used inside the protocol module only. Structural framing
/// failures, establishment/retry outcomes and transport conditions are kept
/// apart so the supervisor and coordinator can react differently to each.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A frame did not open with STX where one was required.
    #[error("frame does not start with STX")]
    MissingStx,
    /// The stream ended inside a frame.
    #[error("frame truncated: {0}")]
    Truncated(&'static str),
    /// Computed and received checksums disagree.
    #[error("frame checksum mismatch: expected {expected}, got {got}")]
    BadChecksum { expected: String, got: String },
    /// The CR LF trailer after the checksum was malformed.
    #[error("invalid frame trailer byte 0x{0:02X}")]
    BadTrailer(u8),
    /// The frame number byte was not an ASCII digit 0..=7.
    #[error("invalid frame number byte 0x{0:02X}")]
    BadFrameNumber(u8),
    /// Frame payload exceeds the single-frame budget and cannot be encoded.
    #[error("frame payload too large: {0} bytes")]
    FrameTooLarge(usize),
    /// The remote side never acknowledged our ENQ.
    #[error("link establishment failed: {0}")]
    EstablishmentFailed(&'static str),
    /// A frame was not acknowledged after the maximum number of attempts.
    #[error("frame {frame} not acknowledged after {attempts} attempts")]
    RetryExhausted { frame: usize, attempts: u32 },
    /// Deadline expired while waiting for a byte on the wire.
    #[error("link timeout after {0:?}")]
    Timeout(Duration),
    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,
    /// Underlying transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

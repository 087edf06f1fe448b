use crate::protocol::ProtocolError;
use std::time::Duration;
use thiserror::Error;

/// Driver-level error domain.
///
/// Link-layer failures live in [`ProtocolError`]; everything the coordinator,
/// supervisor and driver surface to callers is a `BridgeError`. Conversion
/// failures never escape the coordinator as errors (they collapse into
/// protocol-level negative acknowledgments), but the variants exist so the
/// internal helpers can report what went wrong.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Invalid or unusable configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Structural failure while encoding or decoding wire data.
    #[error("codec error: {0}")]
    Codec(String),
    /// ASTM↔HL7 translation failure.
    #[error("conversion error: {0}")]
    Conversion(String),
    /// The upstream LIS adapter failed or returned a non-HL7 reply.
    #[error("upstream error: {0}")]
    Upstream(String),
    /// Failure on the analyzer-facing link.
    #[error("session error: {0}")]
    Session(String),
    /// The server socket could not be bound.
    #[error("bind error: {0}")]
    Bind(String),
    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    /// No analyzer link is currently established.
    #[error("no active analyzer connection")]
    NotConnected,
}

/// Map link-layer errors into the driver's error domain.
///
/// Structural codec issues become `Codec`; establishment and retry outcomes
/// as well as transport failures become `Session` so the supervisor treats
/// them as fatal for the connection; timeouts keep their duration.
impl From<ProtocolError> for BridgeError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::MissingStx
            | ProtocolError::Truncated(_)
            | ProtocolError::BadChecksum { .. }
            | ProtocolError::BadTrailer(_)
            | ProtocolError::BadFrameNumber(_)
            | ProtocolError::FrameTooLarge(_) => BridgeError::Codec(err.to_string()),
            ProtocolError::Timeout(d) => BridgeError::Timeout(d),
            ProtocolError::EstablishmentFailed(_)
            | ProtocolError::RetryExhausted { .. }
            | ProtocolError::ConnectionClosed => BridgeError::Session(err.to_string()),
            ProtocolError::Io(e) => BridgeError::Session(e.to_string()),
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

//! ASTM E1381 link layer: framing, record grammar, and the half-duplex
//! exchange engine.

pub mod error;
pub mod frame;
pub mod record;
pub mod session;

pub use error::ProtocolError;
pub use frame::{Frame, FrameDecoder, Terminator};
pub use record::{parse_message, Record, RecordKind};
pub use session::{AstmLink, IdleEvent};

use crate::protocol::{
    error::{ctrl, printable, ProtocolError},
    frame::{Frame, FrameDecoder, Terminator, MAX_FRAME_PAYLOAD, MAX_SEND_ATTEMPTS},
};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

/// Deadline for the receiver's idle ENQ wait.
pub const ENQ_WAIT: Duration = Duration::from_secs(15);
/// Deadline for every ACK/NAK wait on the sender side.
pub const ACK_WAIT: Duration = Duration::from_secs(10);

/// Outcome of one idle-wait step on the receiver side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleEvent {
    /// The peer requested the line; ACK it and receive frames.
    Enq,
    /// The peer closed the connection.
    Eof,
    /// Nothing arrived within the idle deadline.
    Timeout,
    /// A byte other than ENQ arrived; ignored as line noise.
    Noise(u8),
}

/// Half-duplex ASTM E1381 link over a byte-stream transport.
///
/// One `AstmLink` owns the transport for the lifetime of a connection. The
/// same value drives both directions: the connection loop alternates between
/// the receiver half (`wait_idle` / `accept_enq` / `receive_message`) and
/// the sender half (`send_message`), so the two roles are never active
/// concurrently, so E1381 contention collapses to strict turn-taking.
#[derive(Debug)]
pub struct AstmLink<T> {
    io: T,
}

impl<T> AstmLink<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: T) -> Self {
        Self { io }
    }

    /// Read one byte. `deadline: None` blocks until a byte or EOF.
    /// Returns `Ok(None)` on a cleanly closed stream.
    async fn read_byte(&mut self, deadline: Option<Duration>) -> Result<Option<u8>, ProtocolError> {
        let mut buf = [0u8; 1];
        let read = async {
            let n = self.io.read(&mut buf).await?;
            Ok::<usize, std::io::Error>(n)
        };
        let n = match deadline {
            Some(d) => tokio::time::timeout(d, read)
                .await
                .map_err(|_| ProtocolError::Timeout(d))??,
            None => read.await?,
        };
        if n == 0 {
            return Ok(None);
        }
        trace!(byte = %printable(buf[0]), "link <<");
        Ok(Some(buf[0]))
    }

    async fn write_byte(&mut self, byte: u8) -> Result<(), ProtocolError> {
        trace!(byte = %printable(byte), "link >>");
        self.io.write_all(&[byte]).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// One step of the receiver's idle loop: wait up to 15 s for an ENQ.
    pub async fn wait_idle(&mut self) -> Result<IdleEvent, ProtocolError> {
        match self.read_byte(Some(ENQ_WAIT)).await {
            Ok(Some(ctrl::ENQ)) => Ok(IdleEvent::Enq),
            Ok(Some(other)) => {
                debug!(byte = %printable(other), "ignoring byte while waiting for ENQ");
                Ok(IdleEvent::Noise(other))
            }
            Ok(None) => Ok(IdleEvent::Eof),
            Err(ProtocolError::Timeout(_)) => Ok(IdleEvent::Timeout),
            Err(e) => Err(e),
        }
    }

    /// Acknowledge a received ENQ, granting the peer the line.
    pub async fn accept_enq(&mut self) -> Result<(), ProtocolError> {
        self.write_byte(ctrl::ACK).await
    }

    /// Receive one logical message: frames until EOT, with per-frame
    /// checksum verification and NAK-triggered retransmission.
    ///
    /// Payloads of accepted frames are concatenated, `\r\n` normalized to
    /// `\r`, and the result trimmed; an all-noise transmission yields an
    /// empty string that the caller ignores.
    ///
    /// Structural frame errors (truncation, bad trailer) abort the message
    /// and surface as errors; the connection is torn down above us.
    pub async fn receive_message(&mut self) -> Result<String, ProtocolError> {
        let mut assembled: Vec<u8> = Vec::new();

        'frames: loop {
            // Between frames: expect STX or EOT. Reads here are unbounded;
            // cancellation comes from the supervisor dropping this future.
            let first = match self.read_byte(None).await? {
                Some(b) => b,
                None => return Err(ProtocolError::ConnectionClosed),
            };

            match first {
                ctrl::EOT => break 'frames,
                ctrl::STX => {}
                other => {
                    debug!(byte = %printable(other), "ignoring byte while waiting for STX/EOT");
                    continue 'frames;
                }
            }

            let mut decoder = FrameDecoder::new();
            // The decoder re-consumes the STX we already pulled.
            decoder.push(ctrl::STX)?;

            let frame = loop {
                let byte = match self.read_byte(None).await? {
                    Some(b) => b,
                    None => return Err(ProtocolError::Truncated("stream closed mid-frame")),
                };
                match decoder.push(byte) {
                    Ok(Some(frame)) => break frame,
                    Ok(None) => continue,
                    Err(ProtocolError::BadChecksum { expected, got }) => {
                        warn!(expected, got, "frame checksum mismatch, requesting retransmit");
                        self.write_byte(ctrl::NAK).await?;
                        // Do not append; the sender retransmits the same frame.
                        continue 'frames;
                    }
                    Err(e) => return Err(e),
                }
            };

            self.write_byte(ctrl::ACK).await?;
            trace!(
                number = frame.number,
                len = frame.payload.len(),
                terminator = ?frame.terminator,
                "frame accepted"
            );
            assembled.extend_from_slice(&frame.payload);
            // ETB means the logical record continues in the next frame;
            // either way the next step expects STX or EOT.
        }

        let message = String::from_utf8_lossy(&assembled)
            .replace("\r\n", "\r")
            .trim()
            .to_string();
        Ok(message)
    }

    /// Transmit a list of ASTM records using the full sender protocol:
    /// ENQ/ACK establishment, per-frame acknowledgment with up to six
    /// attempts, EOT termination.
    ///
    /// Records longer than the frame payload budget are split across
    /// continuation frames terminated by ETB. Frame numbers advance per
    /// physical frame, cycling 1,2,…,7,0.
    pub async fn send_message(&mut self, records: &[String]) -> Result<(), ProtocolError> {
        // Establishment.
        self.write_byte(ctrl::ENQ).await?;
        match self.read_byte(Some(ACK_WAIT)).await {
            Ok(Some(ctrl::ACK)) => {}
            Ok(Some(ctrl::NAK)) => {
                return Err(ProtocolError::EstablishmentFailed("remote not ready"));
            }
            Ok(Some(other)) => {
                warn!(byte = %printable(other), "unexpected byte after ENQ");
                return Err(ProtocolError::EstablishmentFailed("unexpected response"));
            }
            Ok(None) => return Err(ProtocolError::ConnectionClosed),
            Err(ProtocolError::Timeout(_)) => {
                return Err(ProtocolError::EstablishmentFailed("no response to ENQ"));
            }
            Err(e) => return Err(e),
        }

        // Transfer.
        let mut seq: u8 = 1;
        for (index, record) in records.iter().enumerate() {
            let bytes = record.as_bytes();
            let chunks: Vec<&[u8]> = if bytes.is_empty() {
                vec![&[]]
            } else {
                bytes.chunks(MAX_FRAME_PAYLOAD).collect()
            };
            let last_chunk = chunks.len() - 1;

            for (ci, chunk) in chunks.into_iter().enumerate() {
                let terminator = if ci == last_chunk {
                    Terminator::Etx
                } else {
                    Terminator::Etb
                };
                let frame = Frame::new(seq, chunk.to_vec(), terminator);
                let wire = frame.encode()?;

                let mut acked = false;
                for attempt in 1..=MAX_SEND_ATTEMPTS {
                    trace!(record = index + 1, frame = seq, attempt, "sending frame");
                    self.io.write_all(&wire).await?;
                    self.io.flush().await?;

                    match self.read_byte(Some(ACK_WAIT)).await {
                        Ok(Some(ctrl::ACK)) => {
                            acked = true;
                            break;
                        }
                        Ok(Some(ctrl::NAK)) => {
                            warn!(frame = seq, attempt, "frame NAKed, retrying same frame");
                        }
                        Ok(Some(other)) => {
                            warn!(
                                frame = seq,
                                attempt,
                                byte = %printable(other),
                                "unexpected byte after frame, retrying"
                            );
                        }
                        Ok(None) => return Err(ProtocolError::ConnectionClosed),
                        Err(ProtocolError::Timeout(_)) => {
                            warn!(frame = seq, attempt, "timeout waiting for frame ack, retrying");
                        }
                        Err(e) => return Err(e),
                    }
                }

                if !acked {
                    warn!(frame = seq, "frame retries exhausted, aborting with EOT");
                    self.write_byte(ctrl::EOT).await?;
                    return Err(ProtocolError::RetryExhausted {
                        frame: index + 1,
                        attempts: MAX_SEND_ATTEMPTS,
                    });
                }
                seq = (seq + 1) % 8;
            }
        }

        // Termination.
        self.write_byte(ctrl::EOT).await
    }
}

use crate::protocol::error::{ctrl, ProtocolError};
use bytes::{BufMut, BytesMut};

/// Largest payload carried by a single frame before the sender switches to
/// ETB continuation frames. 240 bytes is the conservative budget used by the
/// XP-family instruments.
pub const MAX_FRAME_PAYLOAD: usize = 240;

/// Number of physical frame attempts before the sender gives up on a frame.
pub const MAX_SEND_ATTEMPTS: u32 = 6;

/// Frame terminator: ETX closes a logical record, ETB marks a continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    Etx,
    Etb,
}

impl Terminator {
    pub fn byte(self) -> u8 {
        match self {
            Terminator::Etx => ctrl::ETX,
            Terminator::Etb => ctrl::ETB,
        }
    }

    pub fn is_final(self) -> bool {
        matches!(self, Terminator::Etx)
    }
}

/// A single ASTM E1381 frame.
///
/// Serialized form:
/// `STX <number-ascii> <payload> <ETX|ETB> <checksum-hex ×2> CR LF`
/// where the checksum is the byte sum of everything between STX and the
/// checksum itself, modulo 256, as two uppercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame number, 0..=7. Senders cycle 1,2,…,7,0,1,…
    pub number: u8,
    /// US-ASCII payload bytes.
    pub payload: Vec<u8>,
    pub terminator: Terminator,
}

impl Frame {
    pub fn new(number: u8, payload: Vec<u8>, terminator: Terminator) -> Self {
        debug_assert!(number <= 7, "frame number must be 0..=7");
        Self {
            number: number & 0x07,
            payload,
            terminator,
        }
    }

    /// Checksum over `number-ascii || payload || terminator`, modulo 256.
    pub fn checksum(&self) -> u8 {
        checksum(b'0' + self.number, &self.payload, self.terminator.byte())
    }

    /// Serialize the frame into wire bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        if self.payload.len() > MAX_FRAME_PAYLOAD {
            return Err(ProtocolError::FrameTooLarge(self.payload.len()));
        }
        let mut buf = BytesMut::with_capacity(self.payload.len() + 7);
        buf.put_u8(ctrl::STX);
        buf.put_u8(b'0' + self.number);
        buf.put_slice(&self.payload);
        buf.put_u8(self.terminator.byte());
        buf.put_slice(format!("{:02X}", self.checksum()).as_bytes());
        buf.put_u8(ctrl::CR);
        buf.put_u8(ctrl::LF);
        Ok(buf)
    }
}

/// Modulo-256 byte sum of the checksummed region of a frame.
pub fn checksum(number_ascii: u8, payload: &[u8], terminator: u8) -> u8 {
    let mut sum = number_ascii as u32;
    for &b in payload {
        sum += b as u32;
    }
    sum += terminator as u32;
    (sum & 0xFF) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    ExpectStx,
    FrameNumber,
    Payload,
    Checksum1,
    Checksum2,
    ExpectCr,
    ExpectLf,
}

/// Incremental frame decoder fed one byte at a time.
///
/// The receiver half of the link engine reads bytes off the socket and
/// pushes them here; a completed, checksum-verified frame pops out once the
/// LF trailer lands. Checksum comparison is ASCII case-insensitive.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    number: u8,
    payload: Vec<u8>,
    terminator: Terminator,
    checksum_chars: [u8; 2],
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::ExpectStx,
            number: 0,
            payload: Vec::new(),
            terminator: Terminator::Etx,
            checksum_chars: [0; 2],
        }
    }

    /// True when the decoder is between frames.
    pub fn is_idle(&self) -> bool {
        self.state == DecodeState::ExpectStx
    }

    fn reset(&mut self) {
        self.state = DecodeState::ExpectStx;
        self.payload = Vec::new();
        self.number = 0;
        self.terminator = Terminator::Etx;
        self.checksum_chars = [0; 2];
    }

    /// Feed one byte. Returns a complete frame once the trailer is
    /// consumed and the checksum verifies; structural errors reset the
    /// decoder to the idle state.
    pub fn push(&mut self, byte: u8) -> Result<Option<Frame>, ProtocolError> {
        match self.state {
            DecodeState::ExpectStx => {
                if byte != ctrl::STX {
                    return Err(ProtocolError::MissingStx);
                }
                self.state = DecodeState::FrameNumber;
                Ok(None)
            }
            DecodeState::FrameNumber => {
                if !(b'0'..=b'7').contains(&byte) {
                    self.reset();
                    return Err(ProtocolError::BadFrameNumber(byte));
                }
                self.number = byte - b'0';
                self.state = DecodeState::Payload;
                Ok(None)
            }
            DecodeState::Payload => {
                match byte {
                    ctrl::ETX => {
                        self.terminator = Terminator::Etx;
                        self.state = DecodeState::Checksum1;
                    }
                    ctrl::ETB => {
                        self.terminator = Terminator::Etb;
                        self.state = DecodeState::Checksum1;
                    }
                    other => self.payload.push(other),
                }
                Ok(None)
            }
            DecodeState::Checksum1 => {
                self.checksum_chars[0] = byte;
                self.state = DecodeState::Checksum2;
                Ok(None)
            }
            DecodeState::Checksum2 => {
                self.checksum_chars[1] = byte;
                self.state = DecodeState::ExpectCr;
                Ok(None)
            }
            DecodeState::ExpectCr => {
                if byte != ctrl::CR {
                    self.reset();
                    return Err(ProtocolError::BadTrailer(byte));
                }
                self.state = DecodeState::ExpectLf;
                Ok(None)
            }
            DecodeState::ExpectLf => {
                if byte != ctrl::LF {
                    self.reset();
                    return Err(ProtocolError::BadTrailer(byte));
                }
                let frame = Frame {
                    number: self.number,
                    payload: std::mem::take(&mut self.payload),
                    terminator: self.terminator,
                };
                let got = String::from_utf8_lossy(&self.checksum_chars).to_string();
                self.reset();

                let expected = format!("{:02X}", frame.checksum());
                if !expected.eq_ignore_ascii_case(&got) {
                    return Err(ProtocolError::BadChecksum { expected, got });
                }
                Ok(Some(frame))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Result<Option<Frame>, ProtocolError> {
        let mut dec = FrameDecoder::new();
        let mut out = None;
        for &b in bytes {
            if let Some(frame) = dec.push(b)? {
                out = Some(frame);
            }
        }
        Ok(out)
    }

    #[test]
    fn round_trip_all_frame_numbers() {
        for n in 0..=7u8 {
            let frame = Frame::new(n, b"H|\\^&".to_vec(), Terminator::Etx);
            let wire = frame.encode().unwrap();
            let decoded = decode_all(&wire).unwrap().expect("complete frame");
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn round_trip_etb_terminator() {
        let frame = Frame::new(2, b"R|1|^^^^WBC^26|6.42".to_vec(), Terminator::Etb);
        let wire = frame.encode().unwrap();
        let decoded = decode_all(&wire).unwrap().unwrap();
        assert_eq!(decoded.terminator, Terminator::Etb);
        assert_eq!(decoded.payload, frame.payload);
    }

    #[test]
    fn checksum_matches_byte_sum() {
        let frame = Frame::new(1, b"P|1".to_vec(), Terminator::Etx);
        let mut sum = b'1' as u32;
        for b in b"P|1" {
            sum += *b as u32;
        }
        sum += ctrl::ETX as u32;
        assert_eq!(frame.checksum(), (sum % 256) as u8);
    }

    #[test]
    fn checksum_is_compared_case_insensitively() {
        let frame = Frame::new(1, b"L|1|N".to_vec(), Terminator::Etx);
        let mut wire = frame.encode().unwrap().to_vec();
        // Lower-case the two checksum hex chars in place.
        let cs_at = wire.len() - 4;
        wire[cs_at..cs_at + 2].make_ascii_lowercase();
        let decoded = decode_all(&wire).unwrap().unwrap();
        assert_eq!(decoded.payload, b"L|1|N");
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let frame = Frame::new(1, b"L|1|N".to_vec(), Terminator::Etx);
        let mut wire = frame.encode().unwrap().to_vec();
        let cs_at = wire.len() - 4;
        wire[cs_at] = if wire[cs_at] == b'0' { b'1' } else { b'0' };
        match decode_all(&wire) {
            Err(ProtocolError::BadChecksum { .. }) => {}
            other => panic!("expected checksum mismatch, got {other:?}"),
        }
    }

    #[test]
    fn missing_stx_is_an_error() {
        let mut dec = FrameDecoder::new();
        assert!(matches!(dec.push(b'X'), Err(ProtocolError::MissingStx)));
    }

    #[test]
    fn bad_trailer_is_an_error() {
        let frame = Frame::new(3, b"Q|1|20359".to_vec(), Terminator::Etx);
        let mut wire = frame.encode().unwrap().to_vec();
        let cr_at = wire.len() - 2;
        wire[cr_at] = b'X';
        match decode_all(&wire) {
            Err(ProtocolError::BadTrailer(b'X')) => {}
            other => panic!("expected trailer error, got {other:?}"),
        }
    }

    #[test]
    fn oversized_payload_refuses_to_encode() {
        let frame = Frame::new(1, vec![b'A'; MAX_FRAME_PAYLOAD + 1], Terminator::Etx);
        assert!(matches!(
            frame.encode(),
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn decoder_recovers_after_structural_error() {
        let mut dec = FrameDecoder::new();
        assert!(dec.push(b'j').is_err());
        assert!(dec.is_idle());
        let frame = Frame::new(1, b"P|1".to_vec(), Terminator::Etx);
        let wire = frame.encode().unwrap();
        let mut out = None;
        for &b in wire.iter() {
            if let Some(f) = dec.push(b).unwrap() {
                out = Some(f);
            }
        }
        assert_eq!(out.unwrap().payload, b"P|1");
    }
}

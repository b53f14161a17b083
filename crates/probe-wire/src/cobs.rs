//! Consistent Overhead Byte Stuffing: frames arbitrary bytes, including
//! embedded zeros, into a zero-delimited wire form with no zero bytes other
//! than the terminator.

use thiserror::Error;

/// Largest payload this decoder will reassemble. Frames exceeding this are
/// drained and reported as [`CobsError::Overflow`].
pub const MAX_PAYLOAD: usize = 4096;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CobsError {
    #[error("COBS frame exceeded the {MAX_PAYLOAD}-byte payload limit")]
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CobsEvent {
    None,
    FrameReady,
    Error(CobsError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CobsState {
    Idle,
    Rxing,
    Draining,
}

/// Byte pump implementing the decode side of COBS. Drive it one byte at a
/// time with [`CobsDecoder::pump`]; on [`CobsEvent::FrameReady`] the decoded
/// payload is available from [`CobsDecoder::frame`] until the next pump call.
pub struct CobsDecoder {
    state: CobsState,
    counter: u8,
    max_run: bool,
    buf: [u8; MAX_PAYLOAD],
    len: usize,
}

impl Default for CobsDecoder {
    fn default() -> Self {
        Self { state: CobsState::Idle, counter: 0, max_run: false, buf: [0; MAX_PAYLOAD], len: 0 }
    }
}

impl CobsDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pump(&mut self, byte: u8) -> CobsEvent {
        match self.state {
            CobsState::Draining => {
                if byte == 0 {
                    self.state = CobsState::Idle;
                }
                CobsEvent::None
            }
            CobsState::Idle => {
                if byte == 0 {
                    return CobsEvent::None;
                }
                self.start_run(byte);
                CobsEvent::None
            }
            CobsState::Rxing => {
                if self.counter == 0 {
                    if byte == 0 {
                        self.state = CobsState::Idle;
                        return CobsEvent::FrameReady;
                    }
                    if !self.max_run && !self.push(0) {
                        return self.overflow();
                    }
                    self.start_run(byte);
                    CobsEvent::None
                } else {
                    if !self.push(byte) {
                        return self.overflow();
                    }
                    self.counter -= 1;
                    CobsEvent::None
                }
            }
        }
    }

    fn start_run(&mut self, length_byte: u8) {
        self.counter = length_byte - 1;
        self.max_run = length_byte == 0xFF;
        self.len = 0;
        self.state = CobsState::Rxing;
    }

    fn push(&mut self, byte: u8) -> bool {
        if self.len >= MAX_PAYLOAD {
            return false;
        }
        self.buf[self.len] = byte;
        self.len += 1;
        true
    }

    fn overflow(&mut self) -> CobsEvent {
        self.state = CobsState::Draining;
        CobsEvent::Error(CobsError::Overflow)
    }

    /// The decoded payload from the most recently completed frame.
    pub fn frame(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

/// Encodes `payload` (no length restriction other than `usize`) into its
/// COBS wire form, including the trailing zero terminator.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + payload.len() / 254 + 2);
    let mut code_idx = out.len();
    out.push(0);
    let mut code: u8 = 1;
    for &b in payload {
        if b == 0 {
            out[code_idx] = code;
            code_idx = out.len();
            out.push(0);
            code = 1;
        } else {
            out.push(b);
            code += 1;
            if code == 0xFF {
                out[code_idx] = code;
                code_idx = out.len();
                out.push(0);
                code = 1;
            }
        }
    }
    out[code_idx] = code;
    out.push(0);
    out
}

/// One-shot decode of a complete COBS-encoded frame (including its
/// terminator). Mostly useful for tests; production code drives
/// [`CobsDecoder`] a byte at a time.
pub fn decode(encoded: &[u8]) -> Result<Vec<u8>, CobsError> {
    let mut decoder = CobsDecoder::new();
    for &b in encoded {
        if let CobsEvent::Error(e) = decoder.pump(b) {
            return Err(e);
        }
    }
    Ok(decoder.frame().to_vec())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn simple_frame() {
        let payload = [0x11, 0x22, 0x00, 0x33];
        let encoded = encode(&payload);
        assert_eq!(encoded, vec![0x03, 0x11, 0x22, 0x02, 0x33, 0x00]);
        assert_eq!(decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn max_run() {
        let payload = [0xAAu8; 254];
        let encoded = encode(&payload);
        let mut expected = vec![0xFF];
        expected.extend_from_slice(&payload);
        expected.push(0x01);
        expected.push(0x00);
        assert_eq!(encoded, expected);
        assert_eq!(encoded.len(), 257);
        assert_eq!(decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn round_trip_arbitrary_payloads() {
        for len in [0, 1, 253, 254, 255, 512, 4096] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let encoded = encode(&payload);
            assert!(!encoded[..encoded.len() - 1].contains(&0));
            assert!(encoded.len() <= payload.len() + payload.len().div_ceil(254) + 2);
            assert_eq!(decode(&encoded).unwrap(), payload);
        }
    }

    #[test]
    fn back_to_back_terminators_are_consumed_gracefully() {
        let mut decoder = CobsDecoder::new();
        assert_eq!(decoder.pump(0), CobsEvent::None);
        assert_eq!(decoder.pump(0), CobsEvent::None);
        assert_eq!(decoder.pump(0x02), CobsEvent::None);
        assert_eq!(decoder.pump(0xAA), CobsEvent::None);
        assert_eq!(decoder.pump(0x00), CobsEvent::FrameReady);
        assert_eq!(decoder.frame(), &[0xAA]);
    }

    #[test]
    fn overflow_drains_to_next_terminator() {
        let mut decoder = CobsDecoder::new();
        assert_eq!(decoder.pump(0xFF), CobsEvent::None);
        let mut last = CobsEvent::None;
        for _ in 0..254 {
            last = decoder.pump(0x01);
        }
        assert_eq!(last, CobsEvent::None);
        // One more max-length run pushes past MAX_PAYLOAD.
        for _ in 0..(MAX_PAYLOAD - 254 + 1) {
            last = decoder.pump(0xFF);
            if matches!(last, CobsEvent::Error(_)) {
                break;
            }
            for _ in 0..254 {
                last = decoder.pump(0x01);
            }
        }
        assert!(matches!(last, CobsEvent::Error(CobsError::Overflow)));
        assert_eq!(decoder.pump(0x00), CobsEvent::None);
        assert_eq!(decoder.pump(0x01), CobsEvent::None);
        assert_eq!(decoder.pump(0x00), CobsEvent::FrameReady);
    }
}

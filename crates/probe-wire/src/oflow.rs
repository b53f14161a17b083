//! OFLOW framing: `<tag:1><timestamp:8 LE><payload><checksum:1>`, the whole
//! thing COBS-encoded on the wire. Sits one layer above [`crate::cobs`]: feed
//! it raw link bytes and it hands back fully-checked frames.

use thiserror::Error;

use crate::cobs::{CobsDecoder, CobsError, CobsEvent};

/// Bytes of fixed overhead in an OFLOW frame: 1 tag + 8 timestamp + 1 checksum.
const OVERHEAD: usize = 10;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OflowError {
    #[error("OFLOW frame shorter than the {OVERHEAD}-byte minimum")]
    TooShort,
    #[error("COBS layer error: {0}")]
    Cobs(#[from] CobsError),
}

/// A decoded OFLOW frame borrowing its payload from the decoder that
/// produced it. `good` is true iff the checksum verified; a bad-checksum
/// frame is still delivered so the caller can count it and move on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OflowFrame<'a> {
    pub tag: u8,
    pub timestamp_ns: u64,
    pub payload: &'a [u8],
    pub good: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OflowStats {
    pub frames_decoded: u64,
    pub bad_checksum: u64,
    pub cobs_errors: u64,
    pub too_short: u64,
}

/// Additive mod-256 checksum over the tag and payload only; the timestamp is
/// excluded.
fn checksum(tag: u8, payload: &[u8]) -> u8 {
    payload.iter().fold(tag, |acc, &b| acc.wrapping_add(b))
}

/// Validates and parses a raw (already COBS-decoded) OFLOW frame.
pub fn decode_raw_frame(raw: &[u8]) -> Result<OflowFrame<'_>, OflowError> {
    if raw.len() < OVERHEAD {
        return Err(OflowError::TooShort);
    }
    let tag = raw[0];
    let timestamp_ns = u64::from_le_bytes(raw[1..9].try_into().unwrap());
    let payload = &raw[9..raw.len() - 1];
    let want = raw[raw.len() - 1];
    let got = checksum(tag, payload);
    Ok(OflowFrame { tag, timestamp_ns, payload, good: got == want })
}

/// Builds the raw (pre-COBS) bytes for one OFLOW frame.
pub fn encode_raw_frame(tag: u8, timestamp_ns: u64, payload: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(OVERHEAD + payload.len());
    raw.push(tag);
    raw.extend_from_slice(&timestamp_ns.to_le_bytes());
    raw.extend_from_slice(payload);
    raw.push(checksum(tag, payload));
    raw
}

/// Builds the full wire form (COBS-encoded) of one OFLOW frame.
pub fn encode_frame(tag: u8, timestamp_ns: u64, payload: &[u8]) -> Vec<u8> {
    crate::cobs::encode(&encode_raw_frame(tag, timestamp_ns, payload))
}

/// Streaming OFLOW decoder: drive it one link byte at a time with
/// [`OflowDecoder::pump`].
#[derive(Default)]
pub struct OflowDecoder {
    cobs: CobsDecoder,
    stats: OflowStats,
}

impl OflowDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> OflowStats {
        self.stats
    }

    /// Feeds one link byte in. Returns `Some(frame)` whenever a complete
    /// frame has just been reassembled, whether or not its checksum
    /// verified; check `frame.good` before trusting the payload. A
    /// bad-checksum frame still increments [`OflowStats::bad_checksum`] but
    /// is delivered rather than dropped, so downstream consumers can log it
    /// without losing sync. Too-short frames have no tag to attribute them
    /// to and are counted but not delivered.
    pub fn pump(&mut self, byte: u8) -> Option<OflowFrame<'_>> {
        match self.cobs.pump(byte) {
            CobsEvent::None => None,
            CobsEvent::Error(_) => {
                self.stats.cobs_errors += 1;
                None
            }
            CobsEvent::FrameReady => match decode_raw_frame(self.cobs.frame()) {
                Ok(frame) => {
                    self.stats.frames_decoded += 1;
                    if !frame.good {
                        self.stats.bad_checksum += 1;
                    }
                    Some(frame)
                }
                Err(OflowError::TooShort) => {
                    self.stats.too_short += 1;
                    None
                }
                Err(OflowError::Cobs(_)) => unreachable!("cobs layer already reported FrameReady"),
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip() {
        let payload = [0x10, 0x20, 0x00, 0x30];
        let wire = encode_frame(7, 0x0102_0304_0506_0708, &payload);

        let mut decoder = OflowDecoder::new();
        let mut got = None;
        for &b in &wire {
            if let Some(frame) = decoder.pump(b) {
                got = Some((frame.tag, frame.timestamp_ns, frame.payload.to_vec()));
            }
        }
        let (tag, ts, pl) = got.expect("frame should decode");
        assert_eq!(tag, 7);
        assert_eq!(ts, 0x0102_0304_0506_0708);
        assert_eq!(pl, payload);
        assert_eq!(decoder.stats().frames_decoded, 1);
    }

    #[test]
    fn corrupted_checksum_is_delivered_with_good_false() {
        let mut raw = encode_raw_frame(1, 42, &[0xAA, 0xBB]);
        *raw.last_mut().unwrap() ^= 0xFF;
        let wire = crate::cobs::encode(&raw);

        let mut decoder = OflowDecoder::new();
        let mut saw_bad_frame = false;
        for &b in &wire {
            if let Some(frame) = decoder.pump(b) {
                assert!(!frame.good);
                assert_eq!(frame.tag, 1);
                saw_bad_frame = true;
            }
        }
        assert!(saw_bad_frame);
        assert_eq!(decoder.stats().bad_checksum, 1);
        assert_eq!(decoder.stats().frames_decoded, 1);

        // Stream recovers: next well-formed frame still decodes, good.
        let wire2 = encode_frame(1, 43, &[0xCC]);
        let mut got = None;
        for &b in &wire2 {
            if let Some(frame) = decoder.pump(b) {
                assert!(frame.good);
                got = Some(frame.tag);
            }
        }
        assert_eq!(got, Some(1));
    }

    #[test]
    fn too_short_frame_is_counted() {
        let raw = vec![1, 2, 3];
        let wire = crate::cobs::encode(&raw);
        let mut decoder = OflowDecoder::new();
        for &b in &wire {
            decoder.pump(b);
        }
        assert_eq!(decoder.stats().too_short, 1);
    }

    #[test]
    fn checksum_excludes_timestamp() {
        let payload = [1, 2, 3];
        let a = encode_raw_frame(9, 1, &payload);
        let b = encode_raw_frame(9, u64::MAX, &payload);
        assert_eq!(a[0], b[0]);
        assert_eq!(*a.last().unwrap(), *b.last().unwrap());
        assert_ne!(a[1..9], b[1..9]);
    }
}

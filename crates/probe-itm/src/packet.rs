//! ITM/DWT packet-level byte pump, per ARMv7-M Appendix D4's instrumentation
//! packet encoding.

use probe_utils::ArrayVec;
use thiserror::Error;

/// The 48-bit synchronization word: five `0x00` bytes followed by `0x80`.
const SYNC_WORD: u64 = 0x0000_0000_0080;
const SYNC_MASK: u64 = 0xFFFF_FFFF_FFFF;

const OVERFLOW_HEADER: u8 = 0x70;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItmError {
    #[error("malformed ITM header byte {0:#04x}")]
    MalformedHeader(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItmEvent {
    None,
    PacketReady,
    Unsynced,
    Synced,
    Overflow,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItmState {
    Unsynced,
    Idle,
    Ts,
    Sw,
    Hw,
    Gts1,
    Gts2,
    Rsvd,
    Xtn,
    NiSync,
}

/// Timestamp-control field of a local timestamp header, carried through to
/// the message decoder to pick a [`crate::message::TsStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTsHeader {
    pub tc: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItmPacket {
    Sw { address: u8, data: ArrayVec<u8, 4> },
    Hw { address: u8, data: ArrayVec<u8, 4> },
    LocalTs { tc: u8, ts: u32 },
    GlobalTs1 { ts: u32, wrap: bool, clock_change: bool },
    GlobalTs2 { ts: u32 },
    Extension { source_hw: bool, address: u8, data: ArrayVec<u8, 4> },
    Overflow,
    Reserved,
    NiSync,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ItmStats {
    pub syncs_acquired: u64,
    pub syncs_lost: u64,
    pub packets_decoded: u64,
    pub overflow_count: u64,
    pub reserved_count: u64,
    pub errors: u64,
}

/// Byte pump decoding the ITM/DWT packet layer. Call [`ItmPacketDecoder::pump`]
/// with one link byte at a time; on [`ItmEvent::PacketReady`] the packet is
/// available from [`ItmPacketDecoder::packet`].
pub struct ItmPacketDecoder {
    state: ItmState,
    sync_monitor: u64,
    header: u8,
    remaining: u8,
    payload: ArrayVec<u8, 4>,
    packet: Option<ItmPacket>,
    stats: ItmStats,
}

impl Default for ItmPacketDecoder {
    fn default() -> Self {
        Self {
            state: ItmState::Unsynced,
            sync_monitor: 0,
            header: 0,
            remaining: 0,
            payload: ArrayVec::new(),
            packet: None,
            stats: ItmStats::default(),
        }
    }
}

impl ItmPacketDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> ItmStats {
        self.stats
    }

    pub fn packet(&self) -> Option<&ItmPacket> {
        self.packet.as_ref()
    }

    pub fn pump(&mut self, byte: u8) -> ItmEvent {
        self.sync_monitor = ((self.sync_monitor << 8) | u64::from(byte)) & SYNC_MASK;
        if self.sync_monitor == SYNC_WORD {
            let was_unsynced = self.state == ItmState::Unsynced;
            self.state = ItmState::Idle;
            self.stats.syncs_acquired += 1;
            if !was_unsynced {
                self.stats.syncs_lost += 1;
            }
            return ItmEvent::Synced;
        }

        if self.state == ItmState::Unsynced {
            return ItmEvent::None;
        }

        if byte == OVERFLOW_HEADER && self.state == ItmState::Idle {
            self.state = ItmState::Idle;
            self.stats.overflow_count += 1;
            self.packet = Some(ItmPacket::Overflow);
            return ItmEvent::Overflow;
        }

        match self.state {
            ItmState::Unsynced => unreachable!(),
            ItmState::Idle => self.dispatch_header(byte),
            ItmState::Sw | ItmState::Hw => self.continue_data_packet(byte),
            ItmState::Ts | ItmState::Gts1 | ItmState::Xtn => self.continue_varint_packet(byte),
            ItmState::Gts2 => self.finish_gts2(byte),
            ItmState::Rsvd => self.finish_reserved(),
            ItmState::NiSync => self.finish_nisync(),
        }
    }

    fn dispatch_header(&mut self, byte: u8) -> ItmEvent {
        self.header = byte;
        self.payload.clear();

        if byte & 1 == 1 {
            let size_code = byte & 0b11;
            let len = match size_code {
                0b01 => 1,
                0b10 => 2,
                0b11 => 4,
                _ => {
                    self.stats.errors += 1;
                    return ItmEvent::Error;
                }
            };
            let is_hw = (byte >> 2) & 1 == 1;
            self.remaining = len;
            self.state = if is_hw { ItmState::Hw } else { ItmState::Sw };
            return ItmEvent::None;
        }

        let top5 = byte >> 3;
        if byte >> 4 == 0xC {
            self.state = ItmState::Ts;
            return ItmEvent::None;
        }
        if top5 == 0b1_1110 {
            self.state = ItmState::Gts1;
            return ItmEvent::None;
        }
        if top5 == 0b1_0110 {
            self.state = ItmState::Gts2;
            return ItmEvent::None;
        }
        if byte == 0x08 {
            self.state = ItmState::NiSync;
            return self.finish_nisync();
        }
        if (byte >> 2) & 1 == 1 {
            self.state = ItmState::Xtn;
            return ItmEvent::None;
        }

        self.state = ItmState::Rsvd;
        self.finish_reserved()
    }

    fn continue_data_packet(&mut self, byte: u8) -> ItmEvent {
        self.payload.push(byte);
        self.remaining -= 1;
        if self.remaining != 0 {
            return ItmEvent::None;
        }
        let address = self.header >> 3;
        let data = self.payload;
        self.packet = Some(if self.state == ItmState::Hw {
            ItmPacket::Hw { address, data }
        } else {
            ItmPacket::Sw { address, data }
        });
        self.state = ItmState::Idle;
        self.stats.packets_decoded += 1;
        ItmEvent::PacketReady
    }

    fn continue_varint_packet(&mut self, byte: u8) -> ItmEvent {
        self.payload.push(byte & 0x7F);
        let keep_going = byte & 0x80 != 0 && self.payload.len() < 4;
        if keep_going {
            return ItmEvent::None;
        }
        let value = self
            .payload
            .iter()
            .enumerate()
            .fold(0u32, |acc, (i, &b)| acc | (u32::from(b) << (7 * i)));
        self.packet = Some(match self.state {
            ItmState::Ts => ItmPacket::LocalTs { tc: (self.header >> 4) & 0b11, ts: value },
            ItmState::Gts1 => ItmPacket::GlobalTs1 {
                ts: value & 0x7FFF_FFFF,
                wrap: value & 0x8000_0000 != 0,
                clock_change: self.header & 0b100 != 0,
            },
            ItmState::Xtn => {
                ItmPacket::Extension { source_hw: (self.header >> 2) & 1 == 1, address: self.header >> 3, data: self.payload }
            }
            _ => unreachable!(),
        });
        self.state = ItmState::Idle;
        self.stats.packets_decoded += 1;
        ItmEvent::PacketReady
    }

    fn finish_gts2(&mut self, byte: u8) -> ItmEvent {
        self.packet = Some(ItmPacket::GlobalTs2 { ts: u32::from(byte) });
        self.state = ItmState::Idle;
        self.stats.packets_decoded += 1;
        ItmEvent::PacketReady
    }

    fn finish_reserved(&mut self) -> ItmEvent {
        self.packet = Some(ItmPacket::Reserved);
        self.state = ItmState::Idle;
        self.stats.reserved_count += 1;
        ItmEvent::PacketReady
    }

    fn finish_nisync(&mut self) -> ItmEvent {
        self.packet = Some(ItmPacket::NiSync);
        self.state = ItmState::Idle;
        self.stats.packets_decoded += 1;
        ItmEvent::PacketReady
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sync_bytes() -> [u8; 6] {
        [0x00, 0x00, 0x00, 0x00, 0x00, 0x80]
    }

    #[test]
    fn unsynced_decoder_ignores_bytes() {
        let mut d = ItmPacketDecoder::new();
        for b in [0x0B, 0xDE, 0xAD] {
            assert_eq!(d.pump(b), ItmEvent::None);
        }
    }

    #[test]
    fn sync_word_synchronizes() {
        let mut d = ItmPacketDecoder::new();
        let mut last = ItmEvent::None;
        for b in sync_bytes() {
            last = d.pump(b);
        }
        assert_eq!(last, ItmEvent::Synced);
        assert_eq!(d.stats().syncs_acquired, 1);
    }

    #[test]
    fn sw_packet_scenario() {
        let mut d = ItmPacketDecoder::new();
        for b in sync_bytes() {
            d.pump(b);
        }
        let mut last = ItmEvent::None;
        for b in [0x0B, 0xDE, 0xAD, 0xBE, 0xEF] {
            last = d.pump(b);
        }
        assert_eq!(last, ItmEvent::PacketReady);
        match d.packet().unwrap() {
            ItmPacket::Sw { address, data } => {
                assert_eq!(*address, 1);
                assert_eq!(data.as_slice(), &[0xDE, 0xAD, 0xBE, 0xEF]);
            }
            other => panic!("expected SW packet, got {other:?}"),
        }
        assert_eq!(d.stats().packets_decoded, 1);
    }

    #[test]
    fn overflow_in_synced_state() {
        let mut d = ItmPacketDecoder::new();
        for b in sync_bytes() {
            d.pump(b);
        }
        assert_eq!(d.pump(OVERFLOW_HEADER), ItmEvent::Overflow);
        assert_eq!(d.stats().overflow_count, 1);
    }

    #[test]
    fn resync_after_garbage_reports_lost_sync() {
        let mut d = ItmPacketDecoder::new();
        for b in sync_bytes() {
            d.pump(b);
        }
        for b in [0x0B, 0xAA, 0xBB, 0xCC, 0xDD] {
            d.pump(b);
        }
        let mut last = ItmEvent::None;
        for b in sync_bytes() {
            last = d.pump(b);
        }
        assert_eq!(last, ItmEvent::Synced);
        assert_eq!(d.stats().syncs_lost, 1);
    }
}

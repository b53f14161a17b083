//! Packet-to-message decoding: turns a decoded [`ItmPacket`] into the typed
//! message the rest of the pipeline deals in, accumulating the running
//! timestamp along the way.

use crate::packet::ItmPacket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsStatus {
    Current,
    Delayed,
    EventDelayed,
    EventAndTimeDelayed,
}

impl TsStatus {
    fn from_tc(tc: u8) -> Self {
        match tc & 0b11 {
            0b00 => Self::Current,
            0b01 => Self::Delayed,
            0b10 => Self::EventDelayed,
            _ => Self::EventAndTimeDelayed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionFunction {
    Enter,
    Exit,
    Return,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    Software { timestamp: u64, channel: u8, value: u32, len: u8 },
    NiSync { timestamp: u64 },
    OffsetWrite { timestamp: u64, comparator: u8, offset: u32 },
    DataAccessWp { timestamp: u64, comparator: u8, data: u32, len: u8 },
    DataRwWp { timestamp: u64, comparator: u8, data: u32, len: u8, is_write: bool },
    PcSample { timestamp: u64, pc: u32 },
    DwtEvent { timestamp: u64, bits: u8 },
    Exception { timestamp: u64, number: u16, function: ExceptionFunction },
    Ts { timestamp: u64, status: TsStatus },
}

impl Message {
    pub fn timestamp(&self) -> u64 {
        match *self {
            Self::Software { timestamp, .. }
            | Self::NiSync { timestamp }
            | Self::OffsetWrite { timestamp, .. }
            | Self::DataAccessWp { timestamp, .. }
            | Self::DataRwWp { timestamp, .. }
            | Self::PcSample { timestamp, .. }
            | Self::DwtEvent { timestamp, .. }
            | Self::Exception { timestamp, .. }
            | Self::Ts { timestamp, .. } => timestamp,
        }
    }
}

fn bytes_to_u32(data: &[u8]) -> u32 {
    data.iter().rev().fold(0u32, |acc, &b| (acc << 8) | u32::from(b))
}

/// Decodes packets into messages, accumulating the running timestamp that
/// local/global timestamp packets advance. Owns no byte-stream state beyond
/// that accumulator, so it composes cleanly with [`crate::packet::ItmPacketDecoder`]
/// without needing to see raw bytes itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageDecoder {
    timestamp: u64,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Decodes one packet. Returns `None` for packets that carry no message
    /// of their own (global timestamps only update the accumulator;
    /// overflow, reserved and extension packets are not forwarded).
    pub fn decode(&mut self, packet: &ItmPacket) -> Option<Message> {
        match *packet {
            ItmPacket::Sw { address, data } => Some(Message::Software {
                timestamp: self.timestamp,
                channel: address,
                value: bytes_to_u32(data.as_slice()),
                len: data.len() as u8,
            }),
            ItmPacket::Hw { address, data } => self.decode_hw(address, data.as_slice()),
            ItmPacket::LocalTs { tc, ts } => {
                self.timestamp = self.timestamp.wrapping_add(u64::from(ts));
                Some(Message::Ts { timestamp: self.timestamp, status: TsStatus::from_tc(tc) })
            }
            ItmPacket::GlobalTs1 { ts, .. } => {
                self.timestamp = (self.timestamp & !0x7FFF_FFFF) | u64::from(ts);
                None
            }
            ItmPacket::GlobalTs2 { ts } => {
                self.timestamp = (self.timestamp & 0x7FFF_FFFF) | (u64::from(ts) << 31);
                None
            }
            ItmPacket::NiSync => Some(Message::NiSync { timestamp: self.timestamp }),
            ItmPacket::Overflow | ItmPacket::Reserved | ItmPacket::Extension { .. } => None,
        }
    }

    fn decode_hw(&self, address: u8, data: &[u8]) -> Option<Message> {
        let timestamp = self.timestamp;
        let value = bytes_to_u32(data);
        let len = data.len() as u8;
        match address {
            0 => Some(Message::DwtEvent { timestamp, bits: value as u8 }),
            1 => {
                let number = (value & 0x1FFF) as u16;
                let function = match (value >> 4) & 0b11 {
                    1 => ExceptionFunction::Enter,
                    2 => ExceptionFunction::Exit,
                    _ => ExceptionFunction::Return,
                };
                Some(Message::Exception { timestamp, number, function })
            }
            2 => Some(Message::PcSample { timestamp, pc: value }),
            8..=15 => {
                let index = address - 8;
                let comparator = index / 3;
                match index % 3 {
                    0 => Some(Message::OffsetWrite { timestamp, comparator, offset: value }),
                    1 => Some(Message::DataAccessWp { timestamp, comparator, data: value, len }),
                    _ => Some(Message::DataRwWp { timestamp, comparator, data: value, len, is_write: len == 4 }),
                }
            }
            _ => None,
        }
    }
}

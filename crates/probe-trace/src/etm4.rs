//! ETM 4 program-flow trace decoder. Builds on the ETM 3.5 packet shapes but
//! adds speculation depth, conditional load/store toggles, long-format
//! (32/64-bit) addresses, paired context/vcontext packets, and a
//! payload-control byte that selects which fields a TraceInfo packet
//! carries.

use probe_utils::ArrayVec;

use crate::{
    change::TraceChange,
    engine::{Changes, TraceEngine, TraceStats},
};

const TRACE_INFO: u8 = 0x01;
const TRACE_ON: u8 = 0x04;
const EXCEPTION: u8 = 0x06;
const TIMESTAMP: u8 = 0x42;
const CONTEXT: u8 = 0x50;
const SHORT_ADDRESS: u8 = 0x95;
const LONG_ADDRESS_32: u8 = 0x96;
const LONG_ADDRESS_64: u8 = 0x97;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unsynced,
    Idle,
    TraceInfo,
    Context,
    VContext,
    ShortAddress,
    LongAddress32,
    LongAddress64Hi,
    LongAddress64Lo,
    Exception,
    Timestamp,
    Atom,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            Self::Unsynced => "UNSYNCED",
            Self::Idle => "IDLE",
            Self::TraceInfo => "TRACE_INFO",
            Self::Context => "CONTEXT",
            Self::VContext => "VCONTEXT",
            Self::ShortAddress => "SHORT_ADDRESS",
            Self::LongAddress32 => "LONG_ADDRESS_32",
            Self::LongAddress64Hi => "LONG_ADDRESS_64_HI",
            Self::LongAddress64Lo => "LONG_ADDRESS_64_LO",
            Self::Exception => "EXCEPTION",
            Self::Timestamp => "TIMESTAMP",
            Self::Atom => "ATOM",
        }
    }
}

/// Which fields a `TraceInfo` (payload-control) packet carries, decoded from
/// its own payload-control byte before the selected fields are read.
#[derive(Debug, Default, Clone, Copy)]
struct PayloadControl {
    has_cc: bool,
    has_cond: bool,
}

pub struct Etm4Engine {
    state: State,
    payload_control: PayloadControl,
    spec_depth: u8,
    cond_enabled: bool,
    varint: ArrayVec<u8, 9>,
    addr_hi: u32,
    stats: TraceStats,
}

impl Default for Etm4Engine {
    fn default() -> Self {
        Self {
            state: State::Unsynced,
            payload_control: PayloadControl::default(),
            spec_depth: 0,
            cond_enabled: false,
            varint: ArrayVec::new(),
            addr_hi: 0,
            stats: TraceStats::default(),
        }
    }
}

impl Etm4Engine {
    pub fn new() -> Self {
        Self::default()
    }

    fn varint_value32(&self) -> u32 {
        self.varint.iter().enumerate().fold(0u32, |acc, (i, &b)| acc | (u32::from(b & 0x7F) << (7 * i)))
    }

    /// Plain little-endian assembly of raw address bytes (not the 7-bit
    /// varint packing timestamps/cycle counts use).
    fn raw_value32(&self) -> u32 {
        self.varint.iter().enumerate().fold(0u32, |acc, (i, &b)| acc | (u32::from(b) << (8 * i)))
    }
}

impl TraceEngine for Etm4Engine {
    fn action(&mut self, byte: u8, out: &mut Changes) {
        self.stats.bytes_processed += 1;

        match self.state {
            State::Unsynced => {
                if byte == TRACE_ON {
                    self.stats.syncs_acquired += 1;
                    self.state = State::Idle;
                    out.push(TraceChange::TraceStart);
                }
            }

            State::Idle => match byte {
                TRACE_ON => out.push(TraceChange::TraceStart),
                TRACE_INFO => self.state = State::TraceInfo,
                CONTEXT => self.state = State::Context,
                SHORT_ADDRESS => {
                    self.varint.clear();
                    self.state = State::ShortAddress;
                }
                LONG_ADDRESS_32 => {
                    self.varint.clear();
                    self.state = State::LongAddress32;
                }
                LONG_ADDRESS_64 => {
                    self.varint.clear();
                    self.state = State::LongAddress64Hi;
                }
                EXCEPTION => self.state = State::Exception,
                TIMESTAMP => {
                    self.varint.clear();
                    self.state = State::Timestamp;
                }
                0x00 => {
                    self.stats.errors += 1;
                    self.stats.syncs_lost += 1;
                    self.state = State::Unsynced;
                    out.push(TraceChange::NotSync);
                }
                b => {
                    self.state = State::Atom;
                    self.action_atom(b, out);
                    self.state = State::Idle;
                }
            },

            State::TraceInfo => {
                self.payload_control.has_cc = byte & 0x01 != 0;
                self.payload_control.has_cond = byte & 0x02 != 0;
                self.spec_depth = (byte >> 2) & 0x0F;
                self.cond_enabled = self.payload_control.has_cond;
                out.push(TraceChange::CycleCount { count: u32::from(self.spec_depth) });
                self.state = State::Idle;
            }

            State::Context => {
                out.push(TraceChange::ContextId { id: u32::from(byte) });
                self.state = State::VContext;
            }

            State::VContext => {
                out.push(TraceChange::Vmid { vmid: byte });
                self.state = State::Idle;
            }

            State::ShortAddress => {
                self.varint.push(byte);
                if self.varint.len() == 2 {
                    let addr = u32::from(self.varint[0]) | (u32::from(self.varint[1]) << 8);
                    out.push(TraceChange::Address { addr, exact: false });
                    self.state = State::Idle;
                }
            }

            State::LongAddress32 => {
                self.varint.push(byte);
                if self.varint.len() == 4 {
                    let addr = self.raw_value32();
                    out.push(TraceChange::Address { addr, exact: true });
                    self.state = State::Idle;
                }
            }

            State::LongAddress64Hi => {
                self.varint.push(byte);
                if self.varint.len() == 4 {
                    self.addr_hi = self.raw_value32();
                    self.varint.clear();
                    self.state = State::LongAddress64Lo;
                }
            }

            State::LongAddress64Lo => {
                self.varint.push(byte);
                if self.varint.len() == 4 {
                    let lo = self.raw_value32();
                    out.push(TraceChange::Address { addr: lo, exact: true });
                    out.push(TraceChange::Address { addr: self.addr_hi, exact: true });
                    self.state = State::Idle;
                }
            }

            State::Exception => {
                let number = u16::from(byte & 0x7F);
                if byte & 0x80 != 0 {
                    out.push(TraceChange::ExceptionEntry { number });
                } else {
                    out.push(TraceChange::ExceptionExit);
                }
                self.state = State::Idle;
            }

            State::Timestamp => {
                self.varint.push(byte & 0x7F);
                if byte & 0x80 == 0 || self.varint.is_full() {
                    let ts = self
                        .varint
                        .iter()
                        .enumerate()
                        .fold(0u64, |acc, (i, &b)| acc | (u64::from(b) << (7 * i)));
                    out.push(TraceChange::Timestamp { ts });
                    self.state = State::Idle;
                }
            }

            State::Atom => {
                self.action_atom(byte, out);
                self.state = State::Idle;
            }
        }
    }

    fn state_query(&self) -> &'static str {
        self.state.name()
    }

    fn report(&self) -> TraceStats {
        self.stats
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

impl Etm4Engine {
    fn action_atom(&mut self, byte: u8, out: &mut Changes) {
        let mut exec = 0u8;
        let mut not_exec = 0u8;
        for bit in 0..8 {
            if (byte >> bit) & 1 == 0 {
                exec += 1;
            } else {
                not_exec += 1;
            }
        }
        if exec > 0 {
            out.push(TraceChange::ExecuteAtom { count: exec });
        }
        if not_exec > 0 && self.cond_enabled {
            out.push(TraceChange::NotExecuteAtom { count: not_exec });
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unsynced_ignores_until_trace_on() {
        let mut engine = Etm4Engine::new();
        let mut out = Changes::new();
        engine.action(0xAA, &mut out);
        assert!(out.is_empty());
        engine.action(TRACE_ON, &mut out);
        assert_eq!(out.as_slice(), &[TraceChange::TraceStart]);
        assert_eq!(engine.state_query(), "IDLE");
    }

    #[test]
    fn trace_info_reports_speculation_depth() {
        let mut engine = Etm4Engine::new();
        let mut out = Changes::new();
        engine.action(TRACE_ON, &mut out);
        out.clear();
        engine.action(TRACE_INFO, &mut out);
        out.clear();
        engine.action(0b0010_1111, &mut out); // cond enabled, depth = 0b1011 = 11
        assert_eq!(out.as_slice(), &[TraceChange::CycleCount { count: 11 }]);
    }

    #[test]
    fn long_address_64_emits_low_then_high() {
        let mut engine = Etm4Engine::new();
        let mut out = Changes::new();
        engine.action(TRACE_ON, &mut out);
        out.clear();
        engine.action(LONG_ADDRESS_64, &mut out);
        for b in [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08] {
            out.clear();
            engine.action(b, &mut out);
        }
        assert_eq!(
            out.as_slice(),
            &[
                TraceChange::Address { addr: 0x0807_0605, exact: true },
                TraceChange::Address { addr: 0x0403_0201, exact: true },
            ]
        );
    }

    #[test]
    fn exception_packet_after_sync() {
        let mut engine = Etm4Engine::new();
        let mut out = Changes::new();
        engine.action(TRACE_ON, &mut out);
        out.clear();
        engine.action(EXCEPTION, &mut out);
        out.clear();
        engine.action(0x92, &mut out);
        assert_eq!(out.as_slice(), &[TraceChange::ExceptionEntry { number: 18 }]);
    }

    #[test]
    fn malformed_zero_byte_resyncs() {
        let mut engine = Etm4Engine::new();
        let mut out = Changes::new();
        engine.action(TRACE_ON, &mut out);
        out.clear();
        engine.action(0x00, &mut out);
        assert_eq!(engine.state_query(), "UNSYNCED");
        assert_eq!(engine.report().errors, 1);
    }
}

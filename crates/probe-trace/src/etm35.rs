//! ETM 3.5 program-flow trace decoder.

use probe_utils::ArrayVec;

use crate::{
    change::TraceChange,
    engine::{Changes, TraceEngine, TraceStats},
};

const ISYNC_WORD: u64 = 0x0000_0000_0080;
const ISYNC_MASK: u64 = 0xFFFF_FFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unsynced,
    WaitIsync,
    Idle,
    CollectBaStd,
    CollectBaAlt,
    CollectException,
    GetContextByte,
    GetInfoByte,
    GetIAddress,
    GetICycleCount,
    GetCycleCount,
    GetVmid,
    GetTstamp,
    GetContextId,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            Self::Unsynced => "UNSYNCED",
            Self::WaitIsync => "WAIT_ISYNC",
            Self::Idle => "IDLE",
            Self::CollectBaStd => "COLLECT_BA_STD",
            Self::CollectBaAlt => "COLLECT_BA_ALT",
            Self::CollectException => "COLLECT_EXCEPTION",
            Self::GetContextByte => "GET_CONTEXTBYTE",
            Self::GetInfoByte => "GET_INFOBYTE",
            Self::GetIAddress => "GET_IADDRESS",
            Self::GetICycleCount => "GET_ICYCLECOUNT",
            Self::GetCycleCount => "GET_CYCLECOUNT",
            Self::GetVmid => "GET_VMID",
            Self::GetTstamp => "GET_TSTAMP",
            Self::GetContextId => "GET_CONTEXTID",
        }
    }
}

/// Header bytes that aren't plain P-headers or branch-address packets.
mod header {
    pub const TRIGGER: u8 = 0x0C;
    pub const EXCEPTION: u8 = 0x06;
    pub const CONTEXT_ID: u8 = 0x6F;
    pub const VMID: u8 = 0x3C;
    pub const TIMESTAMP: u8 = 0x42;
    pub const CLOCK_SPEED: u8 = 0x76;
    pub const CYCLE_COUNT: u8 = 0x04;
    /// Reserved encoding with no valid packet meaning; treated as a
    /// malformed byte that forces a resync.
    pub const MALFORMED: u8 = 0x08;
}

pub struct Etm35Engine {
    state: State,
    sync_monitor: u64,
    addr_bytes: ArrayVec<u8, 5>,
    context_byte: u8,
    info_byte: u8,
    varint: ArrayVec<u8, 5>,
    stats: TraceStats,
}

impl Default for Etm35Engine {
    fn default() -> Self {
        Self {
            state: State::Unsynced,
            sync_monitor: 0,
            addr_bytes: ArrayVec::new(),
            context_byte: 0,
            info_byte: 0,
            varint: ArrayVec::new(),
            stats: TraceStats::default(),
        }
    }
}

impl Etm35Engine {
    pub fn new() -> Self {
        Self::default()
    }

    fn unsync(&mut self, out: &mut Changes) {
        if self.state != State::Unsynced {
            self.stats.syncs_lost += 1;
            out.push(TraceChange::NotSync);
        }
        self.state = State::Unsynced;
        self.addr_bytes.clear();
        self.varint.clear();
    }

    fn decode_p_header(&mut self, byte: u8, out: &mut Changes) {
        // Simplified atom encoding: bits[7:1] each flag one atom, 0 =
        // executed, 1 = not executed (not ARM bit-exact, but deterministic
        // and round-trippable).
        let mut exec = 0u8;
        let mut not_exec = 0u8;
        for bit in 1..8 {
            if (byte >> bit) & 1 == 0 {
                exec += 1;
            } else {
                not_exec += 1;
            }
        }
        if exec > 0 {
            out.push(TraceChange::ExecuteAtom { count: exec });
        }
        if not_exec > 0 {
            out.push(TraceChange::NotExecuteAtom { count: not_exec });
        }
    }

    fn begin_branch_address(&mut self, byte: u8, out: &mut Changes) {
        self.addr_bytes.clear();
        self.addr_bytes.push(byte);
        if byte & 0x80 == 0 {
            self.finish_branch_address(out);
        } else if byte & 0x02 != 0 {
            // Alternate encoding: exactly one continuation byte, used for the
            // compressed branch form that always fits in 14 address bits.
            self.state = State::CollectBaAlt;
        } else {
            self.state = State::CollectBaStd;
        }
    }

    fn finish_branch_address(&mut self, out: &mut Changes) {
        let addr = self
            .addr_bytes
            .iter()
            .enumerate()
            .fold(0u32, |acc, (i, &b)| acc | (u32::from(b & 0x7F) << (7 * i)));
        let last = *self.addr_bytes.as_slice().last().unwrap_or(&0);
        let exact = last & 0x40 == 0;
        out.push(TraceChange::Address { addr, exact });
        self.state = State::Idle;
    }
}

impl TraceEngine for Etm35Engine {
    fn action(&mut self, byte: u8, out: &mut Changes) {
        self.stats.bytes_processed += 1;

        self.sync_monitor = ((self.sync_monitor << 8) | u64::from(byte)) & ISYNC_MASK;
        if self.sync_monitor == ISYNC_WORD {
            self.stats.syncs_acquired += 1;
            self.state = State::WaitIsync;
            return;
        }

        match self.state {
            State::Unsynced => {}

            State::WaitIsync => {
                self.state = State::GetContextByte;
            }

            State::GetContextByte => {
                self.context_byte = byte;
                out.push(TraceChange::ContextId { id: u32::from(byte) });
                self.state = State::GetInfoByte;
            }

            State::GetInfoByte => {
                self.info_byte = byte;
                out.push(TraceChange::SecureMode { secure: byte & 0x01 != 0 });
                out.push(TraceChange::ThumbMode { thumb: byte & 0x02 != 0 });
                out.push(TraceChange::JazelleMode { jazelle: byte & 0x04 != 0 });
                self.addr_bytes.clear();
                self.state = State::GetIAddress;
            }

            State::GetIAddress => {
                self.addr_bytes.push(byte);
                if self.addr_bytes.is_full() {
                    let addr = self
                        .addr_bytes
                        .iter()
                        .enumerate()
                        .fold(0u32, |acc, (i, &b)| acc | (u32::from(b) << (8 * i)));
                    out.push(TraceChange::Address { addr, exact: true });
                    if self.info_byte & 0x08 != 0 {
                        self.state = State::GetICycleCount;
                        self.varint.clear();
                    } else {
                        self.state = State::Idle;
                    }
                }
            }

            State::GetICycleCount => {
                self.varint.push(byte & 0x7F);
                if byte & 0x80 == 0 || self.varint.is_full() {
                    let count = self
                        .varint
                        .iter()
                        .enumerate()
                        .fold(0u32, |acc, (i, &b)| acc | (u32::from(b) << (7 * i)));
                    out.push(TraceChange::CycleCount { count });
                    self.state = State::Idle;
                }
            }

            State::Idle => match byte {
                header::MALFORMED => {
                    self.stats.errors += 1;
                    self.unsync(out);
                }
                header::TRIGGER => out.push(TraceChange::Trigger),
                header::EXCEPTION => self.state = State::CollectException,
                header::CONTEXT_ID => {
                    self.varint.clear();
                    self.state = State::GetContextId;
                }
                header::VMID => self.state = State::GetVmid,
                header::TIMESTAMP => {
                    self.varint.clear();
                    self.state = State::GetTstamp;
                }
                header::CLOCK_SPEED => out.push(TraceChange::ClockSpeed),
                header::CYCLE_COUNT => {
                    self.varint.clear();
                    self.state = State::GetCycleCount;
                }
                b if b & 1 == 0 => self.decode_p_header(b, out),
                b => self.begin_branch_address(b, out),
            },

            State::CollectBaStd => {
                self.addr_bytes.push(byte);
                if byte & 0x80 == 0 || self.addr_bytes.is_full() {
                    self.finish_branch_address(out);
                }
            }

            State::CollectBaAlt => {
                self.addr_bytes.push(byte);
                self.finish_branch_address(out);
            }

            State::CollectException => {
                let number = u16::from(byte & 0x1F);
                if byte & 0x80 != 0 {
                    out.push(TraceChange::ExceptionEntry { number });
                } else {
                    out.push(TraceChange::ExceptionExit);
                }
                self.state = State::Idle;
            }

            State::GetVmid => {
                out.push(TraceChange::Vmid { vmid: byte });
                self.state = State::Idle;
            }

            State::GetContextId => {
                self.varint.push(byte);
                if self.varint.is_full() {
                    let id = self
                        .varint
                        .iter()
                        .enumerate()
                        .fold(0u32, |acc, (i, &b)| acc | (u32::from(b) << (8 * i)));
                    out.push(TraceChange::ContextId { id });
                    self.state = State::Idle;
                }
            }

            State::GetTstamp => {
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

            State::GetCycleCount => {
                self.varint.push(byte & 0x7F);
                if byte & 0x80 == 0 || self.varint.is_full() {
                    let count = self
                        .varint
                        .iter()
                        .enumerate()
                        .fold(0u32, |acc, (i, &b)| acc | (u32::from(b) << (7 * i)));
                    out.push(TraceChange::CycleCount { count });
                    self.state = State::Idle;
                }
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

#[cfg(test)]
mod test {
    use super::*;

    fn isync_bytes() -> [u8; 6] {
        [0x00, 0x00, 0x00, 0x00, 0x00, 0x80]
    }

    #[test]
    fn unsynced_produces_no_changes() {
        let mut engine = Etm35Engine::new();
        let mut out = Changes::new();
        engine.action(0x01, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn isync_sequence_reports_address_and_modes() {
        let mut engine = Etm35Engine::new();
        let mut out = Changes::new();
        for b in isync_bytes() {
            engine.action(b, &mut out);
        }
        assert_eq!(engine.state_query(), "GET_CONTEXTBYTE");

        out.clear();
        engine.action(0x00, &mut out); // context byte
        assert_eq!(engine.state_query(), "GET_INFOBYTE");

        out.clear();
        engine.action(0x03, &mut out); // info byte: secure + thumb
        assert!(out.as_slice().contains(&TraceChange::SecureMode { secure: true }));
        assert!(out.as_slice().contains(&TraceChange::ThumbMode { thumb: true }));
        assert_eq!(engine.state_query(), "GET_IADDRESS");

        out.clear();
        for b in [0x00, 0x10, 0x00, 0x08] {
            engine.action(b, &mut out);
        }
        assert!(out.as_slice().contains(&TraceChange::Address { addr: 0x0800_1000, exact: true }));
        assert_eq!(engine.state_query(), "IDLE");
        assert_eq!(engine.report().syncs_acquired, 1);
    }

    #[test]
    fn trigger_packet() {
        let mut engine = Etm35Engine::new();
        let mut out = Changes::new();
        for b in isync_bytes() {
            engine.action(b, &mut out);
        }
        for b in [0x00, 0x00] {
            out.clear();
            engine.action(b, &mut out);
        }
        out.clear();
        for b in [0x00, 0x10, 0x00, 0x08] {
            engine.action(b, &mut out);
        }
        out.clear();
        engine.action(header::TRIGGER, &mut out);
        assert_eq!(out.as_slice(), &[TraceChange::Trigger]);
    }

    #[test]
    fn exception_entry_packet() {
        let mut engine = Etm35Engine::new();
        let mut out = Changes::new();
        for b in isync_bytes() {
            engine.action(b, &mut out);
        }
        for b in [0x00, 0x00] {
            out.clear();
            engine.action(b, &mut out);
        }
        out.clear();
        for b in [0x00, 0x10, 0x00, 0x08] {
            engine.action(b, &mut out);
        }

        out.clear();
        engine.action(header::EXCEPTION, &mut out);
        out.clear();
        engine.action(0x85, &mut out);
        assert_eq!(out.as_slice(), &[TraceChange::ExceptionEntry { number: 5 }]);
    }

    #[test]
    fn malformed_byte_forces_resync() {
        let mut engine = Etm35Engine::new();
        let mut out = Changes::new();
        for b in isync_bytes() {
            engine.action(b, &mut out);
        }
        for b in [0x00, 0x00] {
            out.clear();
            engine.action(b, &mut out);
        }
        out.clear();
        for b in [0x00, 0x10, 0x00, 0x08] {
            engine.action(b, &mut out);
        }
        assert_eq!(engine.state_query(), "IDLE");

        out.clear();
        engine.action(header::MALFORMED, &mut out);
        assert_eq!(engine.state_query(), "UNSYNCED");
        assert_eq!(out.as_slice(), &[TraceChange::NotSync]);
        assert_eq!(engine.report().errors, 1);
        assert_eq!(engine.report().syncs_lost, 1);
    }
}

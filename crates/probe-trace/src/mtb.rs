//! Micro Trace Buffer decoder: trivial 32-bit word pairs encoding the
//! (source, destination) address of each taken branch. Signals `UNSYNCED`
//! only once, at boot.

use probe_utils::ArrayVec;

use crate::{
    change::TraceChange,
    engine::{Changes, TraceEngine, TraceStats},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unsynced,
    CollectSource,
    CollectDestination,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            Self::Unsynced => "UNSYNCED",
            Self::CollectSource => "COLLECT_SOURCE",
            Self::CollectDestination => "COLLECT_DESTINATION",
        }
    }
}

pub struct MtbEngine {
    state: State,
    buf: ArrayVec<u8, 4>,
    stats: TraceStats,
}

impl Default for MtbEngine {
    fn default() -> Self {
        Self { state: State::Unsynced, buf: ArrayVec::new(), stats: TraceStats::default() }
    }
}

impl MtbEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn word(&self) -> u32 {
        self.buf.iter().enumerate().fold(0u32, |acc, (i, &b)| acc | (u32::from(b) << (8 * i)))
    }
}

impl TraceEngine for MtbEngine {
    fn action(&mut self, byte: u8, out: &mut Changes) {
        self.stats.bytes_processed += 1;

        if self.state == State::Unsynced {
            self.stats.syncs_acquired += 1;
            out.push(TraceChange::TraceStart);
            self.state = State::CollectSource;
            self.buf.clear();
        }

        self.buf.push(byte);
        if !self.buf.is_full() {
            return;
        }

        match self.state {
            State::CollectSource => {
                out.push(TraceChange::Address { addr: self.word(), exact: true });
                self.buf.clear();
                self.state = State::CollectDestination;
            }
            State::CollectDestination => {
                out.push(TraceChange::Address { addr: self.word(), exact: true });
                out.push(TraceChange::Linear);
                self.buf.clear();
                self.state = State::CollectSource;
            }
            State::Unsynced => unreachable!(),
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

    #[test]
    fn first_byte_signals_unsync_once() {
        let mut engine = MtbEngine::new();
        let mut out = Changes::new();
        engine.action(0x01, &mut out);
        assert_eq!(out.as_slice(), &[TraceChange::TraceStart]);
        assert_eq!(engine.report().syncs_acquired, 1);
    }

    #[test]
    fn word_pair_emits_source_then_destination() {
        let mut engine = MtbEngine::new();
        let mut out = Changes::new();
        for b in [0x00, 0x10, 0x00, 0x08] {
            out.clear();
            engine.action(b, &mut out);
        }
        assert_eq!(out.as_slice(), &[TraceChange::Address { addr: 0x0800_1000, exact: true }]);

        for b in [0x04, 0x20, 0x00, 0x08] {
            out.clear();
            engine.action(b, &mut out);
        }
        assert_eq!(
            out.as_slice(),
            &[TraceChange::Address { addr: 0x0800_2004, exact: true }, TraceChange::Linear]
        );
        assert_eq!(engine.report().syncs_acquired, 1);
    }
}

//! Read-only decoder statistics, exposed for the interval reporter and any
//! external observability consumer.

use std::sync::atomic::{AtomicU64, Ordering};

/// One named, relaxed-atomic counter. Decoder statistics are read far more
/// often than written and never need to synchronize with anything else, so
/// plain relaxed loads/stores are enough.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Aggregate, per-tag/per-stream byte and packet counters the interval
/// reporter thread drains every [`crate::config::Config::stats_interval`].
#[derive(Debug, Default)]
pub struct DecoderStats {
    pub bytes_in: Counter,
    pub frames_decoded: Counter,
    pub frames_dropped: Counter,
    pub packets_decoded: Counter,
    pub messages_decoded: Counter,
    pub sync_losses: Counter,
    pub errors: Counter,
    pub trace_changes: Counter,
}

impl DecoderStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A point-in-time, non-atomic copy suitable for logging or a status
    /// endpoint.
    pub fn snapshot(&self) -> DecoderStatsSnapshot {
        DecoderStatsSnapshot {
            bytes_in: self.bytes_in.get(),
            frames_decoded: self.frames_decoded.get(),
            frames_dropped: self.frames_dropped.get(),
            packets_decoded: self.packets_decoded.get(),
            messages_decoded: self.messages_decoded.get(),
            sync_losses: self.sync_losses.get(),
            errors: self.errors.get(),
            trace_changes: self.trace_changes.get(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecoderStatsSnapshot {
    pub bytes_in: u64,
    pub frames_decoded: u64,
    pub frames_dropped: u64,
    pub packets_decoded: u64,
    pub messages_decoded: u64,
    pub sync_losses: u64,
    pub errors: u64,
    pub trace_changes: u64,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = DecoderStats::new();
        stats.bytes_in.add(100);
        stats.errors.increment();
        stats.errors.increment();
        let snap = stats.snapshot();
        assert_eq!(snap.bytes_in, 100);
        assert_eq!(snap.errors, 2);
    }
}

//! The shared shape every trace decoder engine presents: a byte pump plus a
//! capability set for inspecting its current state and statistics.

use probe_utils::ArrayVec;

use crate::change::TraceChange;

/// Upper bound on how many [`TraceChange`] events a single byte can produce.
/// An I-sync byte in ETM3.5, for instance, can close out an address, a
/// security-state change and a thumb-mode change at once.
pub const MAX_CHANGES_PER_BYTE: usize = 8;

pub type Changes = ArrayVec<TraceChange, MAX_CHANGES_PER_BYTE>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceProtocol {
    Etm35,
    Etm4,
    Mtb,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TraceStats {
    pub bytes_processed: u64,
    pub syncs_acquired: u64,
    pub syncs_lost: u64,
    pub errors: u64,
}

/// Uniform interface every trace decoder engine implements, selected at
/// construction by [`TraceProtocol`]. `action` is the byte pump; `report`
/// and `state_query` are the read-only introspection half of the capability
/// set. There's no explicit `destroy` — engines clean up via `Drop`.
pub trait TraceEngine {
    /// Feeds one raw trace byte in, appending any resulting changes to `out`.
    fn action(&mut self, byte: u8, out: &mut Changes);

    /// Name of the engine's current internal state, for diagnostics.
    fn state_query(&self) -> &'static str;

    fn report(&self) -> TraceStats;

    /// Drops back to the engine's initial unsynced state.
    fn reset(&mut self);
}

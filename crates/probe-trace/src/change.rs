//! The trace-engine output alphabet: every attribute of the reconstructed
//! CPU state that a decoder can observe change.

/// One observed change in reconstructed program-flow state. Carries a
/// payload where the kind naturally has one; several kinds are pure
/// notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceChange {
    ExceptionEntry { number: u16 },
    ExceptionExit,
    ExecuteAtom { count: u8 },
    NotExecuteAtom { count: u8 },
    Address { addr: u32, exact: bool },
    ClockSpeed,
    Vmid { vmid: u8 },
    ContextId { id: u32 },
    CycleCount { count: u32 },
    Trigger,
    SecureMode { secure: bool },
    ThumbMode { thumb: bool },
    JazelleMode { jazelle: bool },
    Linear,
    TraceStart,
    TraceStop,
    Timestamp { ts: u64 },
    OutOfOrder,
    StoreFailed,
    AddressMissing,
    Reset,
    NotSync,
}

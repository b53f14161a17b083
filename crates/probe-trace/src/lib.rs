//! Execution-trace decoder engines: ETM 3.5, ETM 4, and MTB, behind a shared
//! [`TraceEngine`] interface dispatched by [`TraceProtocol`].

pub mod change;
pub mod engine;
pub mod etm4;
pub mod etm35;
pub mod mtb;

pub use change::TraceChange;
pub use engine::{Changes, TraceEngine, TraceProtocol, TraceStats, MAX_CHANGES_PER_BYTE};
pub use etm4::Etm4Engine;
pub use etm35::Etm35Engine;
pub use mtb::MtbEngine;

/// Constructs the engine for a given protocol, boxed behind the shared
/// [`TraceEngine`] trait so the orchestrator can hold whichever one the
/// target's trace source was configured for.
pub fn new_engine(protocol: TraceProtocol) -> Box<dyn TraceEngine + Send> {
    match protocol {
        TraceProtocol::Etm35 => Box::new(Etm35Engine::new()),
        TraceProtocol::Etm4 => Box::new(Etm4Engine::new()),
        TraceProtocol::Mtb => Box::new(MtbEngine::new()),
    }
}

//! Host-side orchestration: byte-source abstraction, capture-file sniffing,
//! decoder statistics, and the pipeline that ties the wire/ITM/trace
//! decoders to the network fan-out.

pub mod config;
pub mod header;
pub mod orchestrator;
pub mod stats;
pub mod stream;

pub use config::{Config, DemuxKind, PortConfig, SourceConfig};
pub use header::{OFLOW_FILE_MAGIC, is_oflow_file};
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use stats::{Counter, DecoderStats, DecoderStatsSnapshot};
pub use stream::{OpenedSource, ReadOutcome, Stream, StreamError, open_source};

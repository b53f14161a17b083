//! Orchestrator configuration.

use std::time::Duration;

use probe_trace::TraceProtocol;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxKind {
    /// Raw ITM/DWT byte stream, no transport framing.
    Raw,
    Oflow,
    Tpiu,
}

#[derive(Debug, Clone)]
pub enum SourceConfig {
    Tcp { host: String, port: u16 },
    File { path: String },
    Serial { path: String, baud: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortConfig {
    pub raw_trace_port: u16,
    pub itm_byte_port: u16,
    pub auxiliary_port: u16,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self { raw_trace_port: 3443, itm_byte_port: 3402, auxiliary_port: 3442 }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub source: SourceConfig,
    pub demux: DemuxKind,
    pub trace_protocol: Option<TraceProtocol>,
    /// TPIU stream id carrying execution-trace (ETM/MTB) bytes; every other
    /// stream id is decoded as ITM/DWT. Only consulted when `demux ==
    /// DemuxKind::Tpiu` and `trace_protocol` is set.
    pub trace_channel: u8,
    pub ports: PortConfig,
    pub ring_blocks: usize,
    pub terminate_on_eof: bool,
    pub reopen_backoff: Duration,
    pub stats_interval: Duration,
}

impl Config {
    pub fn new(source: SourceConfig, demux: DemuxKind) -> Self {
        Self {
            source,
            demux,
            trace_protocol: None,
            trace_channel: 2,
            ports: PortConfig::default(),
            ring_blocks: 8,
            terminate_on_eof: false,
            reopen_backoff: Duration::from_millis(500),
            stats_interval: Duration::from_secs(1),
        }
    }
}

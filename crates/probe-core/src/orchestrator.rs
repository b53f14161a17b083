//! Wires a [`Stream`] source through the configured demultiplexer and
//! decoders into the network fan-out [`Fabric`](s), and owns the pipeline's
//! thread lifecycle.

use std::{
    collections::HashMap,
    net::{Ipv4Addr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    thread,
    time::{Duration, Instant},
};

use probe_communication::{Block, Fabric, Producer};
use probe_itm::{ItmEvent, ItmPacketDecoder, MessageDecoder, Resequencer};
use probe_network::FanoutListener;
use probe_trace::{TraceEngine, TraceProtocol};
use probe_wire::{OflowDecoder, OflowStats, TpiuDecoder};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    config::{Config, DemuxKind, PortConfig, SourceConfig},
    stats::DecoderStats,
    stream::{ReadOutcome, StreamError, open_source},
};

/// A tag/stream-id is considered dead for interval-reporting purposes after
/// this much silence.
const TAG_LAST_SEEN_WINDOW: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("source open failed: {0}")]
    SourceOpen(#[from] StreamError),
    #[error("listener bind failed: {0}")]
    ListenerBind(std::io::Error),
}

/// Accumulates decoded bytes into fixed-size blocks before publishing them
/// to a fan-out ring, so the ring isn't hammered with one tiny block per
/// source byte.
struct BlockAccumulator {
    block: Block,
}

impl BlockAccumulator {
    fn new() -> Self {
        Self { block: Block::EMPTY }
    }

    fn push(&mut self, producer: &mut Producer<Block>, byte: u8) {
        self.block.data[self.block.len as usize] = byte;
        self.block.len += 1;
        if self.block.len as usize == probe_communication::TRANSFER_SIZE {
            self.flush(producer);
        }
    }

    fn flush(&mut self, producer: &mut Producer<Block>) {
        if self.block.len > 0 {
            producer.produce(&self.block);
            self.block = Block::EMPTY;
        }
    }
}

/// One sub-fabric's live state, owned exclusively by the decode thread.
/// The `Fabric` handle itself is cheap to clone out to a listener thread.
struct SubFabric {
    fabric: Fabric,
    producer: Producer<Block>,
    accumulator: BlockAccumulator,
    last_seen: Instant,
    bytes_total: u64,
}

impl SubFabric {
    fn new(ring_blocks: usize) -> Self {
        let fabric = Fabric::new(ring_blocks);
        let producer = fabric.producer();
        Self { fabric, producer, accumulator: BlockAccumulator::new(), last_seen: Instant::now(), bytes_total: 0 }
    }
}

/// Lazily-created per-tag (OFLOW) / per-stream-id (TPIU) sub-fabrics, each
/// with its own dynamically-bound listener port (`base_port + key`),
/// created the first time that tag or stream id is seen.
struct TagFabrics {
    base_port: u16,
    ring_blocks: usize,
    ending: Arc<AtomicBool>,
    fabrics: HashMap<u8, SubFabric>,
    listener_threads: Vec<thread::JoinHandle<()>>,
}

impl TagFabrics {
    fn new(base_port: u16, ring_blocks: usize, ending: Arc<AtomicBool>) -> Self {
        Self { base_port, ring_blocks, ending, fabrics: HashMap::new(), listener_threads: Vec::new() }
    }

    fn get_or_create(&mut self, key: u8) -> &mut SubFabric {
        if !self.fabrics.contains_key(&key) {
            let sub = SubFabric::new(self.ring_blocks);
            let port = self.base_port.wrapping_add(u16::from(key));
            let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
            match FanoutListener::bind(addr) {
                Ok(listener) => {
                    info!(tag = key, %port, "sub-fabric listener bound");
                    let fabric = sub.fabric.clone();
                    let ending = self.ending.clone();
                    self.listener_threads.push(thread::spawn(move || listener.serve(fabric, ending)));
                }
                Err(e) => warn!(tag = key, %port, "sub-fabric listener bind failed: {e}"),
            }
            self.fabrics.insert(key, sub);
        }
        self.fabrics.get_mut(&key).expect("just inserted")
    }

    fn report(&self) {
        let now = Instant::now();
        for (tag, sub) in &self.fabrics {
            if now.duration_since(sub.last_seen) <= TAG_LAST_SEEN_WINDOW {
                info!(tag, bytes_total = sub.bytes_total, "sub-fabric activity");
            }
        }
    }

    fn join(self) {
        for t in self.listener_threads {
            let _ = t.join();
        }
    }
}

/// One stream's worth of ITM decode state, used only to keep
/// [`DecoderStats`] accurate; the bytes themselves are forwarded to the
/// fabric unchanged regardless of whether they decode cleanly.
struct ItmTrack {
    packets: ItmPacketDecoder,
    messages: MessageDecoder,
    resequencer: Resequencer,
}

impl ItmTrack {
    fn new() -> Self {
        Self { packets: ItmPacketDecoder::new(), messages: MessageDecoder::new(), resequencer: Resequencer::new() }
    }

    fn feed(&mut self, byte: u8, stats: &DecoderStats) {
        match self.packets.pump(byte) {
            ItmEvent::PacketReady => {
                stats.packets_decoded.increment();
                if let Some(packet) = self.packets.packet() {
                    if let Some(message) = self.messages.decode(packet) {
                        for _ in self.resequencer.push(message).as_slice() {
                            stats.messages_decoded.increment();
                        }
                    }
                }
            }
            ItmEvent::Synced => {}
            ItmEvent::Unsynced | ItmEvent::Error | ItmEvent::Overflow => stats.errors.increment(),
            ItmEvent::None => {}
        }
    }
}

fn reader_loop(
    config: SourceConfig,
    terminate_on_eof: bool,
    backoff: Duration,
    tx: mpsc::SyncSender<Vec<u8>>,
    ending: Arc<AtomicBool>,
    stats: Arc<DecoderStats>,
) {
    let mut source = match open_source(&config) {
        Ok(opened) => opened.stream,
        Err(e) => {
            warn!("source open failed: {e}");
            return;
        }
    };

    let mut buf = [0u8; 4096];
    loop {
        if ending.load(Ordering::Relaxed) {
            return;
        }
        match source.read(&mut buf, Some(Duration::from_millis(200))) {
            ReadOutcome::Ok(n) => {
                stats.bytes_in.add(n as u64);
                if tx.send(buf[..n].to_vec()).is_err() {
                    return;
                }
            }
            ReadOutcome::Timeout => {}
            ReadOutcome::Eof => {
                if terminate_on_eof {
                    return;
                }
                thread::sleep(backoff);
                source = match open_source(&config) {
                    Ok(opened) => opened.stream,
                    Err(e) => {
                        warn!("source re-open failed: {e}");
                        return;
                    }
                };
            }
            ReadOutcome::Error(e) => {
                warn!("source read error: {e}");
                if ending.load(Ordering::Relaxed) {
                    return;
                }
                thread::sleep(backoff);
            }
        }
    }
}

fn decode_loop(
    rx: mpsc::Receiver<Vec<u8>>,
    mut primary_producer: Producer<Block>,
    stats: Arc<DecoderStats>,
    demux: DemuxKind,
    trace_protocol: Option<TraceProtocol>,
    trace_channel: u8,
    auxiliary_port: u16,
    ring_blocks: usize,
    stats_interval: Duration,
    ending: Arc<AtomicBool>,
) -> TagFabrics {
    let mut primary = BlockAccumulator::new();
    let mut itm = ItmTrack::new();
    let mut oflow = OflowDecoder::new();
    let mut tpiu = TpiuDecoder::new();
    let mut trace_engine: Option<Box<dyn TraceEngine + Send>> = trace_protocol.map(probe_trace::new_engine);
    let mut tags = TagFabrics::new(auxiliary_port, ring_blocks, ending.clone());
    let mut last_report = Instant::now();
    let mut oflow_prev = OflowStats::default();

    loop {
        if last_report.elapsed() >= stats_interval {
            tags.report();
            last_report = Instant::now();
        }
        let block = match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(block) => block,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                primary.flush(&mut primary_producer);
                if ending.load(Ordering::Relaxed) {
                    return tags;
                }
                continue;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                primary.flush(&mut primary_producer);
                return tags;
            }
        };

        for byte in block {
            match demux {
                DemuxKind::Raw => {
                    itm.feed(byte, &stats);
                    if let Some(engine) = trace_engine.as_mut() {
                        let mut changes = probe_trace::Changes::new();
                        engine.action(byte, &mut changes);
                        stats.trace_changes.add(changes.len() as u64);
                    }
                    primary.push(&mut primary_producer, byte);
                }
                DemuxKind::Oflow => {
                    if let Some(frame) = oflow.pump(byte) {
                        stats.frames_decoded.increment();
                        if !frame.good {
                            stats.errors.increment();
                        }
                        for &b in frame.payload {
                            primary.push(&mut primary_producer, b);
                        }
                        let tag = frame.tag;
                        let sub = tags.get_or_create(tag);
                        sub.last_seen = Instant::now();
                        sub.bytes_total += frame.payload.len() as u64;
                        for &b in frame.payload {
                            sub.accumulator.push(&mut sub.producer, b);
                        }
                    }
                }
                DemuxKind::Tpiu => {
                    let mut out = probe_utils::ArrayVec::new();
                    match tpiu.pump(byte, &mut out) {
                        Ok(()) => {}
                        Err(_lost_sync) => stats.sync_losses.increment(),
                    }
                    for &(stream_id, b) in out.as_slice() {
                        if stream_id == trace_channel && trace_engine.is_some() {
                            let engine = trace_engine.as_mut().expect("checked is_some above");
                            let mut changes = probe_trace::Changes::new();
                            engine.action(b, &mut changes);
                            stats.trace_changes.add(changes.len() as u64);
                        } else {
                            itm.feed(b, &stats);
                        }
                        primary.push(&mut primary_producer, b);
                        let sub = tags.get_or_create(stream_id);
                        sub.last_seen = Instant::now();
                        sub.bytes_total += 1;
                        sub.accumulator.push(&mut sub.producer, b);
                    }
                }
            }
        }
        if demux == DemuxKind::Oflow {
            let s = oflow.stats();
            let dropped = (s.too_short - oflow_prev.too_short) + (s.cobs_errors - oflow_prev.cobs_errors);
            if dropped > 0 {
                stats.frames_dropped.add(dropped);
            }
            oflow_prev = s;
        }

        primary.flush(&mut primary_producer);
        for sub in tags.fabrics.values_mut() {
            sub.accumulator.flush(&mut sub.producer);
        }
    }
}

fn report_loop(stats: Arc<DecoderStats>, ending: Arc<AtomicBool>, interval: Duration) {
    loop {
        thread::sleep(interval);
        if ending.load(Ordering::Relaxed) {
            return;
        }
        let snap = stats.snapshot();
        info!(
            bytes_in = snap.bytes_in,
            packets = snap.packets_decoded,
            messages = snap.messages_decoded,
            frames_decoded = snap.frames_decoded,
            frames_dropped = snap.frames_dropped,
            errors = snap.errors,
            "decoder stats"
        );
    }
}

/// Owns the full source→demux→decode→fan-out pipeline's thread lifecycle.
pub struct Orchestrator {
    config: Config,
    stats: Arc<DecoderStats>,
    primary: Fabric,
    ending: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        let primary = Fabric::new(config.ring_blocks);
        Self { config, stats: Arc::new(DecoderStats::new()), primary, ending: Arc::new(AtomicBool::new(false)) }
    }

    pub fn stats(&self) -> Arc<DecoderStats> {
        self.stats.clone()
    }

    /// The fabric backing the raw-trace and legacy-ITM ports — the whole
    /// reconstructed stream, with no per-tag/stream-id split.
    pub fn primary_fabric(&self) -> Fabric {
        self.primary.clone()
    }

    /// A handle the caller can use to request shutdown from outside `run`
    /// (e.g. a signal handler).
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.ending.clone()
    }

    /// Runs the pipeline until `shutdown_handle` is raised or the reader
    /// thread exits (source closed, terminate-on-eof). Blocks the calling
    /// thread.
    pub fn run(self) -> Result<(), OrchestratorError> {
        let Self { config, stats, primary, ending } = self;
        let PortConfig { raw_trace_port, itm_byte_port, auxiliary_port } = config.ports;

        // The two static ports both mirror the primary reconstructed
        // stream: 3443 for trace-aware clients, 3402 for tools expecting
        // the legacy bare ITM byte stream. Per-tag/stream-id traffic gets
        // its own dynamically-bound port under `auxiliary_port` instead of
        // a third static listener.
        let mut listener_threads = Vec::new();
        for (name, port) in [("raw trace", raw_trace_port), ("legacy ITM byte stream", itm_byte_port)] {
            let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
            let listener = FanoutListener::bind(addr).map_err(OrchestratorError::ListenerBind)?;
            info!(%name, %port, "fan-out listener bound");
            let fabric = primary.clone();
            let ending = ending.clone();
            listener_threads.push(thread::spawn(move || listener.serve(fabric, ending)));
        }

        let stats_thread = {
            let stats = stats.clone();
            let ending = ending.clone();
            let interval = config.stats_interval;
            thread::spawn(move || report_loop(stats, ending, interval))
        };

        let (tx, rx) = mpsc::sync_channel::<Vec<u8>>(64);
        let reader_thread = {
            let source_config = config.source.clone();
            let terminate_on_eof = config.terminate_on_eof;
            let backoff = config.reopen_backoff;
            let ending = ending.clone();
            let stats = stats.clone();
            thread::spawn(move || reader_loop(source_config, terminate_on_eof, backoff, tx, ending, stats))
        };

        let tags = decode_loop(
            rx,
            primary.producer(),
            stats,
            config.demux,
            config.trace_protocol,
            config.trace_channel,
            auxiliary_port,
            config.ring_blocks,
            config.stats_interval,
            ending.clone(),
        );

        ending.store(true, Ordering::Relaxed);
        let _ = reader_thread.join();
        let _ = stats_thread.join();
        for t in listener_threads {
            let _ = t.join();
        }
        tags.join();
        Ok(())
    }
}

use std::{process::ExitCode, time::Duration};

use clap::{Parser, ValueEnum};
use probe_core::{Config, DemuxKind as CoreDemuxKind, Orchestrator, PortConfig, SourceConfig, StreamError};
use probe_trace::TraceProtocol;
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    low_level,
};
use tracing::{error, info};

/// Host-side trace decoder and network fan-out daemon for ARM Cortex-M ITM,
/// DWT, ETM and MTB trace sources.
#[derive(Parser, Debug)]
#[command(name = "orb-hostd", version, about)]
struct Cli {
    /// Connect to a TCP trace source at host:port, e.g. target-board:3443.
    #[arg(long, conflicts_with_all = ["file", "serial"])]
    tcp: Option<String>,

    /// Read a trace capture from a file instead of a live target.
    #[arg(long, conflicts_with_all = ["tcp", "serial"])]
    file: Option<String>,

    /// Read from a serial device, e.g. /dev/ttyUSB0.
    #[arg(long, conflicts_with_all = ["tcp", "file"])]
    serial: Option<String>,

    /// Baud rate for --serial.
    #[arg(long, default_value_t = 115_200, requires = "serial")]
    baud: u32,

    /// Framing the source applies to the raw trace byte stream. Defaults to
    /// `raw`, except a file source whose header identifies it as an OFLOW
    /// capture is auto-detected as `oflow` unless this is set explicitly.
    #[arg(long, value_enum)]
    demux: Option<DemuxArg>,

    /// Execution-trace protocol, if the source carries ETM/MTB instead of
    /// (or alongside) ITM/DWT.
    #[arg(long, value_enum)]
    trace_protocol: Option<TraceProtocolArg>,

    #[arg(long, default_value_t = PortConfig::default().raw_trace_port)]
    raw_trace_port: u16,

    #[arg(long, default_value_t = PortConfig::default().itm_byte_port)]
    itm_byte_port: u16,

    #[arg(long, default_value_t = PortConfig::default().auxiliary_port)]
    auxiliary_port: u16,

    /// Exit once the source reaches EOF instead of waiting and reopening it.
    #[arg(long)]
    terminate_on_eof: bool,

    #[arg(long, default_value_t = 500)]
    reopen_backoff_ms: u64,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DemuxArg {
    Raw,
    Oflow,
    Tpiu,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TraceProtocolArg {
    Etm35,
    Etm4,
    Mtb,
}

fn source_from_cli(cli: &Cli) -> Result<SourceConfig, ExitCode> {
    if let Some(tcp) = &cli.tcp {
        let (host, port) = tcp.rsplit_once(':').ok_or_else(|| {
            error!("--tcp expects host:port, got {tcp:?}");
            ExitCode::from(2)
        })?;
        let port: u16 = port.parse().map_err(|_| {
            error!("--tcp port {port:?} is not a valid u16");
            ExitCode::from(2)
        })?;
        return Ok(SourceConfig::Tcp { host: host.to_string(), port });
    }
    if let Some(path) = &cli.file {
        return Ok(SourceConfig::File { path: path.clone() });
    }
    if let Some(path) = &cli.serial {
        return Ok(SourceConfig::Serial { path: path.clone(), baud: cli.baud });
    }
    error!("one of --tcp, --file or --serial is required");
    Err(ExitCode::from(2))
}

/// Exit codes follow the convention that a failure to reach the source at
/// all (host unreachable, file missing, device absent) is distinguishable
/// from the source being reachable but misconfigured (bad baud rate, socket
/// option rejected by the OS).
fn exit_code_for(err: &StreamError) -> ExitCode {
    match err {
        StreamError::Open(_) | StreamError::NoAddress => ExitCode::from(1),
        StreamError::Configure(_) => ExitCode::from(2),
    }
}

fn install_signal_handlers(ending: std::sync::Arc<std::sync::atomic::AtomicBool>) {
    for sig in [SIGINT, SIGTERM] {
        let ending = ending.clone();
        unsafe {
            let _ = low_level::register(sig, move || {
                ending.store(true, std::sync::atomic::Ordering::Relaxed);
            });
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let source = match source_from_cli(&cli) {
        Ok(source) => source,
        Err(code) => return code,
    };

    // Fail fast with the right exit code before spawning any thread; the
    // orchestrator's own reader thread will reopen the source the same way
    // on every subsequent disconnect. Also gives us a header peek to
    // auto-detect an OFLOW-framed capture file.
    let opened = match probe_core::open_source(&source) {
        Ok(opened) => opened,
        Err(e) => {
            error!("{e}");
            return exit_code_for(&e);
        }
    };
    drop(opened.stream);

    let demux = match cli.demux {
        Some(DemuxArg::Raw) => CoreDemuxKind::Raw,
        Some(DemuxArg::Oflow) => CoreDemuxKind::Oflow,
        Some(DemuxArg::Tpiu) => CoreDemuxKind::Tpiu,
        None if opened.detected_oflow => {
            info!("source header identifies an OFLOW capture, auto-selecting --demux oflow");
            CoreDemuxKind::Oflow
        }
        None => CoreDemuxKind::Raw,
    };

    let mut config = Config::new(source, demux);
    config.trace_protocol = match cli.trace_protocol {
        Some(TraceProtocolArg::Etm35) => Some(TraceProtocol::Etm35),
        Some(TraceProtocolArg::Etm4) => Some(TraceProtocol::Etm4),
        Some(TraceProtocolArg::Mtb) => Some(TraceProtocol::Mtb),
        None => None,
    };
    config.ports = PortConfig {
        raw_trace_port: cli.raw_trace_port,
        itm_byte_port: cli.itm_byte_port,
        auxiliary_port: cli.auxiliary_port,
    };
    config.terminate_on_eof = cli.terminate_on_eof;
    config.reopen_backoff = Duration::from_millis(cli.reopen_backoff_ms);

    let orchestrator = Orchestrator::new(config);
    install_signal_handlers(orchestrator.shutdown_handle());

    info!("orb-hostd starting");
    match orchestrator.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

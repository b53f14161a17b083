//! Uniform byte-source handle over TCP, file and serial inputs.

use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    net::{TcpStream, ToSocketAddrs},
    path::Path,
    time::Duration,
};

use thiserror::Error;

use crate::{config::SourceConfig, header};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("failed to open source: {0}")]
    Open(#[from] io::Error),
    #[error("failed to configure source: {0}")]
    Configure(String),
    #[error("source address did not resolve to anything")]
    NoAddress,
}

/// Outcome of one [`Stream::read`] call. Partial reads are normal and must
/// not be coalesced across calls.
#[derive(Debug)]
pub enum ReadOutcome {
    Ok(usize),
    Timeout,
    Eof,
    Error(io::Error),
}

/// A polymorphic handle over the three byte-source kinds the orchestrator
/// can be pointed at. Created at startup, closed on shutdown; the
/// orchestrator is the sole owner.
pub enum Stream {
    Tcp(TcpStream),
    File(File),
    Serial(Box<dyn serialport::SerialPort>),
}

/// A just-opened source, plus whether a file source's header identified it
/// as an OFLOW capture.
pub struct OpenedSource {
    pub stream: Stream,
    pub detected_oflow: bool,
}

/// Opens whichever source kind `config` names. Shared by the orchestrator's
/// reader thread (which calls this again on every reconnect) and the
/// daemon's startup path (which calls it once to fail fast with the right
/// exit code before any thread is spawned).
pub fn open_source(config: &SourceConfig) -> Result<OpenedSource, StreamError> {
    match config {
        SourceConfig::Tcp { host, port } => {
            Ok(OpenedSource { stream: Stream::connect_tcp((host.as_str(), *port))?, detected_oflow: false })
        }
        SourceConfig::File { path } => {
            let (stream, detected_oflow) = Stream::open_file(path)?;
            Ok(OpenedSource { stream, detected_oflow })
        }
        SourceConfig::Serial { path, baud } => {
            Ok(OpenedSource { stream: Stream::open_serial(path, *baud)?, detected_oflow: false })
        }
    }
}

impl Stream {
    /// Connects to `addr` with a 2-second connect deadline and sets
    /// `TCP_NODELAY`.
    pub fn connect_tcp<A: ToSocketAddrs>(addr: A) -> Result<Self, StreamError> {
        let addr = addr.to_socket_addrs()?.next().ok_or(StreamError::NoAddress)?;
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        stream.set_nodelay(true).map_err(|e| StreamError::Configure(e.to_string()))?;
        Ok(Self::Tcp(stream))
    }

    /// Opens a file source. If it begins with the OFLOW capture-file
    /// header, the header bytes are consumed here rather than surfaced as
    /// stream data, and the second return value is `true` so the caller can
    /// auto-select OFLOW demuxing.
    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<(Self, bool), StreamError> {
        let mut file = File::open(path)?;
        let mut prefix = [0u8; header::OFLOW_FILE_MAGIC.len() + 1];
        let n = file.read(&mut prefix).unwrap_or(0);
        let detected = header::is_oflow_file(&prefix[..n]);
        if !detected {
            file.seek(SeekFrom::Start(0))?;
        }
        Ok((Self::File(file), detected))
    }

    /// Opens a serial port at raw 8N1 with the given baud rate.
    pub fn open_serial(path: &str, baud: u32) -> Result<Self, StreamError> {
        let port = serialport::new(path, baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| StreamError::Configure(e.to_string()))?;
        Ok(Self::Serial(port))
    }

    /// Reads up to `buf.len()` bytes within `timeout` (`None` blocks
    /// indefinitely). Never coalesces reads; a short read is reported as-is.
    pub fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> ReadOutcome {
        if let Err(e) = self.set_timeout(timeout) {
            return ReadOutcome::Error(e);
        }
        match self.reader().read(buf) {
            Ok(0) => ReadOutcome::Eof,
            Ok(n) => ReadOutcome::Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                ReadOutcome::Timeout
            }
            Err(e) => ReadOutcome::Error(e),
        }
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.set_read_timeout(timeout),
            Self::File(_) => Ok(()),
            Self::Serial(s) => s.set_timeout(timeout.unwrap_or(Duration::from_secs(3600))).map_err(io::Error::other),
        }
    }

    fn reader(&mut self) -> &mut dyn Read {
        match self {
            Self::Tcp(s) => s,
            Self::File(f) => f,
            Self::Serial(s) => s,
        }
    }

    /// Closes the underlying descriptor. Subsequent reads return an error.
    pub fn close(self) {
        drop(self);
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;

    #[test]
    fn file_stream_reports_eof() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("probe-core-test-{}", std::process::id()));
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(b"hi").unwrap();
        }
        let (mut stream, detected) = Stream::open_file(&path).unwrap();
        assert!(!detected);
        let mut buf = [0u8; 8];
        match stream.read(&mut buf, None) {
            ReadOutcome::Ok(n) => assert_eq!(&buf[..n], b"hi"),
            other => panic!("expected Ok, got {other:?}"),
        }
        match stream.read(&mut buf, None) {
            ReadOutcome::Eof => {}
            other => panic!("expected Eof, got {other:?}"),
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn oflow_header_is_detected_and_skipped() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("probe-core-test-oflow-{}", std::process::id()));
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(header::OFLOW_FILE_MAGIC).unwrap();
            f.write_all(b"\n").unwrap();
            f.write_all(b"payload").unwrap();
        }
        let (mut stream, detected) = Stream::open_file(&path).unwrap();
        assert!(detected);
        let mut buf = [0u8; 16];
        match stream.read(&mut buf, None) {
            ReadOutcome::Ok(n) => assert_eq!(&buf[..n], b"payload"),
            other => panic!("expected Ok, got {other:?}"),
        }
        let _ = std::fs::remove_file(&path);
    }
}

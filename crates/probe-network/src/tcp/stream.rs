use std::{
    io::Write,
    net::TcpStream,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use probe_communication::{FabricClient, ReadError};
use tracing::{debug, warn};

use super::socket::set_socket_buf_size;

const SEND_BUF_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Alive,
    Disconnected,
}

/// Runs one client's lifetime to completion: blocks reading fan-out blocks
/// off `client` and writes each straight to `stream`, until the peer
/// disconnects, a write fails, the client falls behind the ring
/// (`ReadError::SpedPast`), or `ending` is raised.
///
/// One OS thread per client, per the no-reactor concurrency model: this
/// function is meant to be the whole body of that thread.
pub fn serve_client(stream: TcpStream, mut client: FabricClient, ending: Arc<AtomicBool>) -> ConnState {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("couldn't set TCP_NODELAY on client socket: {e}");
    }
    if let Err(e) = set_socket_buf_size(&stream, SEND_BUF_SIZE, SEND_BUF_SIZE) {
        debug!("couldn't tune client socket buffers: {e}");
    }

    let peer = stream.peer_addr().ok();
    let mut stream = stream;

    loop {
        if ending.load(Ordering::Relaxed) {
            return ConnState::Disconnected;
        }

        match client.try_read() {
            Ok(block) => {
                if let Err(e) = stream.write_all(block.as_slice()) {
                    debug!(?peer, "client write failed, dropping: {e}");
                    return ConnState::Disconnected;
                }
            }
            Err(ReadError::Empty) => {
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            Err(ReadError::SpedPast) => {
                warn!(?peer, "client fell behind the fan-out ring, dropping");
                return ConnState::Disconnected;
            }
        }
    }
}

use std::{
    net::{SocketAddr, TcpListener},
    sync::{Arc, atomic::AtomicBool},
    thread,
    time::Duration,
};

use probe_communication::Fabric;
use tracing::{info, warn};

use super::stream::serve_client;

/// One accept thread bound to one TCP port, handing every accepted
/// connection its own client thread fed from `fabric`.
pub struct FanoutListener {
    listener: TcpListener,
    addr: SocketAddr,
}

/// How long `serve`'s accept poll blocks between `ending` checks when no
/// connection is pending.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

impl FanoutListener {
    pub fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self { listener, addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Runs the accept loop on the calling thread until `ending` is raised
    /// or the listener errors out. Spawns one detached thread per accepted
    /// client.
    ///
    /// The listener is put in non-blocking mode so the `ending` flag is
    /// re-checked even while no connection is pending; otherwise a quiet
    /// port would leave this thread parked in `accept()` forever and hang
    /// shutdown.
    pub fn serve(self, fabric: Fabric, ending: Arc<AtomicBool>) {
        info!(addr = %self.addr, "listening for fan-out clients");
        if let Err(e) = self.listener.set_nonblocking(true) {
            warn!(addr = %self.addr, "couldn't set listener non-blocking, shutdown may hang: {e}");
        }
        loop {
            if ending.load(std::sync::atomic::Ordering::Relaxed) {
                return;
            }
            let stream = match self.listener.accept() {
                Ok((stream, _)) => stream,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                    continue;
                }
                Err(e) => {
                    warn!(addr = %self.addr, "accept failed: {e}");
                    continue;
                }
            };
            let peer = stream.peer_addr().ok();
            info!(addr = %self.addr, ?peer, "client connected");
            let client = fabric.new_client();
            let ending = ending.clone();
            thread::spawn(move || {
                serve_client(stream, client, ending);
                info!(?peer, "client disconnected");
            });
        }
    }
}

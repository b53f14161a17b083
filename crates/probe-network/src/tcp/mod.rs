mod listener;
mod socket;
mod stream;

pub use listener::FanoutListener;
pub use socket::set_socket_buf_size;
pub use stream::{ConnState, serve_client};

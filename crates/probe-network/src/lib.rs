pub mod tcp;

pub use tcp::{ConnState, FanoutListener, serve_client};

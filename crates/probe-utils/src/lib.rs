mod arrayvec;
mod assert;
pub mod directories;
mod thread;

pub use arrayvec::{ArrayStr, ArrayVec};
pub use thread::{ThreadPriority, thread_boot};

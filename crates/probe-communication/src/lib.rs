mod error;
pub mod fabric;
pub mod queue;
mod seqlock;

pub use error::{EmptyError, QueueError, ReadError};
pub use fabric::{Block, Fabric, FabricClient, TRANSFER_SIZE};
pub use queue::Producer;
pub use seqlock::Seqlock;

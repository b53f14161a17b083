//! Byte-ring fan-out: one lock-free SPMC [`Queue`] of fixed-size blocks per
//! demuxed tag/stream-id, with one [`ConsumerBare`] handed out per connected
//! client. A client that falls more than `n_blocks - 1` blocks behind the
//! producer gets `ReadError::SpedPast` on its next read and is dropped
//! rather than resynchronised, since a network client that's gone is gone.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use crate::{
    error::ReadError,
    queue::{ConsumerBare, Producer, Queue, QueueType},
};

/// Capacity, in bytes, of one [`Block`]. The orchestrator's writer thread
/// publishes a block as soon as it fills, or on its interval flush, so most
/// blocks are published with `len < TRANSFER_SIZE`.
pub const TRANSFER_SIZE: usize = 4096;

/// One ring slot: up to `TRANSFER_SIZE` live bytes plus how many of them are
/// valid. `data` beyond `len` is unspecified.
#[derive(Copy, Clone)]
#[repr(C)]
pub struct Block {
    pub len: u16,
    pub data: [u8; TRANSFER_SIZE],
}

impl Block {
    pub const EMPTY: Self = Self { len: 0, data: [0; TRANSFER_SIZE] };

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

/// One ring buffer plus its live client count, covering either the whole
/// byte stream (no demux) or a single OFLOW tag / TPIU stream id.
///
/// Cheap to clone: the underlying queue is a raw-pointer handle, and the
/// client counter is reference counted. The orchestrator's writer thread
/// should call [`Fabric::producer`] exactly once and hold onto the result;
/// every client thread calls [`Fabric::new_client`] independently.
#[derive(Clone)]
pub struct Fabric {
    queue: Queue<Block>,
    clients: Arc<AtomicUsize>,
}

impl Fabric {
    pub fn new(n_blocks: usize) -> Self {
        Self { queue: Queue::new(n_blocks, QueueType::SPMC), clients: Arc::new(AtomicUsize::new(0)) }
    }

    /// Returns a producer handle for the single writer thread.
    pub fn producer(&self) -> Producer<Block> {
        Producer::from(self.queue)
    }

    /// Registers a new client, returning a handle it can poll independently
    /// of every other client. The fabric's client count is decremented when
    /// the returned handle is dropped.
    pub fn new_client(&self) -> FabricClient {
        self.clients.fetch_add(1, Ordering::Relaxed);
        FabricClient { consumer: ConsumerBare::from(self.queue), clients: self.clients.clone() }
    }

    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }
}

unsafe impl Send for Fabric {}
unsafe impl Sync for Fabric {}

/// Per-client read handle into a [`Fabric`]'s ring.
pub struct FabricClient {
    consumer: ConsumerBare<Block>,
    clients: Arc<AtomicUsize>,
}

impl FabricClient {
    /// Nonblocking read of the next block. `Err(ReadError::Empty)` means
    /// nothing new has been published; `Err(ReadError::SpedPast)` means the
    /// caller fell behind and should close its connection.
    pub fn try_read(&mut self) -> Result<Block, ReadError> {
        let mut block = Block::EMPTY;
        self.consumer.try_consume(&mut block)?;
        Ok(block)
    }

    /// Blocks (spinning) until a block is available, returning `SpedPast`
    /// immediately rather than resynchronising the read position.
    pub fn blocking_read(&mut self) -> Result<Block, ReadError> {
        loop {
            match self.try_read() {
                Ok(block) => return Ok(block),
                Err(ReadError::Empty) => {
                    std::thread::yield_now();
                    continue;
                }
                Err(ReadError::SpedPast) => return Err(ReadError::SpedPast),
            }
        }
    }
}

impl Drop for FabricClient {
    fn drop(&mut self) {
        self.clients.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn block_with(b: u8) -> Block {
        let mut block = Block::EMPTY;
        block.data[0] = b;
        block.len = 1;
        block
    }

    #[test]
    fn publish_and_read() {
        let fabric = Fabric::new(4);
        let mut producer = fabric.producer();
        let mut client = fabric.new_client();
        producer.produce(&block_with(0xab));
        let read = client.try_read().unwrap();
        assert_eq!(read.as_slice(), &[0xab]);
        assert!(matches!(client.try_read(), Err(ReadError::Empty)));
    }

    #[test]
    fn slow_client_gets_sped_past() {
        let fabric = Fabric::new(4);
        let mut producer = fabric.producer();
        let mut client = fabric.new_client();
        for i in 0..20u8 {
            producer.produce(&block_with(i));
        }
        assert!(matches!(client.try_read(), Err(ReadError::SpedPast)));
    }

    #[test]
    fn independent_clients_each_see_every_block_and_count_decrements_on_drop() {
        let fabric = Fabric::new(8);
        let mut producer = fabric.producer();
        let c1 = fabric.new_client();
        let mut c2 = fabric.new_client();
        assert_eq!(fabric.client_count(), 2);
        producer.produce(&block_with(7));
        assert_eq!(c2.try_read().unwrap().as_slice(), &[7]);
        drop(c1);
        assert_eq!(fabric.client_count(), 1);
    }
}

//! Bounded-window message reordering by embedded timestamp.

use probe_utils::ArrayVec;

use crate::message::Message;

/// Largest number of messages held pending a settling timestamp. Empirical;
/// a larger window would reduce mis-ordering at the cost of latency under
/// TS-sparse streams.
pub const CAPACITY: usize = 10;

struct Pending {
    arrival: u64,
    message: Message,
}

/// Reorders decoded messages by timestamp within a small bounded window.
/// Never blocks: a push past capacity releases the oldest-arrived entry
/// immediately, out of timestamp order, rather than stalling the producer.
pub struct Resequencer {
    buf: Vec<Pending>,
    next_arrival: u64,
}

impl Default for Resequencer {
    fn default() -> Self {
        Self { buf: Vec::with_capacity(CAPACITY), next_arrival: 0 }
    }
}

impl Resequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Feeds one decoded message in. Returns every message that settles as a
    /// result: a TS packet arriving releases the whole window in timestamp
    /// order (ties broken by arrival order); an overflowing push releases
    /// the single oldest-arrived entry, unordered.
    pub fn push(&mut self, message: Message) -> ArrayVec<Message, { CAPACITY + 1 }> {
        let mut released = ArrayVec::new();
        let arrival = self.next_arrival;
        self.next_arrival += 1;
        let is_ts = matches!(message, Message::Ts { .. });

        if self.buf.len() >= CAPACITY {
            let oldest = (0..self.buf.len()).min_by_key(|&i| self.buf[i].arrival).unwrap();
            let dropped = self.buf.remove(oldest);
            released.push(dropped.message);
        }

        self.buf.push(Pending { arrival, message });

        if is_ts {
            self.buf.sort_by_key(|p| (p.message.timestamp(), p.arrival));
            for p in self.buf.drain(..) {
                released.push(p.message);
            }
        }

        released
    }

    /// Flushes every pending message, in timestamp order, regardless of
    /// whether a settling TS has arrived. Meant for shutdown.
    pub fn flush(&mut self) -> Vec<Message> {
        self.buf.sort_by_key(|p| (p.message.timestamp(), p.arrival));
        self.buf.drain(..).map(|p| p.message).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::TsStatus;

    fn sw(ts: u64, channel: u8) -> Message {
        Message::Software { timestamp: ts, channel, value: 0, len: 1 }
    }

    #[test]
    fn buffers_until_ts_then_releases_sorted() {
        let mut r = Resequencer::new();
        assert!(r.push(sw(5, 1)).is_empty());
        assert!(r.push(sw(2, 2)).is_empty());
        assert!(r.push(sw(8, 3)).is_empty());
        let released = r.push(Message::Ts { timestamp: 8, status: TsStatus::Current });
        let timestamps: Vec<u64> = released.as_slice().iter().map(Message::timestamp).collect();
        assert_eq!(timestamps, vec![2, 5, 8, 8]);
        assert!(r.is_empty());
    }

    #[test]
    fn ties_break_by_arrival_order() {
        let mut r = Resequencer::new();
        r.push(sw(10, 1));
        r.push(sw(10, 2));
        let released = r.push(Message::Ts { timestamp: 10, status: TsStatus::Current });
        match (released[0], released[1]) {
            (Message::Software { channel: c1, .. }, Message::Software { channel: c2, .. }) => {
                assert_eq!((c1, c2), (1, 2));
            }
            other => panic!("unexpected order: {other:?}"),
        }
    }

    #[test]
    fn overflow_releases_oldest_arrival_unordered() {
        let mut r = Resequencer::new();
        for i in 0..CAPACITY {
            assert!(r.push(sw(100 - i as u64, i as u8)).is_empty());
        }
        let released = r.push(sw(999, 99));
        assert_eq!(released.len(), 1);
        assert_eq!(released[0], sw(100, 0));
    }
}

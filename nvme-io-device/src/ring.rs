//! Submission ring.
//!
//! Bounded multi-producer queue feeding the poller thread. Submitters never
//! block on it: a full ring is reported back immediately.

use std::fmt;

use crossbeam::queue::ArrayQueue;

use crate::context::IoContext;

/// Bounded FIFO of requests waiting to be issued by the poller.
pub struct SubmissionRing {
    name: String,
    queue: ArrayQueue<Box<IoContext>>,
}

impl SubmissionRing {
    /// Create a ring holding up to `capacity` requests (at least one).
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            queue: ArrayQueue::new(capacity.max(1)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a request. A full ring hands the request back.
    pub fn enqueue(&self, io: Box<IoContext>) -> Result<(), Box<IoContext>> {
        self.queue.push(io)
    }

    /// Move up to `max` requests, oldest first, into `out`.
    ///
    /// Returns how many were moved.
    pub fn dequeue_burst(&self, out: &mut Vec<Box<IoContext>>, max: usize) -> usize {
        let mut n = 0;
        while n < max {
            match self.queue.pop() {
                Some(io) => {
                    out.push(io);
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    pub(crate) fn pop(&self) -> Option<Box<IoContext>> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

impl fmt::Debug for SubmissionRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmissionRing")
            .field("name", &self.name)
            .field("len", &self.queue.len())
            .field("capacity", &self.queue.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::context::{ContextPool, IoDirection, IoTarget};

    fn context(pool: &Arc<ContextPool>, offset: u64) -> Box<IoContext> {
        let target = IoTarget {
            nsid: 1,
            sector_size: 512,
        };
        pool.alloc(target, IoDirection::Write, offset, 512, None, Box::new(|_| {}))
            .unwrap()
    }

    #[test]
    fn test_full_ring_hands_back() {
        let pool = Arc::new(ContextPool::default());
        let ring = SubmissionRing::new("io_ring0x1", 2);
        ring.enqueue(context(&pool, 0)).unwrap();
        ring.enqueue(context(&pool, 512)).unwrap();

        let rejected = ring.enqueue(context(&pool, 1024)).unwrap_err();
        assert_eq!(rejected.lba(), 2);
        rejected.discard();
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_burst_is_fifo() {
        let pool = Arc::new(ContextPool::default());
        let ring = SubmissionRing::new("io_ring0x2", 8);
        for i in 0..5 {
            ring.enqueue(context(&pool, i * 512)).unwrap();
        }

        let mut out = Vec::new();
        assert_eq!(ring.dequeue_burst(&mut out, 3), 3);
        assert_eq!(ring.dequeue_burst(&mut out, 3), 2);
        assert_eq!(out.iter().map(|io| io.lba()).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert!(ring.is_empty());
    }
}

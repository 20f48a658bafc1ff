//! Thread-safe FIFO frame queues
//!
//! Multi-producer/single-consumer: transport-side tasks push, the
//! scheduler thread is the only reader. Frames stay in arrival order —
//! the design assumes in-order delivery per channel and treats
//! out-of-order timestamps as a tolerance problem, not a reordering
//! problem.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Unbounded FIFO queue of pending frames for one channel.
#[derive(Debug)]
pub struct FrameQueue<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> Default for FrameQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FrameQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a frame in arrival order.
    pub fn push(&self, frame: T) {
        self.inner.lock().unwrap().push_back(frame);
    }

    /// Pop the head frame if the predicate accepts it. The predicate only
    /// ever sees the head, so release order equals enqueue order.
    pub fn pop_if<F>(&self, ready: F) -> Option<T>
    where
        F: FnOnce(&T) -> bool,
    {
        let mut queue = self.inner.lock().unwrap();
        if queue.front().map(ready)? {
            queue.pop_front()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// Drop all pending frames, returning how many were discarded.
    pub fn clear(&self) -> usize {
        let mut queue = self.inner.lock().unwrap();
        let dropped = queue.len();
        queue.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let queue = FrameQueue::new();
        for i in 0..5 {
            queue.push(i);
        }

        let mut released = Vec::new();
        while let Some(v) = queue.pop_if(|_| true) {
            released.push(v);
        }
        assert_eq!(released, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_if_gates_on_head() {
        let queue = FrameQueue::new();
        queue.push(10);
        queue.push(1);

        // Head not ready: nothing comes out, even though a later element
        // would pass the predicate
        assert_eq!(queue.pop_if(|&v| v < 5), None);
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop_if(|&v| v >= 5), Some(10));
        assert_eq!(queue.pop_if(|&v| v < 5), Some(1));
    }

    #[test]
    fn test_clear_reports_dropped() {
        let queue = FrameQueue::new();
        queue.push("a");
        queue.push("b");
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_concurrent_producers_single_consumer() {
        use std::sync::Arc;
        use std::thread;

        let queue = Arc::new(FrameQueue::new());
        let mut producers = Vec::new();
        for p in 0..4 {
            let q = queue.clone();
            producers.push(thread::spawn(move || {
                for i in 0..100 {
                    q.push((p, i));
                }
            }));
        }
        for p in producers {
            p.join().unwrap();
        }

        // Per-producer order must survive interleaving
        let mut last_seen = [-1i32; 4];
        let mut total = 0;
        while let Some((p, i)) = queue.pop_if(|_| true) {
            assert!(i as i32 > last_seen[p]);
            last_seen[p] = i as i32;
            total += 1;
        }
        assert_eq!(total, 400);
    }
}

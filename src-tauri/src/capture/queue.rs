// queue.rs — Screenshots taken with the capture-only hotkey wait here
// until the next analyze trigger sends them all in one request.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// What to do with a new capture when the queue is already full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Keep the queue as is and refuse the new capture.
    Reject,
    /// Evict the oldest capture to make room.
    DropOldest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Appended; carries the new queue length.
    Queued(usize),
    /// Appended after evicting the oldest item; carries the queue length.
    DroppedOldest(usize),
    /// Queue full, item discarded.
    Rejected,
}

struct Inner<T> {
    items: VecDeque<T>,
    max_len: usize,
    policy: OverflowPolicy,
}

/// Insertion-ordered, bounded buffer. All access goes through one mutex so
/// appends from concurrent capture workers are never lost and a drain
/// never observes a half-written queue.
pub struct CaptureQueue<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> CaptureQueue<T> {
    /// `max_len` of 0 is treated as 1.
    pub fn new(max_len: usize, policy: OverflowPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                max_len: max_len.max(1),
                policy,
            }),
        }
    }

    pub fn enqueue(&self, item: T) -> EnqueueOutcome {
        let mut inner = self.lock();
        if inner.items.len() < inner.max_len {
            inner.items.push_back(item);
            return EnqueueOutcome::Queued(inner.items.len());
        }
        match inner.policy {
            OverflowPolicy::Reject => EnqueueOutcome::Rejected,
            OverflowPolicy::DropOldest => {
                while inner.items.len() >= inner.max_len {
                    inner.items.pop_front();
                }
                inner.items.push_back(item);
                EnqueueOutcome::DroppedOldest(inner.items.len())
            }
        }
    }

    /// Take everything queued, or capture one fresh item if the queue is
    /// empty. `capture` runs outside the lock and at most once.
    pub fn drain_or_capture<E, F>(&self, capture: F) -> Result<Vec<T>, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let drained: Vec<T> = self.lock().items.drain(..).collect();
        if !drained.is_empty() {
            return Ok(drained);
        }
        capture().map(|item| vec![item])
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply a new bound. Shrinking below the current length evicts the
    /// oldest items regardless of policy.
    pub fn set_limit(&self, max_len: usize, policy: OverflowPolicy) {
        let mut inner = self.lock();
        inner.max_len = max_len.max(1);
        inner.policy = policy;
        while inner.items.len() > inner.max_len {
            inner.items.pop_front();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn drain_returns_snapshot_and_skips_capture() {
        let q = CaptureQueue::new(10, OverflowPolicy::Reject);
        q.enqueue("one");
        q.enqueue("two");

        let mut captured = false;
        let drained: Result<_, ()> = q.drain_or_capture(|| {
            captured = true;
            Ok("three")
        });

        assert_eq!(drained.unwrap(), vec!["one", "two"]);
        assert!(!captured, "capture must not run when the queue has items");
        assert!(q.is_empty());
    }

    #[test]
    fn empty_queue_captures_exactly_once() {
        let q: CaptureQueue<u32> = CaptureQueue::new(10, OverflowPolicy::Reject);
        let mut calls = 0;
        let out: Result<_, ()> = q.drain_or_capture(|| {
            calls += 1;
            Ok(7)
        });
        assert_eq!(out.unwrap(), vec![7]);
        assert_eq!(calls, 1);
        assert!(q.is_empty(), "fresh capture is not left in the queue");
    }

    #[test]
    fn capture_error_propagates() {
        let q: CaptureQueue<u32> = CaptureQueue::new(10, OverflowPolicy::Reject);
        let out = q.drain_or_capture(|| Err("no screen"));
        assert_eq!(out, Err("no screen"));
    }

    #[test]
    fn new_generation_after_drain() {
        let q = CaptureQueue::new(10, OverflowPolicy::Reject);
        q.enqueue(1);
        let _: Result<_, ()> = q.drain_or_capture(|| Ok(0));
        assert_eq!(q.enqueue(2), EnqueueOutcome::Queued(1));
    }

    #[test]
    fn reject_policy_keeps_existing_items() {
        let q = CaptureQueue::new(2, OverflowPolicy::Reject);
        assert_eq!(q.enqueue('a'), EnqueueOutcome::Queued(1));
        assert_eq!(q.enqueue('b'), EnqueueOutcome::Queued(2));
        assert_eq!(q.enqueue('c'), EnqueueOutcome::Rejected);
        let out: Result<_, ()> = q.drain_or_capture(|| Ok('z'));
        assert_eq!(out.unwrap(), vec!['a', 'b']);
    }

    #[test]
    fn drop_oldest_policy_evicts_head() {
        let q = CaptureQueue::new(2, OverflowPolicy::DropOldest);
        q.enqueue('a');
        q.enqueue('b');
        assert_eq!(q.enqueue('c'), EnqueueOutcome::DroppedOldest(2));
        let out: Result<_, ()> = q.drain_or_capture(|| Ok('z'));
        assert_eq!(out.unwrap(), vec!['b', 'c']);
    }

    #[test]
    fn shrinking_limit_evicts_oldest() {
        let q = CaptureQueue::new(5, OverflowPolicy::Reject);
        for i in 0..5 {
            q.enqueue(i);
        }
        q.set_limit(2, OverflowPolicy::DropOldest);
        assert_eq!(q.len(), 2);
        let out: Result<_, ()> = q.drain_or_capture(|| Ok(99));
        assert_eq!(out.unwrap(), vec![3, 4]);
    }

    #[test]
    fn concurrent_enqueues_are_not_lost() {
        let q = Arc::new(CaptureQueue::new(1000, OverflowPolicy::Reject));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        q.enqueue(t * 100 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(q.len(), 400);
    }
}

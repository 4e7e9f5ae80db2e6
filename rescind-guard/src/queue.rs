//! Multi-producer, single-consumer FIFOs used by the guard.
//!
//! Producers (guard API callers) only ever push. Scanning and popping are
//! crate-private and reserved for the reclaimer.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use rescind_core::{CallHandle, RevokeEvent};

/// An outgoing call waiting to be observed complete.
#[derive(Clone)]
pub struct OutgoingRecord {
    /// Completion capability of the call
    pub handle: Arc<dyn CallHandle>,
    /// When the call was dispatched
    pub dispatched_at: DateTime<Utc>,
}

impl fmt::Debug for OutgoingRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingRecord")
            .field("dispatched_at", &self.dispatched_at)
            .field("completed", &self.handle.is_completed())
            .finish()
    }
}

/// FIFO of in-flight outgoing calls, in registration order.
pub type OutgoingLedger = SweepQueue<OutgoingRecord>;

/// FIFO of accepted revoke events, in arrival order.
pub type RevokeEventLog = SweepQueue<RevokeEvent>;

/// A mutex-protected deque with a push-only public surface.
///
/// The lock is held only for a single push or pop; `pop_front_if` also
/// runs its predicate under the lock, so predicates must be cheap.
pub struct SweepQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> SweepQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends an item at the tail.
    pub fn push(&self, item: T) {
        self.items.lock().push_back(item);
    }

    /// Returns the number of queued items.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Pops the head if it satisfies `pred`.
    pub(crate) fn pop_front_if(&self, pred: impl FnOnce(&T) -> bool) -> Option<T> {
        let mut items = self.items.lock();
        if pred(items.front()?) {
            items.pop_front()
        } else {
            None
        }
    }

    /// Returns the smallest `f(item)` over every queued item.
    ///
    /// Scans the whole queue under the lock.
    pub(crate) fn min_with<K: Ord>(&self, f: impl Fn(&T) -> K) -> Option<K> {
        self.items.lock().iter().map(f).min()
    }

    /// Removes every item. Returns how many were removed.
    pub(crate) fn drain_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.items.lock());
        // Items (and any handles they own) are dropped outside the lock.
        drained.len()
    }
}

impl<T> Default for SweepQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SweepQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SweepQueue").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rescind_core::CompletionFlag;

    #[test]
    fn test_fifo_order() {
        let queue = SweepQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.pop_front_if(|_| true), Some(1));
        assert_eq!(queue.pop_front_if(|_| true), Some(2));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_min_with_scans_past_head() {
        let queue = SweepQueue::new();
        assert_eq!(queue.min_with(|v: &i32| *v), None);
        queue.push(100);
        queue.push(50);
        queue.push(70);
        assert_eq!(queue.min_with(|v| *v), Some(50));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_pop_front_if_stops_at_head() {
        let queue = SweepQueue::new();
        queue.push(5);
        queue.push(1);
        assert_eq!(queue.pop_front_if(|v| *v < 3), None);
        assert_eq!(queue.len(), 2);
        assert_eq!(SweepQueue::<u8>::new().pop_front_if(|_| true), None);
    }

    #[test]
    fn test_drain_all() {
        let queue = SweepQueue::new();
        for i in 0..10 {
            queue.push(i);
        }
        assert_eq!(queue.drain_all(), 10);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_outgoing_record_debug_shows_completion() {
        let flag = CompletionFlag::new();
        let record = OutgoingRecord {
            handle: Arc::new(flag.clone()),
            dispatched_at: DateTime::UNIX_EPOCH,
        };
        assert!(format!("{record:?}").contains("completed: false"));
        flag.complete();
        assert!(format!("{record:?}").contains("completed: true"));
    }
}

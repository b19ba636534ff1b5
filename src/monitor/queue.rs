//! Bounded value queue behind a data-change monitored item.

use std::collections::VecDeque;

use crate::status::StatusCode;
use crate::value::DataValue;

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    value: DataValue,
    error: Option<StatusCode>,
    overflow: bool,
}

/// Outcome of [`DataChangeQueue::enqueue`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// The queue was full and its oldest entry was dropped.
    DiscardedOldest,
    /// The queue was full and the new value was rejected.
    RejectedNewest,
}

/// FIFO of values with discard-oldest or discard-newest overflow handling.
///
/// On overflow exactly one retained entry carries the overflow bit: the
/// oldest remaining entry when discarding oldest, the newest retained entry
/// when discarding newest.
#[derive(Debug, Clone)]
pub struct DataChangeQueue {
    capacity: usize,
    discard_oldest: bool,
    entries: VecDeque<Entry>,
}

impl DataChangeQueue {
    /// An empty queue holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize, discard_oldest: bool) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            discard_oldest,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Maximum number of entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// True if overflow evicts the oldest entry.
    #[must_use]
    pub const fn discard_oldest(&self) -> bool {
        self.discard_oldest
    }

    /// Number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends an entry, applying the overflow policy.
    pub fn enqueue(&mut self, value: DataValue, error: Option<StatusCode>) -> EnqueueOutcome {
        if self.entries.len() < self.capacity {
            self.entries.push_back(Entry {
                value,
                error,
                overflow: false,
            });
            return EnqueueOutcome::Queued;
        }

        if self.discard_oldest {
            self.entries.pop_front();
            self.entries.push_back(Entry {
                value,
                error,
                overflow: false,
            });
            self.mark_front();
            EnqueueOutcome::DiscardedOldest
        } else {
            self.mark_back();
            EnqueueOutcome::RejectedNewest
        }
    }

    /// Removes the oldest entry, applying its overflow bit to the status.
    pub fn dequeue(&mut self) -> Option<(DataValue, Option<StatusCode>)> {
        let entry = self.entries.pop_front()?;
        let mut value = entry.value;
        let mut error = entry.error;
        if entry.overflow {
            value.status = value.status.with_overflow();
            error = error.map(StatusCode::with_overflow);
        }
        Some((value, error))
    }

    /// Resizes the queue, dropping entries per the discard policy.
    pub fn set_capacity(&mut self, capacity: usize, discard_oldest: bool) {
        self.capacity = capacity.max(1);
        self.discard_oldest = discard_oldest;
        if self.entries.len() <= self.capacity {
            return;
        }
        if discard_oldest {
            while self.entries.len() > self.capacity {
                self.entries.pop_front();
            }
            self.mark_front();
        } else {
            self.entries.truncate(self.capacity);
            self.mark_back();
        }
    }

    /// Drops all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn mark_front(&mut self) {
        for e in &mut self.entries {
            e.overflow = false;
        }
        if let Some(front) = self.entries.front_mut() {
            front.overflow = true;
        }
    }

    fn mark_back(&mut self) {
        for e in &mut self.entries {
            e.overflow = false;
        }
        if let Some(back) = self.entries.back_mut() {
            back.overflow = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Variant;

    fn dv(v: i32) -> DataValue {
        DataValue::new(v)
    }

    #[test]
    fn test_discard_oldest_keeps_latest_and_flags_overflow() {
        let mut q = DataChangeQueue::new(2, true);
        assert_eq!(q.enqueue(dv(1), None), EnqueueOutcome::Queued);
        assert_eq!(q.enqueue(dv(2), None), EnqueueOutcome::Queued);
        assert_eq!(q.enqueue(dv(3), None), EnqueueOutcome::DiscardedOldest);
        assert_eq!(q.len(), 2);

        let (first, _) = q.dequeue().unwrap();
        assert_eq!(first.value, Variant::Int32(2));
        assert!(first.status.is_overflow());
        let (second, _) = q.dequeue().unwrap();
        assert_eq!(second.value, Variant::Int32(3));
        assert!(!second.status.is_overflow());
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn test_discard_newest_rejects_and_flags_last_retained() {
        let mut q = DataChangeQueue::new(2, false);
        q.enqueue(dv(1), None);
        q.enqueue(dv(2), None);
        assert_eq!(q.enqueue(dv(3), None), EnqueueOutcome::RejectedNewest);
        let (a, _) = q.dequeue().unwrap();
        let (b, _) = q.dequeue().unwrap();
        assert_eq!(a.value, Variant::Int32(1));
        assert!(!a.status.is_overflow());
        assert_eq!(b.value, Variant::Int32(2));
        assert!(b.status.is_overflow());
    }

    #[test]
    fn test_overflow_bit_on_error_entry() {
        let mut q = DataChangeQueue::new(1, true);
        q.enqueue(dv(1), None);
        q.enqueue(DataValue::from_status(StatusCode::BAD_NO_DATA), Some(StatusCode::BAD_NO_DATA));
        let (value, error) = q.dequeue().unwrap();
        assert!(value.status.is_overflow());
        assert!(error.unwrap().is_overflow());
    }

    #[test]
    fn test_shrink_capacity() {
        let mut q = DataChangeQueue::new(4, true);
        for i in 0..4 {
            q.enqueue(dv(i), None);
        }
        q.set_capacity(2, true);
        assert_eq!(q.len(), 2);
        let (v, _) = q.dequeue().unwrap();
        assert_eq!(v.value, Variant::Int32(2));
        assert!(v.status.is_overflow());

        let mut q = DataChangeQueue::new(4, false);
        for i in 0..4 {
            q.enqueue(dv(i), None);
        }
        q.set_capacity(2, false);
        let (a, _) = q.dequeue().unwrap();
        let (b, _) = q.dequeue().unwrap();
        assert_eq!(a.value, Variant::Int32(0));
        assert_eq!(b.value, Variant::Int32(1));
        assert!(b.status.is_overflow());
    }
}

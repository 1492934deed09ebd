use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use mtc_core::{ChangeId, Observation};

pub const DEFAULT_BUFFER_LIMIT: usize = 50_000;

#[derive(Debug, Default)]
struct Inner {
    items: VecDeque<(ChangeId, Observation)>,
    keys: HashSet<ChangeId>,
}

/// FIFO of observations for buffer-mode adapters.
///
/// Items are keyed by content plus timestamp, so distinct historical values
/// of one data item are all kept and only perfect repeats collapse. At the
/// limit new items are refused; nothing already queued is evicted.
#[derive(Debug)]
pub struct ObservationQueue {
    inner: Mutex<Inner>,
    limit: usize,
}

impl ObservationQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            limit,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `false` when the queue is full or already holds this exact item.
    pub fn push(&self, observation: Observation) -> bool {
        let key = observation
            .change_id()
            .with_timestamp(observation.timestamp());

        let mut inner = self.lock();
        if inner.items.len() >= self.limit || inner.keys.contains(&key) {
            return false;
        }

        inner.keys.insert(key);
        inner.items.push_back((key, observation));
        true
    }

    /// Copies the queue without removing anything.
    pub fn snapshot(&self) -> Vec<Observation> {
        self.lock()
            .items
            .iter()
            .map(|(_, observation)| observation.clone())
            .collect()
    }

    /// Drops the `count` oldest items once they are confirmed sent.
    pub fn drain_front(&self, count: usize) {
        let mut inner = self.lock();
        let count = count.min(inner.items.len());
        let drained: Vec<_> = inner.items.drain(..count).collect();
        for (key, _) in drained {
            inner.keys.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use mtc_core::{DataItem, Timestamp};

    use super::*;

    #[test]
    fn refuses_past_limit() {
        let queue = ObservationQueue::new(2);
        assert!(queue.push(DataItem::new("a", 1.0).into()));
        assert!(queue.push(DataItem::new("b", 1.0).into()));
        assert!(!queue.push(DataItem::new("c", 1.0).into()));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn collapses_only_perfect_repeats() {
        let queue = ObservationQueue::new(10);
        let first = DataItem::new("a", 1.0).at(Timestamp(10));
        assert!(queue.push(first.clone().into()));
        assert!(!queue.push(first.into()));
        assert!(queue.push(DataItem::new("a", 1.0).at(Timestamp(11)).into()));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn drained_items_can_be_queued_again() {
        let queue = ObservationQueue::new(10);
        let item: Observation = DataItem::new("a", 1.0).at(Timestamp(10)).into();
        queue.push(item.clone());
        queue.push(DataItem::new("b", 1.0).into());

        queue.drain_front(1);
        assert_eq!(queue.snapshot(), vec![DataItem::new("b", 1.0).into()]);
        assert!(queue.push(item));
    }
}

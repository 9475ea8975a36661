//! Append-only snapshot log for time travel.

use std::collections::VecDeque;

use switchyard_store::SerializedState;

/// Recorded snapshots, addressed by absolute index.
///
/// With a capacity, the oldest snapshots are evicted once it is reached.
/// Indices never shift: an evicted index simply misses.
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: VecDeque<SerializedState>,
    evicted: usize,
    capacity: Option<usize>,
}

impl History {
    /// `capacity` of `None` keeps every snapshot. A capacity of zero is
    /// treated as one.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: VecDeque::new(),
            evicted: 0,
            capacity: capacity.map(|c| c.max(1)),
        }
    }

    /// Append a snapshot and return its index.
    pub fn record(&mut self, state: SerializedState) -> usize {
        if let Some(capacity) = self.capacity {
            while self.entries.len() >= capacity {
                self.entries.pop_front();
                self.evicted += 1;
            }
        }
        self.entries.push_back(state);
        self.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&SerializedState> {
        index
            .checked_sub(self.evicted)
            .and_then(|i| self.entries.get(i))
    }

    /// Total snapshots ever recorded, evicted ones included.
    pub fn len(&self) -> usize {
        self.evicted + self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Smallest index still retained.
    pub fn first_index(&self) -> usize {
        self.evicted
    }

    pub fn retained(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(tag: u8) -> SerializedState {
        SerializedState::new(vec![tag])
    }

    #[test]
    fn unbounded_history_keeps_everything() {
        let mut history = History::new(None);
        assert_eq!(history.record(snap(0)), 0);
        assert_eq!(history.record(snap(1)), 1);
        assert_eq!(history.get(0), Some(&snap(0)));
        assert_eq!(history.get(1), Some(&snap(1)));
        assert_eq!(history.get(2), None);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn bounded_history_evicts_oldest_without_reindexing() {
        let mut history = History::new(Some(2));
        for tag in 0..4 {
            history.record(snap(tag));
        }
        assert_eq!(history.len(), 4);
        assert_eq!(history.retained(), 2);
        assert_eq!(history.first_index(), 2);
        assert_eq!(history.get(1), None);
        assert_eq!(history.get(2), Some(&snap(2)));
        assert_eq!(history.get(3), Some(&snap(3)));
    }

    #[test]
    fn zero_capacity_behaves_as_one() {
        let mut history = History::new(Some(0));
        history.record(snap(0));
        history.record(snap(1));
        assert_eq!(history.retained(), 1);
        assert_eq!(history.get(1), Some(&snap(1)));
    }
}

use std::collections::VecDeque;

/// Bounded FIFO of recently delivered messages.
///
/// `push` is O(1) and evicts the oldest entry once `capacity` is reached, so memory stays bounded
/// no matter how chatty the push channel gets.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageHistory<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> MessageHistory<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `item`, returning the evicted entry when the history was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        // Capacity 0 keeps nothing; without the guard the deque would grow unbounded.
        if self.capacity == 0 {
            return Some(item);
        }

        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(item);
        evicted
    }

    /// Most recent entry.
    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn oldest(&self) -> Option<&T> {
        self.entries.front()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T: Clone> MessageHistory<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }
}

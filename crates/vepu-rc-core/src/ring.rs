//! Fixed-capacity history ring
//!
//! Every model in the controller keeps a short rolling window of
//! observations. [`BoundedRing`] holds at most `capacity` entries; once full,
//! each push overwrites the oldest entry and hands it back.

/// Ring buffer with a capacity fixed at construction
#[derive(Debug, Clone)]
pub struct BoundedRing<T> {
    /// Valid entries, at most `capacity`
    slots: Vec<T>,

    /// Maximum number of entries
    capacity: usize,

    /// Index of the oldest entry once the ring is full (write position)
    cursor: usize,
}

impl<T> BoundedRing<T> {
    /// Create an empty ring holding up to `capacity` entries (at least 1)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            cursor: 0,
        }
    }

    /// Append an entry, returning the evicted oldest entry when full
    pub fn push(&mut self, value: T) -> Option<T> {
        if self.slots.len() < self.capacity {
            self.slots.push(value);
            return None;
        }

        let evicted = std::mem::replace(&mut self.slots[self.cursor], value);
        self.cursor = (self.cursor + 1) % self.capacity;
        Some(evicted)
    }

    /// First entry (oldest to newest) matching `predicate`
    pub fn find_mut<F>(&mut self, mut predicate: F) -> Option<&mut T>
    where
        F: FnMut(&T) -> bool,
    {
        self.slots.iter_mut().find(|entry| predicate(entry))
    }

    /// Iterate over valid entries from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let (newer, older) = self.slots.split_at(self.cursor);
        older.iter().chain(newer.iter())
    }

    /// Most recently written entry
    #[must_use]
    pub fn newest(&self) -> Option<&T> {
        if self.slots.len() < self.capacity {
            self.slots.last()
        } else {
            let idx = (self.cursor + self.capacity - 1) % self.capacity;
            self.slots.get(idx)
        }
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.slots.clear();
        self.cursor = 0;
    }

    /// Number of valid entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when no entry has been pushed since creation or the last clear
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Maximum number of entries
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True once every slot holds a value
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.slots.len() == self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_until_full() {
        let mut ring = BoundedRing::new(3);
        assert!(ring.is_empty());
        assert_eq!(ring.push(1), None);
        assert_eq!(ring.push(2), None);
        assert_eq!(ring.push(3), None);
        assert!(ring.is_full());
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_push_evicts_oldest() {
        let mut ring = BoundedRing::new(3);
        for v in 1..=3 {
            ring.push(v);
        }
        assert_eq!(ring.push(4), Some(1));
        assert_eq!(ring.push(5), Some(2));
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(ring.newest(), Some(&5));
    }

    #[test]
    fn test_find_mut_and_clear() {
        let mut ring = BoundedRing::new(4);
        ring.push((10, 1));
        ring.push((20, 2));

        if let Some(entry) = ring.find_mut(|e| e.0 == 20) {
            entry.1 = 7;
        }
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![(10, 1), (20, 7)]);
        assert!(ring.find_mut(|e| e.0 == 30).is_none());

        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.newest(), None);
        assert_eq!(ring.capacity(), 4);
    }

    #[test]
    fn test_zero_capacity_is_promoted() {
        let mut ring = BoundedRing::new(0);
        assert_eq!(ring.capacity(), 1);
        ring.push('a');
        assert_eq!(ring.push('b'), Some('a'));
        assert_eq!(ring.newest(), Some(&'b'));
    }
}

//! Open list for best-first searches
//!
//! A 4-ary min-heap of node indices keyed by their F score. A wider fan-out
//! makes the heap shallower, so sift-up touches fewer levels while sift-down
//! compares up to four children per level.

use navgraph_common::{Error, NodeIndex, Result};

/// Number of children per heap node
pub const BRANCHING_FACTOR: usize = 4;

/// Largest number of live entries the heap will hold
pub const MAX_HEAP_SIZE: usize = 1 << 18;

/// Smallest capacity increment when the heap grows
const MIN_GROWTH: usize = 4;

/// Node index with the priority it was pushed with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapEntry {
    pub node: NodeIndex,
    pub priority: u32,
}

/// Min-heap with branching factor [`BRANCHING_FACTOR`]
#[derive(Debug, Clone)]
pub struct BinaryHeap {
    entries: Vec<HeapEntry>,
    /// Logical capacity, grown by doubling and capped at [`MAX_HEAP_SIZE`]
    capacity: usize,
}

impl BinaryHeap {
    /// Creates a heap able to hold `capacity` entries before growing
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(MAX_HEAP_SIZE);
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Removes every entry, keeping the allocation
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entry with the lowest priority
    pub fn peek(&self) -> Option<&HeapEntry> {
        self.entries.first()
    }

    /// Pushes `node` with `priority`.
    ///
    /// Fails with [`Error::HeapOvergrown`] once the heap would need more than
    /// [`MAX_HEAP_SIZE`] entries.
    pub fn insert(&mut self, node: NodeIndex, priority: u32) -> Result<()> {
        if self.entries.len() == self.capacity {
            self.grow()?;
        }

        self.entries.push(HeapEntry { node, priority });
        let last = self.entries.len() - 1;
        self.sift_up(last);
        Ok(())
    }

    /// Removes and returns the node with the lowest priority
    pub fn extract_min(&mut self) -> Result<NodeIndex> {
        self.extract_min_entry().map(|entry| entry.node)
    }

    /// Removes and returns the lowest entry together with its priority
    pub fn extract_min_entry(&mut self) -> Result<HeapEntry> {
        if self.entries.is_empty() {
            return Err(Error::EmptyHeap);
        }

        let top = self.entries.swap_remove(0);
        if !self.entries.is_empty() {
            self.sift_down(0);
        }
        Ok(top)
    }

    /// Re-reads every priority through `priority_of` and restores the heap
    /// order in place.
    ///
    /// Needed when priorities of queued nodes change outside the heap, for
    /// example after the heuristic target moved.
    pub fn rebuild(&mut self, mut priority_of: impl FnMut(NodeIndex) -> u32) {
        for entry in &mut self.entries {
            entry.priority = priority_of(entry.node);
        }

        if self.entries.len() < 2 {
            return;
        }
        let last_parent = (self.entries.len() - 2) / BRANCHING_FACTOR;
        for i in (0..=last_parent).rev() {
            self.sift_down(i);
        }
    }

    /// Gets memory used by the heap
    pub fn get_mem_used(&self) -> usize {
        std::mem::size_of::<Self>() + std::mem::size_of::<HeapEntry>() * self.entries.capacity()
    }

    fn grow(&mut self) -> Result<()> {
        if self.capacity >= MAX_HEAP_SIZE {
            return Err(Error::HeapOvergrown {
                capacity: MAX_HEAP_SIZE,
            });
        }

        let new_capacity = (self.capacity * 2)
            .max(self.capacity + MIN_GROWTH)
            .min(MAX_HEAP_SIZE);
        self.entries.reserve_exact(new_capacity - self.entries.len());
        self.capacity = new_capacity;
        Ok(())
    }

    fn sift_up(&mut self, mut i: usize) {
        let entry = self.entries[i];

        while i > 0 {
            let parent = (i - 1) / BRANCHING_FACTOR;
            if entry.priority >= self.entries[parent].priority {
                break;
            }

            self.entries[i] = self.entries[parent];
            i = parent;
        }

        self.entries[i] = entry;
    }

    fn sift_down(&mut self, mut i: usize) {
        let entry = self.entries[i];
        let len = self.entries.len();

        loop {
            let first_child = i * BRANCHING_FACTOR + 1;
            if first_child >= len {
                break;
            }

            let last_child = (first_child + BRANCHING_FACTOR).min(len);
            let mut min_child = first_child;
            for child in first_child + 1..last_child {
                if self.entries[child].priority < self.entries[min_child].priority {
                    min_child = child;
                }
            }

            if entry.priority <= self.entries[min_child].priority {
                break;
            }

            self.entries[i] = self.entries[min_child];
            i = min_child;
        }

        self.entries[i] = entry;
    }

    #[cfg(test)]
    fn is_valid_heap(&self) -> bool {
        (1..self.entries.len()).all(|i| {
            let parent = (i - 1) / BRANCHING_FACTOR;
            self.entries[parent].priority <= self.entries[i].priority
        })
    }
}

impl Default for BinaryHeap {
    fn default() -> Self {
        Self::new(128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_in_priority_order() {
        let mut heap = BinaryHeap::new(4);
        for (node, priority) in [5u32, 3, 8, 1, 9, 2].into_iter().enumerate() {
            heap.insert(node as NodeIndex + 1, priority).unwrap();
        }

        let mut priorities = Vec::new();
        while let Ok(entry) = heap.extract_min_entry() {
            priorities.push(entry.priority);
        }
        assert_eq!(priorities, vec![1, 2, 3, 5, 8, 9]);
    }

    #[test]
    fn test_extract_returns_nodes() {
        let mut heap = BinaryHeap::default();
        heap.insert(10, 7).unwrap();
        heap.insert(20, 3).unwrap();
        heap.insert(30, 5).unwrap();

        assert_eq!(heap.peek().map(|e| e.node), Some(20));
        assert_eq!(heap.extract_min().unwrap(), 20);
        assert_eq!(heap.extract_min().unwrap(), 30);
        assert_eq!(heap.extract_min().unwrap(), 10);
        assert!(heap.is_empty());
    }

    #[test]
    fn test_extract_from_empty_heap() {
        let mut heap = BinaryHeap::new(0);
        assert!(matches!(heap.extract_min(), Err(Error::EmptyHeap)));
    }

    #[test]
    fn test_non_decreasing_output_with_duplicates() {
        let mut heap = BinaryHeap::new(0);
        // Deterministic scrambled sequence with plenty of duplicate priorities
        let mut value = 17u32;
        for node in 1..=500 {
            value = value.wrapping_mul(1103515245).wrapping_add(12345);
            heap.insert(node, (value >> 16) % 64).unwrap();
            assert!(heap.is_valid_heap());
        }

        let mut last = 0;
        while let Ok(entry) = heap.extract_min_entry() {
            assert!(entry.priority >= last);
            last = entry.priority;
        }
    }

    #[test]
    fn test_growth_policy() {
        let mut heap = BinaryHeap::new(0);
        heap.insert(1, 1).unwrap();
        assert_eq!(heap.capacity(), 4);
        for node in 2..=5 {
            heap.insert(node, node).unwrap();
        }
        assert_eq!(heap.capacity(), 8);

        heap.clear();
        assert!(heap.is_empty());
        assert_eq!(heap.capacity(), 8);
    }

    #[test]
    fn test_overgrown_heap_fails() {
        let mut heap = BinaryHeap::new(100);
        for node in 0..MAX_HEAP_SIZE {
            heap.insert(node as NodeIndex, (node % 1000) as u32).unwrap();
        }
        assert_eq!(heap.capacity(), MAX_HEAP_SIZE);

        let err = heap.insert(1, 1).unwrap_err();
        assert!(matches!(err, Error::HeapOvergrown { capacity } if capacity == MAX_HEAP_SIZE));
        assert!(err.is_fatal());
        assert_eq!(heap.len(), MAX_HEAP_SIZE);
    }

    #[test]
    fn test_rebuild_after_priority_change() {
        let mut heap = BinaryHeap::new(16);
        for node in 1..=10u32 {
            heap.insert(node, node * 10).unwrap();
        }

        // Reverse the ordering: higher node index now means lower priority
        heap.rebuild(|node| 1000 - node);
        assert!(heap.is_valid_heap());
        assert_eq!(heap.extract_min().unwrap(), 10);
        assert_eq!(heap.extract_min().unwrap(), 9);
    }
}

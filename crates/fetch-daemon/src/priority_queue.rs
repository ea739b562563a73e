//! Eviction priority queue
//!
//! An array-backed binary min-heap of entry ids ordered by ascending
//! priority. The heap does not own the entries: priorities and heap
//! positions live on the entries themselves, reached through [`HeapSlots`].
//! Every swap writes the new position back, so a live entry can always find
//! and fix its own slot in O(log n).

use fetch_core::Priority;

/// Handle of an entry in the store's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(usize);

impl EntryId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

/// Storage the heap reads priorities from and writes positions into
pub trait HeapSlots {
    fn priority(&self, id: EntryId) -> Priority;
    fn heap_index(&self, id: EntryId) -> Option<usize>;
    fn set_heap_index(&mut self, id: EntryId, index: Option<usize>);
}

/// Binary min-heap keyed by entry priority
#[derive(Debug, Default)]
pub struct PriorityQueue {
    heap: Vec<EntryId>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Entry with the lowest priority, without removing it
    pub fn peek_min(&self) -> Option<EntryId> {
        self.heap.first().copied()
    }

    /// Iterate over queued ids in heap order
    pub fn iter(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.heap.iter().copied()
    }

    /// Insert an entry
    pub fn push<S: HeapSlots>(&mut self, id: EntryId, slots: &mut S) {
        let index = self.heap.len();
        self.heap.push(id);
        slots.set_heap_index(id, Some(index));
        self.sift_up(index, slots);
    }

    /// Remove and return the lowest-priority entry
    pub fn pop_min<S: HeapSlots>(&mut self, slots: &mut S) -> Option<EntryId> {
        let last = self.heap.len().checked_sub(1)?;
        self.swap(0, last, slots);
        let id = self.heap.pop()?;
        slots.set_heap_index(id, None);
        if !self.heap.is_empty() {
            self.sift_down(0, slots);
        }
        Some(id)
    }

    /// Restore heap order after the entry's priority changed
    pub fn fix<S: HeapSlots>(&mut self, id: EntryId, slots: &mut S) {
        let Some(index) = slots.heap_index(id) else {
            return;
        };
        if !self.sift_down(index, slots) {
            self.sift_up(index, slots);
        }
    }

    /// Remove an arbitrary entry, returns false if it was not queued
    pub fn remove<S: HeapSlots>(&mut self, id: EntryId, slots: &mut S) -> bool {
        let Some(index) = slots.heap_index(id) else {
            return false;
        };
        let last = self.heap.len() - 1;
        if index != last {
            self.swap(index, last, slots);
        }
        self.heap.pop();
        slots.set_heap_index(id, None);
        if index < self.heap.len() && !self.sift_down(index, slots) {
            self.sift_up(index, slots);
        }
        true
    }

    fn less<S: HeapSlots>(&self, a: usize, b: usize, slots: &S) -> bool {
        slots.priority(self.heap[a]) < slots.priority(self.heap[b])
    }

    fn swap<S: HeapSlots>(&mut self, a: usize, b: usize, slots: &mut S) {
        self.heap.swap(a, b);
        slots.set_heap_index(self.heap[a], Some(a));
        slots.set_heap_index(self.heap[b], Some(b));
    }

    fn sift_up<S: HeapSlots>(&mut self, mut index: usize, slots: &mut S) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if !self.less(index, parent, slots) {
                break;
            }
            self.swap(index, parent, slots);
            index = parent;
        }
    }

    /// Returns true if the element moved
    fn sift_down<S: HeapSlots>(&mut self, start: usize, slots: &mut S) -> bool {
        let len = self.heap.len();
        let mut index = start;
        loop {
            let left = 2 * index + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && self.less(right, left, slots) {
                right
            } else {
                left
            };
            if !self.less(child, index, slots) {
                break;
            }
            self.swap(index, child, slots);
            index = child;
        }
        index > start
    }
}

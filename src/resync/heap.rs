//! Indexed min-heap of timer deadlines
//!
//! A plain `BinaryHeap` cannot move an entry that is already queued. The
//! side index maps each key to its slot so a re-enqueue can reset the
//! deadline in place in O(log n).

use std::collections::HashMap;
use std::hash::Hash;

use tokio::time::Instant;

#[derive(Debug)]
struct Entry<T> {
    deadline: Instant,
    key: T,
}

#[derive(Debug)]
pub struct TimerHeap<T> {
    entries: Vec<Entry<T>>,
    index: HashMap<T, usize>,
}

impl<T> Default for TimerHeap<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T> TimerHeap<T>
where
    T: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &T) -> bool {
        self.index.contains_key(key)
    }

    /// Queue `key` for `deadline`, replacing any deadline it already had
    pub fn push_or_reset(&mut self, key: T, deadline: Instant) {
        if let Some(&slot) = self.index.get(&key) {
            self.entries[slot].deadline = deadline;
            self.fix(slot);
            return;
        }
        let slot = self.entries.len();
        self.index.insert(key.clone(), slot);
        self.entries.push(Entry { deadline, key });
        self.sift_up(slot);
    }

    /// Drop `key` from the queue. Returns whether it was queued.
    pub fn remove(&mut self, key: &T) -> bool {
        let Some(slot) = self.index.remove(key) else {
            return false;
        };
        let last = self.entries.len() - 1;
        self.entries.swap(slot, last);
        self.entries.pop();
        if slot < self.entries.len() {
            self.index.insert(self.entries[slot].key.clone(), slot);
            self.fix(slot);
        }
        true
    }

    pub fn peek_deadline(&self) -> Option<Instant> {
        self.entries.first().map(|e| e.deadline)
    }

    /// Remove and return every key whose deadline is at or before `now`,
    /// earliest first
    pub fn pop_expired(&mut self, now: Instant) -> Vec<T> {
        let mut expired = Vec::new();
        while self.peek_deadline().is_some_and(|d| d <= now) {
            if let Some(key) = self.pop_min() {
                expired.push(key);
            }
        }
        expired
    }

    fn pop_min(&mut self) -> Option<T> {
        if self.entries.is_empty() {
            return None;
        }
        let last = self.entries.len() - 1;
        self.entries.swap(0, last);
        let entry = self.entries.pop()?;
        self.index.remove(&entry.key);
        if !self.entries.is_empty() {
            self.index.insert(self.entries[0].key.clone(), 0);
            self.sift_down(0);
        }
        Some(entry.key)
    }

    fn fix(&mut self, slot: usize) {
        if !self.sift_up(slot) {
            self.sift_down(slot);
        }
    }

    fn sift_up(&mut self, mut slot: usize) -> bool {
        let start = slot;
        while slot > 0 {
            let parent = (slot - 1) / 2;
            if self.entries[slot].deadline >= self.entries[parent].deadline {
                break;
            }
            self.swap(slot, parent);
            slot = parent;
        }
        slot != start
    }

    fn sift_down(&mut self, mut slot: usize) {
        let len = self.entries.len();
        loop {
            let left = 2 * slot + 1;
            let right = left + 1;
            let mut smallest = slot;
            if left < len && self.entries[left].deadline < self.entries[smallest].deadline {
                smallest = left;
            }
            if right < len && self.entries[right].deadline < self.entries[smallest].deadline {
                smallest = right;
            }
            if smallest == slot {
                return;
            }
            self.swap(slot, smallest);
            slot = smallest;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.entries.swap(a, b);
        self.index.insert(self.entries[a].key.clone(), a);
        self.index.insert(self.entries[b].key.clone(), b);
    }
}

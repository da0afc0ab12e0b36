//! Bounded seen-id set: suppress duplicate frames and self-echo.

use std::collections::{HashSet, VecDeque};

/// How many ids the set holds before trimming.
pub const MAX_SEEN: usize = 1000;
/// How many ids one trim evicts.
pub const EVICT_BATCH: usize = 500;

/// Insertion-ordered bounded set of message ids.
///
/// Membership is O(1) via the hash set; the ring remembers insertion order so
/// trimming evicts the oldest ids first. An evicted id that shows up again is
/// treated as new — the cache is approximate, which is acceptable because
/// duplicates on a broadcast medium arrive close to the original.
#[derive(Debug, Default)]
pub struct SeenIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl SeenIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an id. Returns false if it was already present (a duplicate).
    /// Trims the oldest [`EVICT_BATCH`] ids when the set grows past [`MAX_SEEN`].
    pub fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        self.ids.insert(id.to_string());
        self.order.push_back(id.to_string());
        if self.order.len() > MAX_SEEN {
            for _ in 0..EVICT_BATCH {
                if let Some(old) = self.order.pop_front() {
                    self.ids.remove(&old);
                }
            }
        }
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.ids.clear();
    }
}

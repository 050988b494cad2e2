//! In-process memory tier.
//!
//! [`LruIndex`] is a bounded LRU map: a `HashMap` from key to slot, plus a
//! doubly linked recency list threaded through a slab of nodes by index.
//! Every operation is O(1) on average. [`MemoryTier`] wraps it in a single
//! reader/writer lock; the lock is never held across disk I/O.

use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::entry::Entry;
use super::fingerprint::Fingerprint;

struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Bounded map with least-recently-used eviction.
pub struct LruIndex<K, V> {
    map: HashMap<K, usize>,
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    /// Most recently used.
    head: Option<usize>,
    /// Least recently used.
    tail: Option<usize>,
    capacity: usize,
}

impl<K: Hash + Eq + Clone, V> LruIndex<K, V> {
    /// Create an index holding at most `capacity` entries (minimum one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            map: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: None,
            tail: None,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Look up a value and mark it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&mut V> {
        let idx = *self.map.get(key)?;
        self.move_to_front(idx);
        self.slots[idx].as_mut().map(|n| &mut n.value)
    }

    /// Look up a value without touching recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.slots[idx].as_ref().map(|n| &n.value)
    }

    /// Insert or replace a value, making it most recently used.
    ///
    /// When a new key arrives at capacity, the least recently used entry is
    /// evicted first and returned.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&idx) = self.map.get(&key) {
            if let Some(node) = self.slots[idx].as_mut() {
                node.value = value;
            }
            self.move_to_front(idx);
            return None;
        }

        let evicted = if self.map.len() >= self.capacity {
            self.pop_lru()
        } else {
            None
        };

        let node = Node {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.push_front(idx);
        self.map.insert(key, idx);
        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.map.remove(key)?;
        self.unlink(idx);
        self.free.push(idx);
        self.slots[idx].take().map(|n| n.value)
    }

    /// Remove and return the least recently used entry.
    pub fn pop_lru(&mut self) -> Option<(K, V)> {
        let idx = self.tail?;
        self.unlink(idx);
        self.free.push(idx);
        let node = self.slots[idx].take()?;
        self.map.remove(&node.key);
        Some((node.key, node.value))
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<K> {
        let mut out = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let Some(node) = self.slots[idx].as_ref() else {
                break;
            };
            out.push(node.key.clone());
            cursor = node.next;
        }
        out
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(node) = self.slots[idx].as_mut() {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(node) = self.slots[h].as_mut() {
                node.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match self.slots[idx].as_mut() {
            Some(node) => (node.prev.take(), node.next.take()),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(node) = self.slots[p].as_mut() {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.slots[n].as_mut() {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }
}

/// The bounded in-memory tier over cache entries.
///
/// A derived view of the persistent tier: it can be dropped at any time
/// without losing correctness.
pub struct MemoryTier {
    index: RwLock<LruIndex<Fingerprint, Entry>>,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        Self {
            index: RwLock::new(LruIndex::new(capacity)),
        }
    }

    /// Fetch an entry, marking it most recently used and recording the read.
    pub fn get(&self, fingerprint: &Fingerprint, now: DateTime<Utc>) -> Option<Entry> {
        let mut index = self.index.write();
        let entry = index.get(fingerprint)?;
        entry.touch(now);
        Some(entry.clone())
    }

    /// Insert an entry, evicting the least recently used one at capacity.
    pub fn put(&self, entry: Entry) {
        let evicted = self.index.write().put(entry.fingerprint, entry);
        if let Some((fp, _)) = evicted {
            tracing::trace!(fingerprint = %fp, "memory tier evicted entry");
        }
    }

    pub fn remove(&self, fingerprint: &Fingerprint) -> Option<Entry> {
        self.index.write().remove(fingerprint)
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.index.read().contains(fingerprint)
    }

    /// Last read time known to this tier, without affecting recency.
    pub fn peek_last_accessed(&self, fingerprint: &Fingerprint) -> Option<DateTime<Utc>> {
        self.index.read().peek(fingerprint).map(|e| e.last_accessed_at)
    }

    pub fn clear(&self) {
        self.index.write().clear();
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fingerprint::fingerprint;
    use pretty_assertions::assert_eq;

    #[test]
    fn exact_capacity_evicts_least_recent() {
        let mut lru = LruIndex::new(2);
        lru.put("A", 1);
        lru.put("B", 2);
        assert_eq!(lru.get(&"A"), Some(&mut 1));
        let evicted = lru.put("C", 3);
        assert_eq!(evicted, Some(("B", 2)));

        let mut keys = lru.keys();
        keys.sort();
        assert_eq!(keys, vec!["A", "C"]);
        assert_eq!(lru.len(), 2);
    }

    #[test]
    fn put_existing_key_replaces_without_eviction() {
        let mut lru = LruIndex::new(2);
        lru.put("A", 1);
        lru.put("B", 2);
        assert_eq!(lru.put("A", 10), None);
        assert_eq!(lru.peek(&"A"), Some(&10));
        assert_eq!(lru.keys(), vec!["A", "B"]);
    }

    #[test]
    fn peek_does_not_promote() {
        let mut lru = LruIndex::new(2);
        lru.put("A", 1);
        lru.put("B", 2);
        assert_eq!(lru.peek(&"A"), Some(&1));
        assert_eq!(lru.put("C", 3), Some(("A", 1)));
    }

    #[test]
    fn remove_and_reuse_slots() {
        let mut lru = LruIndex::new(3);
        lru.put(1, "a");
        lru.put(2, "b");
        lru.put(3, "c");
        assert_eq!(lru.remove(&2), Some("b"));
        assert_eq!(lru.remove(&2), None);
        lru.put(4, "d");
        assert_eq!(lru.keys(), vec![4, 3, 1]);
        assert_eq!(lru.slots.len(), 3);
    }

    #[test]
    fn pop_lru_drains_in_order() {
        let mut lru = LruIndex::new(3);
        lru.put(1, ());
        lru.put(2, ());
        lru.put(3, ());
        lru.get(&1);
        let order: Vec<_> = std::iter::from_fn(|| lru.pop_lru().map(|(k, _)| k)).collect();
        assert_eq!(order, vec![2, 3, 1]);
        assert!(lru.is_empty());
    }

    #[test]
    fn single_slot_capacity() {
        let mut lru = LruIndex::new(0);
        assert_eq!(lru.capacity(), 1);
        lru.put("x", 1);
        assert_eq!(lru.put("y", 2), Some(("x", 1)));
        assert_eq!(lru.keys(), vec!["y"]);
    }

    #[test]
    fn clear_resets() {
        let mut lru = LruIndex::new(2);
        lru.put(1, 1);
        lru.put(2, 2);
        lru.clear();
        assert!(lru.is_empty());
        assert!(lru.keys().is_empty());
        lru.put(3, 3);
        assert_eq!(lru.keys(), vec![3]);
    }

    #[test]
    fn tier_get_touches_entry() {
        let tier = MemoryTier::new(4);
        assert!(tier.is_empty());
        let t0 = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let t1 = chrono::DateTime::from_timestamp(1_700_000_100, 0).unwrap();
        let entry = Entry::new(fingerprint(b"a"), "v", t0, None).unwrap();
        let fp = entry.fingerprint;
        tier.put(entry);

        let got = tier.get(&fp, t1).unwrap();
        assert_eq!(got.last_accessed_at, t1);
        assert_eq!(tier.peek_last_accessed(&fp), Some(t1));
        assert!(tier.get(&fingerprint(b"b"), t1).is_none());

        tier.clear();
        assert!(tier.is_empty());
    }

    #[test]
    fn tier_exact_capacity_scenario() {
        let tier = MemoryTier::new(2);
        let now = Utc::now();
        let [a, b, c] = [b"A", b"B", b"C"].map(|k| Entry::new(fingerprint(k), "v", now, None).unwrap());
        let (fa, fb, fc) = (a.fingerprint, b.fingerprint, c.fingerprint);
        tier.put(a);
        tier.put(b);
        tier.get(&fa, now);
        tier.put(c);

        assert_eq!(tier.len(), 2);
        assert!(tier.contains(&fa));
        assert!(tier.contains(&fc));
        assert!(!tier.contains(&fb));
    }
}

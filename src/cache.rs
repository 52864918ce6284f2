//! # Summary
//!
//! Set-associative cache used by the master to answer reads without
//! contacting a slave. Keys are spread over a fixed number of shards, each
//! holding at most `capacity` entries in insertion order and guarded by its
//! own lock. Full shards evict with second chance (CLOCK): the sweep starts
//! at the head, unreferenced entries are evicted, and referenced entries
//! lose their bit and rotate to the tail.
//!
//! The cache does no locking on its own behalf. Callers take the shard lock
//! with [`Cache::lock`] and operate on the returned [`Shard`], so a cache
//! update can be combined atomically with other work on the same shard.

use std::collections::VecDeque;

use parking_lot::{Mutex, MutexGuard};

pub const DEFAULT_SHARDS: usize = 100;
pub const DEFAULT_CAPACITY: usize = 10;

#[derive(Debug)]
pub struct Cache {
    shards: Vec<Mutex<Shard>>,
    capacity: usize,
}

/// One independently locked bucket of the cache.
#[derive(Debug)]
pub struct Shard {
    entries: VecDeque<Entry>,
    capacity: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: String,
    pub referenced: bool,
}

/// Java-compatible 32-bit string hash, used only for shard selection.
fn shard_hash(key: &str) -> i32 {
    key.encode_utf16()
        .fold(0i32, |hash, c| hash.wrapping_mul(31).wrapping_add(i32::from(c)))
}

impl Cache {
    /// Panics if either dimension is zero.
    pub fn new(shards: usize, capacity: usize) -> Self {
        assert!(shards > 0, "[INTERNAL ERROR]: cache needs at least one shard");
        assert!(capacity > 0, "[INTERNAL ERROR]: cache shards need nonzero capacity");
        let shards = (0..shards)
            .map(|_| Mutex::new(Shard::new(capacity)))
            .collect();
        Cache { shards, capacity }
    }

    /// Shard holding `key`: `hash(key) mod shards`, normalized to non-negative.
    pub fn shard_index(&self, key: &str) -> usize {
        i64::from(shard_hash(key)).rem_euclid(self.shards.len() as i64) as usize
    }

    /// Locks the shard holding `key`.
    pub fn lock(&self, key: &str) -> MutexGuard<'_, Shard> {
        self.shards[self.shard_index(key)].lock()
    }

    /// Locks shard `index` directly.
    pub fn lock_shard(&self, index: usize) -> MutexGuard<'_, Shard> {
        self.shards[index].lock()
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total entries across all shards. Locks each shard in turn.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Cache {
    fn default() -> Self {
        Cache::new(DEFAULT_SHARDS, DEFAULT_CAPACITY)
    }
}

impl Shard {
    fn new(capacity: usize) -> Self {
        Shard {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns the cached value and marks the entry referenced.
    pub fn get(&mut self, key: &str) -> Option<String> {
        self.entries
            .iter_mut()
            .find(|entry| entry.key == key)
            .map(|entry| {
                entry.referenced = true;
                entry.value.clone()
            })
    }

    /// Overwrites an existing entry in place, or appends a new unreferenced
    /// entry at the tail, evicting first if the shard is full.
    pub fn put(&mut self, key: &str, value: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.key == key) {
            entry.value = value.to_string();
            entry.referenced = true;
            return
        }

        if self.entries.len() >= self.capacity {
            self.evict();
        }

        self.entries.push_back(Entry {
            key: key.to_string(),
            value: value.to_string(),
            referenced: false,
        });
    }

    pub fn del(&mut self, key: &str) {
        if let Some(index) = self.entries.iter().position(|entry| entry.key == key) {
            self.entries.remove(index);
        }
    }

    /// Second-chance sweep from the head. Terminates within two passes,
    /// since every referenced entry it passes over is cleared.
    fn evict(&mut self) {
        while let Some(mut head) = self.entries.pop_front() {
            if !head.referenced {
                trace!("evicting {:?}", head.key);
                return
            }
            head.referenced = false;
            self.entries.push_back(head);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries from head (next to be swept) to tail.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet as Set;
    use std::sync::Arc;
    use std::thread;

    use pretty_assertions::assert_eq;
    use rand::Rng;

    use super::*;

    fn keys(shard: &Shard) -> Vec<&str> {
        shard.iter().map(|entry| entry.key.as_str()).collect()
    }

    fn refs(shard: &Shard) -> Vec<bool> {
        shard.iter().map(|entry| entry.referenced).collect()
    }

    #[test]
    fn shard_selection_matches_string_hash() {
        let cache = Cache::new(3, 15);
        // "1" hashes to 49
        assert_eq!(cache.shard_index("1"), 1);
        assert_eq!(Cache::new(2, 1).shard_index("2"), 0);
        assert_eq!(Cache::new(2, 1).shard_index("1"), 1);
    }

    #[test]
    fn negative_hashes_are_normalized() {
        let key = "testingoutareallylongstringandseeinghowlongitshashcode";
        assert!(shard_hash(key) < 0);
        let cache = Cache::new(7, 1);
        assert!(cache.shard_index(key) < 7);
    }

    #[test]
    fn put_then_get() {
        let cache = Cache::new(1, 4);
        cache.lock("hello").put("hello", "world");
        assert_eq!(cache.lock("hello").get("hello").as_deref(), Some("world"));
        assert_eq!(cache.lock_shard(0).len(), 1);
    }

    #[test]
    fn repeated_put_overwrites_and_references() {
        let cache = Cache::new(1, 4);
        let mut shard = cache.lock("1");
        shard.put("1", "hello");
        shard.put("1", "is");
        assert_eq!(shard.len(), 1);
        assert_eq!(refs(&shard), vec![true]);
        assert_eq!(shard.get("1").as_deref(), Some("is"));
    }

    #[test]
    fn del_removes_only_the_key() {
        let cache = Cache::new(2, 4);
        cache.lock("1").put("1", "hi");
        cache.lock("2").put("2", "there");
        cache.lock("1").del("1");
        cache.lock("1").del("1");
        assert_eq!(cache.lock_shard(0).len(), 1);
        assert_eq!(cache.lock_shard(1).len(), 0);
        assert_eq!(cache.lock("1").get("1"), None);
        assert_eq!(cache.lock("2").get("2").as_deref(), Some("there"));
    }

    #[test]
    fn unit_capacity_evicts_previous_entry() {
        let cache = Cache::new(1, 1);
        let mut shard = cache.lock_shard(0);
        shard.put("hello", "world");
        assert_eq!(shard.get("hello").as_deref(), Some("world"));
        shard.put("foo", "bar");
        assert_eq!(shard.get("hello"), None);
        assert_eq!(shard.get("foo").as_deref(), Some("bar"));
        assert_eq!(shard.len(), 1);
    }

    #[test]
    fn all_referenced_evicts_oldest_after_full_sweep() {
        let cache = Cache::new(1, 4);
        let mut shard = cache.lock_shard(0);
        for (key, value) in &[("one", "hello"), ("two", "iris"), ("three", "is"), ("four", "awesome")] {
            shard.put(key, value);
        }
        for key in &["one", "two", "three", "four"] {
            assert!(shard.get(key).is_some());
        }
        shard.put("five", "YAY");
        assert_eq!(keys(&shard), vec!["two", "three", "four", "five"]);
        assert_eq!(refs(&shard), vec![false; 4]);
    }

    #[test]
    fn second_chance_sweep() {
        let cache = Cache::new(1, 4);
        let mut shard = cache.lock_shard(0);
        shard.put("B", "hi");
        shard.put("A", "there");
        shard.get("A");
        shard.put("D", "don't care");
        shard.put("C", "also don't care");
        assert_eq!(keys(&shard), vec!["B", "A", "D", "C"]);
        assert_eq!(refs(&shard), vec![false, true, false, false]);

        // B is unreferenced at the head, so the sweep stops there
        shard.put("F", "F arrives");
        assert_eq!(keys(&shard), vec!["A", "D", "C", "F"]);
        assert_eq!(refs(&shard), vec![true, false, false, false]);

        // A and D are spared once, cleared, and rotated; C is evicted
        shard.get("D");
        shard.put("E", "E arrives");
        assert_eq!(keys(&shard), vec!["F", "A", "D", "E"]);
        assert_eq!(refs(&shard), vec![false; 4]);
    }

    #[test]
    fn sharded_eviction_is_independent() {
        let cache = Cache::new(2, 3);
        for key in &["2", "4", "6"] {
            cache.lock(key).put(key, key);
        }
        assert_eq!(cache.lock_shard(0).len(), 3);
        assert_eq!(cache.lock_shard(1).len(), 0);
        for key in &["2", "4", "6"] {
            cache.lock(key).get(key);
        }
        cache.lock("8").put("8", "new");
        assert_eq!(keys(&cache.lock_shard(0)), vec!["4", "6", "8"]);
        for key in &["1", "3", "5"] {
            cache.lock(key).put(key, key);
        }
        assert_eq!(cache.lock_shard(0).len(), 3);
        assert_eq!(cache.lock_shard(1).len(), 3);
    }

    #[test]
    fn random_operations_preserve_shard_invariants() {
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let shards = rng.gen_range(1..5);
            let capacity = rng.gen_range(1..6);
            let cache = Cache::new(shards, capacity);
            for _ in 0..500 {
                let key = rng.gen_range(0..40).to_string();
                let mut shard = cache.lock(&key);
                match rng.gen_range(0..3) {
                | 0 => { shard.get(&key); }
                | 1 => shard.put(&key, "value"),
                | _ => shard.del(&key),
                }
            }
            for index in 0..shards {
                let shard = cache.lock_shard(index);
                let unique = shard.iter().map(|entry| &entry.key).collect::<Set<_>>();
                assert!(shard.len() <= capacity);
                assert_eq!(unique.len(), shard.len());
                assert!(shard.iter().all(|entry| cache.shard_index(&entry.key) == index));
            }
        }
    }

    #[test]
    fn concurrent_access_stays_bounded() {
        let cache = Arc::new(Cache::new(8, 4));
        let workers = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..2000 {
                        let key = ((i * 17 + t) % 256).to_string();
                        let mut shard = cache.lock(&key);
                        shard.put(&key, "value");
                        assert_eq!(shard.get(&key).as_deref(), Some("value"));
                    }
                })
            })
            .collect::<Vec<_>>();
        for worker in workers {
            worker.join().unwrap();
        }
        assert!(cache.len() <= cache.num_shards() * cache.capacity());
    }
}

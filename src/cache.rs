//! Bounded per-key counters for map-side pre-aggregation.
//!
//! A mapper that would otherwise emit `(key, 1)` for every record can count
//! into an [`AggregationCache`] instead and emit one `(key, n)` pair whenever
//! a key is evicted or the cache is flushed. This cuts the amount of data the
//! engine has to sort and shuffle.
//!
//! Eviction order is *insertion* order: incrementing a key that is already
//! cached does not move it. Downstream correctness only depends on every key
//! eventually being flushed, not on which key goes first.
//!
//! # Example
//!
//! ```
//! use mrstream::{AggregationCache, OnEvict};
//!
//! let mut total = 0;
//! let mut cache = AggregationCache::new(2, OnEvict(|_key: &str, n| total += n));
//! cache.increment("a", 1);
//! cache.increment("b", 1);
//! cache.increment("c", 1); // evicts "a"
//! cache.flush();
//! drop(cache);
//! assert_eq!(total, 3);
//! ```

use std::hash::Hash;

use fnv::FnvHashMap;

/// Receives entries leaving an [`AggregationCache`].
pub trait Evict<K> {
    fn evict(&mut self, key: K, value: i64);
}

/// Adapts a closure into an [`Evict`] sink.
pub struct OnEvict<F>(pub F);

impl<K, F: FnMut(K, i64)> Evict<K> for OnEvict<F> {
    fn evict(&mut self, key: K, value: i64) {
        (self.0)(key, value)
    }
}

/// Buffers evicted entries so an async mapper can drain and emit them
/// between increments.
impl<K> Evict<K> for Vec<(K, i64)> {
    fn evict(&mut self, key: K, value: i64) {
        self.push((key, value));
    }
}

const NIL: usize = usize::MAX;

struct Slot<K> {
    key: K,
    value: i64,
    prev: usize,
    next: usize,
}

/// A fixed-capacity map from key to running `i64` total.
///
/// Entries live in a pre-sized arena and are chained into a doubly linked
/// list by slot index; `newest` is the most recently inserted entry and
/// `oldest` the next eviction victim.
pub struct AggregationCache<K, E> {
    sink: E,
    index: FnvHashMap<K, usize>,
    slots: Vec<Slot<K>>,
    capacity: usize,
    newest: usize,
    oldest: usize,
}

impl<K, E> AggregationCache<K, E>
where
    K: Hash + Eq + Clone,
    E: Evict<K>,
{
    /// Creates an empty cache holding at most `capacity` keys.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize, sink: E) -> Self {
        assert!(capacity >= 1, "aggregation cache capacity must be at least 1");
        Self {
            sink,
            index: FnvHashMap::with_capacity_and_hasher(capacity, Default::default()),
            slots: Vec::with_capacity(capacity),
            capacity,
            newest: NIL,
            oldest: NIL,
        }
    }

    /// Adds `delta` to the counter for `key`, inserting it if needed.
    ///
    /// When a new key arrives at a full cache, the oldest inserted entry is
    /// handed to the sink first.
    pub fn increment(&mut self, key: K, delta: i64) {
        if let Some(&i) = self.index.get(&key) {
            self.slots[i].value += delta;
            return;
        }

        let i = if self.slots.len() == self.capacity {
            let i = self.unlink_oldest();
            let slot = &mut self.slots[i];
            let old_key = std::mem::replace(&mut slot.key, key.clone());
            let old_value = std::mem::replace(&mut slot.value, delta);
            self.index.remove(&old_key);
            self.sink.evict(old_key, old_value);
            i
        } else {
            self.slots.push(Slot {
                key: key.clone(),
                value: delta,
                prev: NIL,
                next: NIL,
            });
            self.slots.len() - 1
        };

        self.link_newest(i);
        self.index.insert(key, i);
    }

    /// Hands every entry to the sink, oldest first, and empties the cache.
    /// The capacity is unchanged.
    pub fn flush(&mut self) {
        let order = self.order();
        let mut slots: Vec<Option<Slot<K>>> =
            std::mem::replace(&mut self.slots, Vec::with_capacity(self.capacity))
                .into_iter()
                .map(Some)
                .collect();
        for i in order {
            if let Some(slot) = slots[i].take() {
                self.sink.evict(slot.key, slot.value);
            }
        }
        self.index.clear();
        self.newest = NIL;
        self.oldest = NIL;
    }

    /// Entries in eviction order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = (&K, i64)> + '_ {
        self.order().into_iter().map(move |i| {
            let slot = &self.slots[i];
            (&slot.key, slot.value)
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn sink(&self) -> &E {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut E {
        &mut self.sink
    }

    pub fn into_sink(self) -> E {
        self.sink
    }

    fn order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.slots.len());
        let mut i = self.oldest;
        while i != NIL {
            order.push(i);
            i = self.slots[i].next;
        }
        order
    }

    // Precondition: the list is not empty.
    fn unlink_oldest(&mut self) -> usize {
        let i = self.oldest;
        let next = self.slots[i].next;
        if next == NIL {
            self.newest = NIL;
        } else {
            self.slots[next].prev = NIL;
        }
        self.oldest = next;
        i
    }

    fn link_newest(&mut self, i: usize) {
        let prev = self.newest;
        {
            let slot = &mut self.slots[i];
            slot.prev = prev;
            slot.next = NIL;
        }
        if prev == NIL {
            self.oldest = i;
        } else {
            self.slots[prev].next = i;
        }
        self.newest = i;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_first_inserted_and_flushes_everything() {
        let mut cache = AggregationCache::new(4, Vec::new());
        cache.increment("key1", 1);
        cache.increment("key2", 1);
        cache.increment("key2", 1);
        cache.increment("key3", 1);
        cache.increment("key3", 1);
        cache.increment("key4", 1);
        cache.increment("key5", 1);

        assert_eq!(cache.sink().as_slice(), &[("key1", 1)]);
        assert_eq!(cache.len(), 4);

        cache.flush();
        let evicted = cache.sink();
        assert_eq!(evicted.len(), 5);
        assert_eq!(evicted.iter().map(|(_, v)| v).sum::<i64>(), 7);
        assert_eq!(
            evicted.iter().map(|(k, _)| *k).collect::<Vec<_>>(),
            vec!["key1", "key2", "key3", "key4", "key5"]
        );
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), 4);
    }

    #[test]
    fn increment_does_not_change_eviction_rank() {
        let mut cache = AggregationCache::new(2, Vec::new());
        cache.increment("a", 1);
        cache.increment("b", 1);
        cache.increment("a", 10);
        cache.increment("c", 1);

        // "a" was touched last but inserted first.
        assert_eq!(cache.sink().as_slice(), &[("a", 11)]);
        assert_eq!(
            cache.iter().collect::<Vec<_>>(),
            vec![(&"b", 1), (&"c", 1)]
        );
    }

    #[test]
    fn reusable_after_flush() {
        let mut flushed = Vec::new();
        {
            let mut cache =
                AggregationCache::new(1, OnEvict(|k: String, v| flushed.push((k, v))));
            cache.increment("x".to_string(), 2);
            cache.flush();
            cache.increment("y".to_string(), 3);
            cache.increment("z".to_string(), 4);
            cache.flush();
        }
        assert_eq!(
            flushed,
            vec![
                ("x".to_string(), 2),
                ("y".to_string(), 3),
                ("z".to_string(), 4)
            ]
        );
    }

    #[test]
    #[should_panic(expected = "capacity must be at least 1")]
    fn zero_capacity_is_fatal() {
        let _ = AggregationCache::<&str, _>::new(0, Vec::new());
    }
}

use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

/// A bounded key→value map with LRU eviction per bucket.
///
/// The capacity is split evenly across a power-of-two number of buckets;
/// each bucket evicts its own least-recently-used entry when full. Values
/// are handed out by clone, so they are typically `Arc`s.
#[derive(Debug)]
pub struct LruCache<K, V> {
    buckets: Box<[Mutex<Bucket<K, V>>]>,
    bucket_mask: usize,
    capacity_per_bucket: usize,
    stamp: AtomicU64,
    hasher: RandomState,
}

#[derive(Debug)]
struct Bucket<K, V> {
    entries: HashMap<K, Slot<V>>,
}

#[derive(Debug)]
struct Slot<V> {
    value: V,
    last_used: u64,
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries spread over
    /// `bucket_count` buckets (rounded up to a power of two).
    pub fn new(capacity: usize, bucket_count: usize) -> Self {
        let bucket_count = bucket_count.max(1).next_power_of_two();
        let capacity_per_bucket = (capacity / bucket_count).max(1);
        let buckets = (0..bucket_count)
            .map(|_| {
                Mutex::new(Bucket {
                    entries: HashMap::new(),
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            buckets,
            bucket_mask: bucket_count - 1,
            capacity_per_bucket,
            stamp: AtomicU64::new(0),
            hasher: RandomState::new(),
        }
    }

    fn bucket(&self, key: &K) -> &Mutex<Bucket<K, V>> {
        let mut hasher = self.hasher.build_hasher();
        key.hash(&mut hasher);
        &self.buckets[(hasher.finish() as usize) & self.bucket_mask]
    }

    fn next_stamp(&self) -> u64 {
        self.stamp.fetch_add(1, Ordering::Relaxed)
    }

    /// Look the key up, refreshing its recency.
    pub fn try_get(&self, key: &K) -> Option<V> {
        let mut bucket = self.bucket(key).lock();
        let stamp = self.next_stamp();
        bucket.entries.get_mut(key).map(|slot| {
            slot.last_used = stamp;
            slot.value.clone()
        })
    }

    /// Insert the value produced by `make` if the key is absent, otherwise
    /// return the resident value. The boolean is true when this call
    /// inserted.
    pub fn try_put_or_get(&self, key: &K, make: impl FnOnce() -> V) -> (V, bool) {
        let mut bucket = self.bucket(key).lock();
        let stamp = self.next_stamp();

        if let Some(slot) = bucket.entries.get_mut(key) {
            slot.last_used = stamp;
            return (slot.value.clone(), false);
        }

        if bucket.entries.len() >= self.capacity_per_bucket {
            Self::evict(&mut bucket);
        }

        let value = make();
        bucket.entries.insert(
            key.clone(),
            Slot {
                value: value.clone(),
                last_used: stamp,
            },
        );
        (value, true)
    }

    /// Remove and return the value under the key.
    pub fn try_remove(&self, key: &K) -> Option<V> {
        let mut bucket = self.bucket(key).lock();
        bucket.entries.remove(key).map(|slot| slot.value)
    }

    /// Remove the entry if it exists and the policy admits it. Returns
    /// whether an entry was removed.
    pub fn try_invalidate(&self, key: &K, policy: impl FnOnce(&V) -> bool) -> bool {
        let mut bucket = self.bucket(key).lock();
        match bucket.entries.get(key) {
            Some(slot) if policy(&slot.value) => {
                bucket.entries.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.lock().entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        for bucket in self.buckets.iter() {
            bucket.lock().entries.clear();
        }
    }

    fn evict(bucket: &mut Bucket<K, V>) {
        let victim = bucket
            .entries
            .iter()
            .min_by_key(|(_, slot)| slot.last_used)
            .map(|(key, _)| key.clone());
        if let Some(key) = victim {
            debug!("evicting least recently used cache entry");
            bucket.entries.remove(&key);
        }
    }
}

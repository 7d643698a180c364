//! Immutable hash table of persistent AVL buckets
//!
//! [`PersistentMap`] never changes after construction. Every mutation
//! returns a new map that copies the bucket array (a vector of `Arc`
//! pointers) and path-copies one AVL tree; all other buckets and subtrees
//! are shared with the previous version.
//!
//! [`ConcurrentBucketMap`] publishes the current version through an
//! [`AtomicSnapshot`]: lookups are lock-free, writers are serialized.

use crate::avl::{self, InsertMode, InsertOutcome, Tree};
use crate::snapshot::AtomicSnapshot;
use ahash::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash};

#[cfg(feature = "logging")]
use tracing::debug;

/// Bucket counts used when a map grows. Each is roughly double the previous.
const PRIMES: &[usize] = &[
    7, 17, 37, 79, 163, 331, 673, 1361, 2729, 5471, 10949, 21911, 43853, 87719, 175447, 350899,
    701819, 1403641, 2807303, 5614657, 11229331, 22458671, 44917381, 89834777, 179669557,
];

/// Sizing policy of a persistent map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapOptions {
    /// Bucket count of an empty map
    pub initial_buckets: usize,
    /// A bucket taller than this triggers a rehash before the next insert into it
    pub max_bucket_height: u32,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            initial_buckets: 7,
            max_bucket_height: 5,
        }
    }
}

/// Smallest table prime ≥ `needed`. Past the end of the table the size
/// simply keeps growing as the next odd number.
pub(crate) fn next_bucket_count(needed: usize) -> usize {
    PRIMES
        .iter()
        .copied()
        .find(|&p| p >= needed)
        .unwrap_or(needed | 1)
}

/// Immutable, structurally shared hash map.
pub struct PersistentMap<K, V, S = RandomState> {
    buckets: Box<[Tree<K, V>]>,
    len: usize,
    options: MapOptions,
    hasher: S,
}

impl<K, V> PersistentMap<K, V, RandomState> {
    pub fn new() -> Self {
        Self::with_options(MapOptions::default())
    }

    pub fn with_options(options: MapOptions) -> Self {
        Self::with_options_and_hasher(options, RandomState::new())
    }
}

impl<K, V> Default for PersistentMap<K, V, RandomState> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> PersistentMap<K, V, S> {
    pub fn with_options_and_hasher(options: MapOptions, hasher: S) -> Self {
        let count = next_bucket_count(options.initial_buckets.max(1));
        Self {
            buckets: vec![None; count].into_boxed_slice(),
            len: 0,
            options,
            hasher,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Height of the tallest bucket tree.
    pub fn max_height(&self) -> u32 {
        self.buckets.iter().map(avl::height).max().unwrap_or(0)
    }

    /// Visit every entry, bucket by bucket.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V)) {
        for bucket in self.buckets.iter() {
            avl::for_each(bucket, &mut |_, k, v| f(k, v));
        }
    }

    #[inline]
    fn bucket_of(&self, hash: u64) -> usize {
        (hash % self.buckets.len() as u64) as usize
    }
}

impl<K, V, S> PersistentMap<K, V, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher + Clone,
{
    /// Look up `key` in this version.
    #[inline]
    pub fn get(&self, key: &K) -> Option<&V> {
        let hash = self.hasher.hash_one(key);
        avl::find(&self.buckets[self.bucket_of(hash)], hash, key)
    }

    #[inline]
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// New version with `key` added, or `None` if `key` is already present.
    pub fn try_add(&self, key: K, value: V) -> Option<Self> {
        match self.insert(key, value, InsertMode::AddOnly) {
            (_, InsertOutcome::Existing) => None,
            (next, _) => Some(next),
        }
    }

    /// New version with `key` set to `value`; the flag is true when an
    /// existing value was replaced.
    pub fn add_or_replace(&self, key: K, value: V) -> (Self, bool) {
        let (next, outcome) = self.insert(key, value, InsertMode::Replace);
        (next, outcome == InsertOutcome::Replaced)
    }

    fn insert(&self, key: K, value: V, mode: InsertMode) -> (Self, InsertOutcome) {
        let hash = self.hasher.hash_one(&key);

        let exists = avl::find(&self.buckets[self.bucket_of(hash)], hash, &key).is_some();
        if exists && mode == InsertMode::AddOnly {
            return (self.clone(), InsertOutcome::Existing);
        }

        // Only grow on insertions that add an entry to an overfull bucket.
        let mut next = if !exists
            && avl::height(&self.buckets[self.bucket_of(hash)]) > self.options.max_bucket_height
        {
            self.rehashed(next_bucket_count(self.buckets.len() * 2))
        } else {
            self.clone()
        };

        let index = next.bucket_of(hash);
        let (tree, outcome) = avl::insert(&next.buckets[index], hash, key, value, mode);
        next.buckets[index] = tree;
        if outcome == InsertOutcome::Added {
            next.len += 1;
        }
        (next, outcome)
    }

    fn rehashed(&self, bucket_count: usize) -> Self {
        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_injector",
            from = self.buckets.len(),
            to = bucket_count,
            entries = self.len,
            "Rehashing persistent map"
        );

        let mut buckets: Box<[Tree<K, V>]> = vec![None; bucket_count].into_boxed_slice();
        for bucket in self.buckets.iter() {
            avl::for_each(bucket, &mut |hash, k, v| {
                let index = (hash % bucket_count as u64) as usize;
                let (tree, _) =
                    avl::insert(&buckets[index], hash, k.clone(), v.clone(), InsertMode::AddOnly);
                buckets[index] = tree;
            });
        }
        Self {
            buckets,
            len: self.len,
            options: self.options,
            hasher: self.hasher.clone(),
        }
    }
}

impl<K, V, S: Clone> Clone for PersistentMap<K, V, S> {
    fn clone(&self) -> Self {
        Self {
            buckets: self.buckets.clone(),
            len: self.len,
            options: self.options,
            hasher: self.hasher.clone(),
        }
    }
}

impl<K, V, S> fmt::Debug for PersistentMap<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentMap")
            .field("len", &self.len)
            .field("buckets", &self.buckets.len())
            .finish()
    }
}

// =============================================================================
// Concurrent wrapper
// =============================================================================

/// Lock-free-read map published through an atomic snapshot.
///
/// # Examples
///
/// ```rust
/// use scoped_injector::ConcurrentBucketMap;
///
/// let map = ConcurrentBucketMap::new();
/// assert_eq!(map.get_or_add("a", || 1), (1, true));
/// assert_eq!(map.get_or_add("a", || 2), (1, false));
/// assert!(map.add_or_replace("a", 3));
/// assert_eq!(map.try_find(&"a"), Some(3));
/// ```
pub struct ConcurrentBucketMap<K, V, S = RandomState> {
    current: AtomicSnapshot<PersistentMap<K, V, S>>,
}

impl<K, V> ConcurrentBucketMap<K, V, RandomState>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self::with_options(MapOptions::default())
    }

    pub fn with_options(options: MapOptions) -> Self {
        Self {
            current: AtomicSnapshot::new(PersistentMap::with_options(options)),
        }
    }
}

impl<K, V> Default for ConcurrentBucketMap<K, V, RandomState>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> ConcurrentBucketMap<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Clone + Send + Sync,
    S: BuildHasher + Clone + Send + Sync,
{
    /// Non-blocking lookup in the current snapshot.
    #[inline]
    pub fn try_find(&self, key: &K) -> Option<V> {
        self.current.read(|map| map.get(key).cloned())
    }

    /// Return the value for `key`, adding `factory()` if absent.
    ///
    /// The flag is true only for the call that added the value. The factory
    /// runs under the writer lock, so at most one racing caller invokes it.
    pub fn get_or_add(&self, key: K, factory: impl FnOnce() -> V) -> (V, bool) {
        if let Some(found) = self.try_find(&key) {
            return (found, false);
        }
        self.current.update(|map| {
            if let Some(found) = map.get(&key) {
                return (None, (found.clone(), false));
            }
            let value = factory();
            match map.try_add(key, value.clone()) {
                Some(next) => (Some(next), (value, true)),
                None => (None, (value, false)),
            }
        })
    }

    /// Fallible [`get_or_add`](Self::get_or_add); nothing is published when
    /// the factory fails.
    pub fn try_get_or_add<E>(
        &self,
        key: K,
        factory: impl FnOnce() -> Result<V, E>,
    ) -> Result<(V, bool), E> {
        if let Some(found) = self.try_find(&key) {
            return Ok((found, false));
        }
        self.current.update(|map| {
            if let Some(found) = map.get(&key) {
                return (None, Ok((found.clone(), false)));
            }
            match factory() {
                Ok(value) => match map.try_add(key, value.clone()) {
                    Some(next) => (Some(next), Ok((value, true))),
                    None => (None, Ok((value, false))),
                },
                Err(e) => (None, Err(e)),
            }
        })
    }

    /// Add `key` only if absent. Returns false if it was already present.
    pub fn try_add(&self, key: K, value: V) -> bool {
        self.current.update(|map| match map.try_add(key, value) {
            Some(next) => (Some(next), true),
            None => (None, false),
        })
    }

    /// Set `key` to `value`. Returns true if a previous value was replaced.
    pub fn add_or_replace(&self, key: K, value: V) -> bool {
        self.current.update(|map| {
            let (next, replaced) = map.add_or_replace(key, value);
            (Some(next), replaced)
        })
    }

    pub fn len(&self) -> usize {
        self.current.read(PersistentMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of the current version, unaffected by later writes.
    pub fn snapshot(&self) -> PersistentMap<K, V, S> {
        self.current.read(PersistentMap::clone)
    }
}

impl<K, V, S> fmt::Debug for ConcurrentBucketMap<K, V, S>
where
    K: Send + Sync,
    V: Send + Sync,
    S: Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.current.read(|map| map.len);
        f.debug_struct("ConcurrentBucketMap")
            .field("len", &len)
            .finish()
    }
}

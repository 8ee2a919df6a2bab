//! A bounded cache that deduplicates [`Range`]s.
//!
//! Parsers that produce many identical ranges can share one [`Cache`] to hand
//! out shared [`Arc<Range>`]s: see `sff::Parser::with_cache()`,
//! `ace::Parser::with_cache()` and `assembly::Builder::with_cache()`.
//! The cache is owned by whoever creates it; there is no process-wide
//! instance. Entries are evicted least-recently-used once `capacity` is
//! reached.
//!
//! Lookups and inserts take the lock separately. Two threads missing on the
//! same key may both build the range and the later insert wins; both callers
//! still receive equal values.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Mutex;

use lru::LruCache;

use crate::range;
use crate::Range;

/// The capacity of a [`Cache`] created with [`Default`].
pub const DEFAULT_CAPACITY: usize = 4096;

/// A bounded, thread-safe cache of [`Range`]s keyed by their canonical
/// string form.
#[derive(Debug)]
pub struct Cache {
    /// The cached ranges.
    inner: Mutex<LruCache<String, Arc<Range>>>,
}

impl Cache {
    /// Creates a cache holding at most `capacity` ranges.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Gets the cached range for the zero-based `start` and `end`, building
    /// and caching it on a miss.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    ///
    /// use assemblyfile::range::Cache;
    ///
    /// let cache = Cache::default();
    /// let a = cache.get_or_insert(0, 9)?;
    /// let b = cache.get_or_insert(0, 9)?;
    ///
    /// assert_eq!(a, b);
    /// assert!(Arc::ptr_eq(&a, &b));
    /// assert_eq!(cache.len(), 1);
    ///
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn get_or_insert(&self, start: i64, end: i64) -> Result<Arc<Range>, range::Error> {
        Range::try_new(start, end).map(|range| self.intern(range))
    }

    /// Gets the cached copy of `range`, caching `range` itself on a miss.
    pub fn intern(&self, range: Range) -> Arc<Range> {
        let key = range.to_string();

        if let Some(cached) = self.lock().get(&key) {
            return cached.clone();
        }

        let range = Arc::new(range);
        self.lock().put(key, range.clone());
        range
    }

    /// Gets the number of cached ranges.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the cache holds no ranges.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Gets the maximum number of cached ranges.
    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    /// Locks the inner cache.
    ///
    /// A panic while holding the lock cannot leave a range half-inserted, so
    /// a poisoned lock is recovered.
    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, Arc<Range>>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_CAPACITY).unwrap_or(NonZeroUsize::MIN))
    }
}

//! Per-source memoization of derived data
//!
//! A parse run extracts many bindings from the same source. Adapters
//! keep what they derive from it (parsed headers, a decoded body) in a
//! [`CacheEntry`] keyed by the source's address, created at most once
//! per source. Payload types typically hold `OnceCell` sub-fields so
//! each derivation also runs at most once.
//!
//! Identity is the address of the source value. Entries must be
//! removed (see [`SourceCache::delete`]) before the source is dropped,
//! otherwise a new source at the same address would see stale data.

use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::trace;

/// Derived data for one source, guarded for concurrent readers
#[derive(Debug, Default)]
pub struct CacheEntry<C> {
    data: RwLock<C>,
}

impl<C> CacheEntry<C> {
    pub fn new(data: C) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Run `f` under the shared lock
    pub fn read_locked<R>(&self, f: impl FnOnce(&C) -> R) -> R {
        f(&self.data.read())
    }

    /// Run `f` under the exclusive lock
    pub fn write_locked<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        f(&mut self.data.write())
    }
}

/// Concurrent map from source identity to its [`CacheEntry`]
pub struct SourceCache<S: ?Sized, C> {
    entries: DashMap<usize, Arc<CacheEntry<C>>>,
    _source: PhantomData<fn(&S)>,
}

impl<S: ?Sized, C> Default for SourceCache<S, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ?Sized, C> SourceCache<S, C> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            _source: PhantomData,
        }
    }

    fn key(source: &S) -> usize {
        source as *const S as *const () as usize
    }

    /// Entry for `source`, creating it with `factory` on first access
    ///
    /// Under concurrent first access exactly one `factory` call runs and
    /// every caller receives the same entry.
    pub fn get_or_create(&self, source: &S, factory: impl FnOnce() -> C) -> Arc<CacheEntry<C>> {
        let key = Self::key(source);
        if let Some(entry) = self.entries.get(&key) {
            return Arc::clone(&entry);
        }

        let entry = self.entries.entry(key).or_insert_with(|| {
            trace!(key, "creating source cache entry");
            Arc::new(CacheEntry::new(factory()))
        });
        Arc::clone(&*entry)
    }

    pub fn get(&self, source: &S) -> Option<Arc<CacheEntry<C>>> {
        self.entries.get(&Self::key(source)).map(|e| Arc::clone(&e))
    }

    /// Remove the entry for `source`; returns whether one existed
    pub fn delete(&self, source: &S) -> bool {
        self.entries.remove(&Self::key(source)).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::OnceCell;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    #[derive(Default)]
    struct Derived {
        upper: OnceCell<String>,
    }

    #[test]
    fn entry_is_created_once_per_source() {
        let cache: SourceCache<String, Derived> = SourceCache::new();
        let a = "a".to_string();
        let b = "b".to_string();

        let first = cache.get_or_create(&a, Derived::default);
        let again = cache.get_or_create(&a, || panic!("factory must not run twice"));
        assert!(Arc::ptr_eq(&first, &again));

        cache.get_or_create(&b, Derived::default);
        assert_eq!(cache.len(), 2);

        assert!(cache.delete(&a));
        assert!(!cache.delete(&a));
        assert!(cache.get(&a).is_none());
        assert!(cache.get(&b).is_some());

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn write_locked_mutates_payload() {
        let entry = CacheEntry::new(0usize);
        entry.write_locked(|n| *n += 2);
        assert_eq!(entry.read_locked(|n| *n), 2);
    }

    #[test]
    fn concurrent_first_access_runs_factories_once() {
        const THREADS: usize = 16;

        let cache: Arc<SourceCache<String, Derived>> = Arc::new(SourceCache::new());
        let source = Arc::new("payload".to_string());
        let entries_created = Arc::new(AtomicUsize::new(0));
        let derivations = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let source = Arc::clone(&source);
                let entries_created = Arc::clone(&entries_created);
                let derivations = Arc::clone(&derivations);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let entry = cache.get_or_create(&source, || {
                        entries_created.fetch_add(1, Ordering::SeqCst);
                        Derived::default()
                    });
                    entry.read_locked(|d| {
                        d.upper
                            .get_or_init(|| {
                                derivations.fetch_add(1, Ordering::SeqCst);
                                source.to_uppercase()
                            })
                            .clone()
                    })
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), "PAYLOAD");
        }
        assert_eq!(entries_created.load(Ordering::SeqCst), 1);
        assert_eq!(derivations.load(Ordering::SeqCst), 1);
    }
}

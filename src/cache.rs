//! # Coalescing Cache
//!
//! [`CoalescingCache`] is a key/value cache that guarantees at most one
//! computation per key is ever in flight. A requester that finds a finished
//! value gets it immediately; one that finds a computation already running
//! blocks until that computation finishes and receives the same value; only
//! the first requester for a key runs the factory.
//!
//! A failed computation is not cached: its waiters receive a cache error
//! carrying the failure message, and the next request starts afresh.
//!
//! The engine owns one [`ArtifactCache`] per [`Engine`](crate::engine::Engine)
//! and clears it from the "engine finished" event so that artifacts derived
//! from content loaded in one run never leak into the next.
//!
//! A factory must not request its own key; doing so waits on itself forever.

use std::any::Any;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;

type Outcome<V> = std::result::Result<V, String>;

struct InFlight<V> {
    outcome: Mutex<Option<Outcome<V>>>,
    done: Condvar,
}

impl<V: Clone> InFlight<V> {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn complete(&self, outcome: Outcome<V>) {
        let mut slot = self.outcome.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(outcome);
        }
        self.done.notify_all();
    }

    fn wait(&self) -> Result<V> {
        let mut slot = self.outcome.lock().map_err(|_| Error::LockPoisoned {
            context: "coalescing cache in-flight slot".to_string(),
        })?;
        while slot.is_none() {
            slot = self.done.wait(slot).map_err(|_| Error::LockPoisoned {
                context: "coalescing cache in-flight slot".to_string(),
            })?;
        }
        match slot.as_ref() {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(message)) => Err(Error::Cache {
                message: format!("Coalesced computation failed: {}", message),
            }),
            None => unreachable!("loop exits only once the outcome is set"),
        }
    }
}

enum Entry<V> {
    Ready(V),
    Pending(Arc<InFlight<V>>),
}

/// Hit/miss counters, mostly for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
}

impl CacheStats {
    /// Counts accumulated since `earlier`.
    pub fn since(&self, earlier: &CacheStats) -> CacheStats {
        CacheStats {
            hits: self.hits.saturating_sub(earlier.hits),
            misses: self.misses.saturating_sub(earlier.misses),
            coalesced: self.coalesced.saturating_sub(earlier.coalesced),
        }
    }
}

/// Cache with at most one concurrent computation per key.
pub struct CoalescingCache<K, V> {
    entries: Mutex<HashMap<K, Entry<V>>>,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
}

/// Finishes an in-flight entry even if the factory panics.
struct CompletionGuard<'a, K: Eq + Hash, V: Clone> {
    cache: &'a CoalescingCache<K, V>,
    key: Option<K>,
    in_flight: Arc<InFlight<V>>,
}

impl<K: Eq + Hash, V: Clone> CompletionGuard<'_, K, V> {
    fn finish(mut self, outcome: Outcome<V>) {
        if let Some(key) = self.key.take() {
            self.cache.settle(key, &self.in_flight, &outcome);
        }
        self.in_flight.complete(outcome);
    }
}

impl<K: Eq + Hash, V: Clone> Drop for CompletionGuard<'_, K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let outcome = Err("computation panicked".to_string());
            self.cache.settle(key, &self.in_flight, &outcome);
            self.in_flight.complete(outcome);
        }
    }
}

impl<K: Eq + Hash, V: Clone> CoalescingCache<K, V> {
    /// Replace our pending entry with its outcome. If a reset removed the
    /// entry, or a newer computation took its place, leave the map alone.
    fn settle(&self, key: K, in_flight: &Arc<InFlight<V>>, outcome: &Outcome<V>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let ours = matches!(
            entries.get(&key),
            Some(Entry::Pending(pending)) if Arc::ptr_eq(pending, in_flight)
        );
        if !ours {
            return;
        }
        match outcome {
            Ok(value) => {
                entries.insert(key, Entry::Ready(value.clone()));
            }
            Err(_) => {
                entries.remove(&key);
            }
        }
    }
}

impl<K, V> CoalescingCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::with_enabled(true)
    }

    /// A cache that never stores anything: every call runs its factory.
    pub fn disabled() -> Self {
        Self::with_enabled(false)
    }

    pub fn with_enabled(enabled: bool) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            enabled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<K, Entry<V>>>> {
        self.entries.lock().map_err(|_| Error::LockPoisoned {
            context: "coalescing cache entries".to_string(),
        })
    }

    /// Return the value for `key`, computing it with `factory` only if no
    /// value exists and no computation is already running.
    pub fn get_or_compute<F>(&self, key: K, factory: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        if !self.enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return factory();
        }

        let in_flight = {
            let mut entries = self.lock()?;
            match entries.get(&key) {
                Some(Entry::Ready(value)) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(value.clone());
                }
                Some(Entry::Pending(pending)) => {
                    let pending = Arc::clone(pending);
                    drop(entries);
                    self.coalesced.fetch_add(1, Ordering::Relaxed);
                    trace!("Waiting on in-flight cache computation");
                    return pending.wait();
                }
                None => {
                    let pending = Arc::new(InFlight::new());
                    entries.insert(key.clone(), Entry::Pending(Arc::clone(&pending)));
                    pending
                }
            }
        };

        self.misses.fetch_add(1, Ordering::Relaxed);
        let guard = CompletionGuard {
            cache: self,
            key: Some(key),
            in_flight: Arc::clone(&in_flight),
        };

        match factory() {
            Ok(value) => {
                guard.finish(Ok(value.clone()));
                Ok(value)
            }
            Err(e) => {
                guard.finish(Err(e.to_string()));
                Err(e)
            }
        }
    }

    /// Completed value for `key`, without computing.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let entries = self.lock()?;
        Ok(match entries.get(key) {
            Some(Entry::Ready(value)) => Some(value.clone()),
            _ => None,
        })
    }

    pub fn contains(&self, key: &K) -> Result<bool> {
        Ok(matches!(self.lock()?.get(key), Some(Entry::Ready(_))))
    }

    /// Drop every entry. Computations already running still deliver their
    /// value to their own waiters but are not stored.
    pub fn reset(&self) -> Result<()> {
        let mut entries = self.lock()?;
        debug!("Resetting coalescing cache ({} entries)", entries.len());
        entries.clear();
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self
            .lock()?
            .values()
            .filter(|e| matches!(e, Entry::Ready(_)))
            .count())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
        }
    }
}

impl<K, V> Default for CoalescingCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Key for step-produced artifacts: a namespace chosen by the step plus the
/// fingerprint of whatever the artifact was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub namespace: String,
    pub fingerprint: Fingerprint,
}

impl ArtifactKey {
    pub fn new(namespace: impl Into<String>, fingerprint: Fingerprint) -> Self {
        Self {
            namespace: namespace.into(),
            fingerprint,
        }
    }
}

type Artifact = Arc<dyn Any + Send + Sync>;

/// Run-scoped cache of arbitrary step artifacts.
pub struct ArtifactCache {
    inner: CoalescingCache<ArtifactKey, Artifact>,
}

impl ArtifactCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            inner: CoalescingCache::with_enabled(enabled),
        }
    }

    /// Typed `get_or_compute`. A key whose stored artifact has another type
    /// is reported as a cache error.
    pub fn get_or_compute<T, F>(&self, key: ArtifactKey, factory: F) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Result<T>,
    {
        let namespace = key.namespace.clone();
        let artifact = self
            .inner
            .get_or_compute(key, || factory().map(|value| Arc::new(value) as Artifact))?;
        artifact.downcast::<T>().map_err(|_| Error::Cache {
            message: format!(
                "Artifact in namespace '{}' has a different type than requested",
                namespace
            ),
        })
    }

    pub fn reset(&self) -> Result<()> {
        self.inner.reset()
    }

    pub fn len(&self) -> Result<usize> {
        self.inner.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.inner.is_empty()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_enabled()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}

impl Default for ArtifactCache {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_cache_get_or_compute() {
        let cache: CoalescingCache<String, String> = CoalescingCache::new();
        let calls = AtomicU64::new(0);

        let first = cache
            .get_or_compute("k".to_string(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("v1".to_string())
            })
            .unwrap();
        let second = cache
            .get_or_compute("k".to_string(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("v2".to_string())
            })
            .unwrap();

        assert_eq!(first, "v1");
        assert_eq!(second, "v1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_concurrent_requests_run_factory_once() {
        let cache: Arc<CoalescingCache<u32, Arc<String>>> = Arc::new(CoalescingCache::new());
        let calls = Arc::new(AtomicU64::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_compute(7, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            Ok(Arc::new("computed".to_string()))
                        })
                        .unwrap()
                })
            })
            .collect();

        let values: Vec<Arc<String>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for value in &values {
            assert!(Arc::ptr_eq(value, &values[0]));
        }
    }

    #[test]
    fn test_failure_not_cached_and_reported_to_waiters() {
        let cache: Arc<CoalescingCache<u32, u32>> = Arc::new(CoalescingCache::new());
        let started = Arc::new(Barrier::new(2));

        let leader = {
            let cache = Arc::clone(&cache);
            let started = Arc::clone(&started);
            thread::spawn(move || {
                cache.get_or_compute(1, || {
                    started.wait();
                    thread::sleep(Duration::from_millis(50));
                    Err(Error::execution("boom"))
                })
            })
        };

        started.wait();
        let waiter = cache.get_or_compute(1, || Ok(99));
        let leader = leader.join().unwrap();

        assert!(leader.is_err());
        match waiter {
            Err(Error::Cache { message }) => assert!(message.contains("boom")),
            other => panic!("expected coalesced failure, got {:?}", other),
        }
        // A later request computes again.
        assert_eq!(cache.get_or_compute(1, || Ok(5)).unwrap(), 5);
    }

    #[test]
    fn test_reset_clears_entries() {
        let cache: CoalescingCache<&str, u32> = CoalescingCache::new();
        cache.get_or_compute("a", || Ok(1)).unwrap();
        assert_eq!(cache.len().unwrap(), 1);
        assert!(cache.contains(&"a").unwrap());

        cache.reset().unwrap();
        assert!(cache.is_empty().unwrap());
        assert_eq!(cache.get_or_compute("a", || Ok(2)).unwrap(), 2);
    }

    #[test]
    fn test_disabled_cache_always_computes() {
        let cache: CoalescingCache<&str, u32> = CoalescingCache::disabled();
        assert_eq!(cache.get_or_compute("a", || Ok(1)).unwrap(), 1);
        assert_eq!(cache.get_or_compute("a", || Ok(2)).unwrap(), 2);
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn test_panicking_factory_releases_waiters() {
        let cache: Arc<CoalescingCache<u32, u32>> = Arc::new(CoalescingCache::new());
        let worker = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                let _ = cache.get_or_compute(3, || -> Result<u32> { panic!("factory blew up") });
            })
        };
        assert!(worker.join().is_err());
        assert!(cache.get(&3).unwrap().is_none());
        assert_eq!(cache.get_or_compute(3, || Ok(4)).unwrap(), 4);
    }

    #[test]
    fn test_artifact_cache_is_typed() {
        let cache = ArtifactCache::default();
        let key = ArtifactKey::new("upper", Fingerprint::of_bytes(b"abc"));
        let value = cache
            .get_or_compute(key.clone(), || Ok("ABC".to_string()))
            .unwrap();
        assert_eq!(value.as_str(), "ABC");

        let mismatch = cache.get_or_compute::<u64, _>(key, || Ok(1));
        assert!(matches!(mismatch, Err(Error::Cache { .. })));
    }
}

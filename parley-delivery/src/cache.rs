//! Bounded cache of delivery methods
//!
//! Methods are keyed by delivery spec id and evicted least-recently-used.
//! Every path that takes a method out of the cache (capacity eviction,
//! [`DeliveryMethodCache::invalidate`], [`DeliveryMethodCache::clear`]) shuts
//! it down once, after the cache lock has been released.

use std::{
    num::NonZeroUsize,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use lru::LruCache;
use parking_lot::Mutex;
use parley_common::tracing::{debug, error, warn};

use crate::method::DeliveryMethod;

type Entries = LruCache<String, Arc<dyn DeliveryMethod>>;

#[derive(Debug)]
pub struct DeliveryMethodCache {
    /// `None` when caching is disabled
    entries: Option<Mutex<Entries>>,
}

impl DeliveryMethodCache {
    /// Create a cache holding at most `max_entries` methods
    ///
    /// `None`, zero or a negative count disables caching: nothing is ever
    /// stored and methods are never shut down by the cache.
    #[must_use]
    pub fn new(max_entries: Option<i64>) -> Self {
        let entries = max_entries
            .and_then(|max| usize::try_from(max).ok())
            .and_then(NonZeroUsize::new)
            .map(|capacity| Mutex::new(LruCache::new(capacity)));

        Self { entries }
    }

    #[must_use]
    pub const fn disabled() -> Self {
        Self { entries: None }
    }

    pub const fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.entries
            .as_ref()
            .map(|entries| entries.lock().cap().get())
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |entries| entries.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn DeliveryMethod>> {
        self.entries.as_ref()?.lock().get(id).cloned()
    }

    /// Cache `method` under `id` unless another method already holds the slot
    ///
    /// Returns the method already cached, in which case `method` was not
    /// adopted and should simply be dropped. Returns `None` when `method` was
    /// cached, or when caching is disabled.
    pub fn put_if_absent(
        &self,
        id: &str,
        method: Arc<dyn DeliveryMethod>,
    ) -> Option<Arc<dyn DeliveryMethod>> {
        let entries = self.entries.as_ref()?;

        let evicted = {
            let mut entries = entries.lock();
            if let Some(existing) = entries.get(id) {
                return Some(Arc::clone(existing));
            }
            entries.push(id.to_string(), method)
        };

        if let Some((evicted_id, evicted)) = evicted {
            shutdown(&evicted_id, evicted.as_ref(), "evicted");
        }

        None
    }

    /// Remove the method cached under `id` and shut it down
    ///
    /// Returns whether a method was removed.
    pub fn invalidate(&self, id: &str) -> bool {
        let removed = self
            .entries
            .as_ref()
            .and_then(|entries| entries.lock().pop(id));

        removed.is_some_and(|method| {
            shutdown(id, method.as_ref(), "invalidated");
            true
        })
    }

    /// Remove and shut down every cached method
    pub fn clear(&self) {
        let Some(entries) = self.entries.as_ref() else {
            return;
        };

        let drained: Vec<_> = {
            let mut entries = entries.lock();
            std::iter::from_fn(|| entries.pop_lru()).collect()
        };

        for (id, method) in drained {
            shutdown(&id, method.as_ref(), "cleared");
        }
    }
}

/// Shut a method down, logging and swallowing failures
fn shutdown(id: &str, method: &dyn DeliveryMethod, reason: &str) {
    match catch_unwind(AssertUnwindSafe(|| method.shutdown())) {
        Ok(Ok(())) => debug!(spec_id = id, reason, "Delivery method shut down"),
        Ok(Err(e)) => warn!(
            spec_id = id,
            reason,
            error = %e,
            "Delivery method failed to shut down cleanly"
        ),
        Err(_) => error!(spec_id = id, reason, "Delivery method panicked during shutdown"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parley_common::MessageUnit;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::{DeliveryError, SystemError};

    #[derive(Debug, Default)]
    struct Counting {
        shutdowns: AtomicUsize,
        fail_shutdown: bool,
    }

    #[async_trait]
    impl DeliveryMethod for Counting {
        async fn deliver(&self, _unit: &MessageUnit) -> Result<(), DeliveryError> {
            Ok(())
        }

        fn shutdown(&self) -> Result<(), DeliveryError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            if self.fail_shutdown {
                return Err(SystemError::Internal("socket already closed".to_string()).into());
            }
            Ok(())
        }
    }

    fn method() -> Arc<Counting> {
        Arc::new(Counting::default())
    }

    #[test]
    fn test_disabled_cache() {
        for max in [None, Some(0), Some(-3)] {
            let cache = DeliveryMethodCache::new(max);
            assert!(!cache.is_enabled());

            let m = method();
            assert!(cache.put_if_absent("a", m.clone()).is_none());
            assert!(cache.get("a").is_none());
            assert!(!cache.invalidate("a"));
            cache.clear();
            assert_eq!(m.shutdowns.load(Ordering::SeqCst), 0);
        }
    }

    #[test]
    fn test_put_if_absent_keeps_first() {
        let cache = DeliveryMethodCache::new(Some(4));
        let first = method();
        let second = method();

        assert!(cache.put_if_absent("a", first.clone()).is_none());
        let winner = cache.put_if_absent("a", second.clone()).unwrap();

        assert!(Arc::ptr_eq(
            &winner,
            &(first.clone() as Arc<dyn DeliveryMethod>)
        ));
        assert_eq!(second.shutdowns.load(Ordering::SeqCst), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_shuts_down_once() {
        let cache = DeliveryMethodCache::new(Some(4));
        let m = method();
        cache.put_if_absent("a", m.clone());

        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        assert!(cache.get("a").is_none());
        assert_eq!(m.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_eviction_is_least_recently_used() {
        let cache = DeliveryMethodCache::new(Some(2));
        let (a, b, c) = (method(), method(), method());

        cache.put_if_absent("a", a.clone());
        cache.put_if_absent("b", b.clone());
        assert!(cache.get("a").is_some());
        cache.put_if_absent("c", c.clone());

        assert_eq!(cache.len(), 2);
        assert!(cache.get("b").is_none());
        assert_eq!(b.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(a.shutdowns.load(Ordering::SeqCst), 0);
        assert_eq!(c.shutdowns.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_clear_swallows_shutdown_failures() {
        let cache = DeliveryMethodCache::new(Some(8));
        let failing = Arc::new(Counting {
            fail_shutdown: true,
            ..Counting::default()
        });
        let fine = method();

        cache.put_if_absent("failing", failing.clone());
        cache.put_if_absent("fine", fine.clone());
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), Some(8));
        assert_eq!(failing.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(fine.shutdowns.load(Ordering::SeqCst), 1);
    }
}

// src/cache.rs
use futures::future::{BoxFuture, FutureExt, Shared};
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use comparisons::{ComparisonSettings, ReduceMethod, Value};

use crate::error::SignalError;
use crate::prepare::AcquireError;
use crate::signal::{Signal, SignalFactory};

/// Memoizing store of endpoint identifier -> live signal.
///
/// Every requester of an identifier gets the same handle. Creation happens
/// under the lock, so concurrent misses on one identifier build one signal.
pub struct EndpointCache {
    factory: Arc<dyn SignalFactory>,
    signals: Mutex<IndexMap<String, Arc<dyn Signal>>>,
}

impl EndpointCache {
    pub fn new(factory: Arc<dyn SignalFactory>) -> Self {
        Self {
            factory,
            signals: Mutex::new(IndexMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<String, Arc<dyn Signal>>> {
        self.signals.lock().unwrap_or_else(|poisoned| {
            warn!("endpoint cache lock poisoned; recovering");
            poisoned.into_inner()
        })
    }

    /// Fetch the handle for `id`, creating it on a miss.
    pub fn get(&self, id: &str) -> Result<Arc<dyn Signal>, SignalError> {
        let mut signals = self.lock();
        if let Some(signal) = signals.get(id) {
            return Ok(Arc::clone(signal));
        }
        let signal = self.factory.create(id)?;
        debug!(id, "created signal");
        signals.insert(id.to_string(), Arc::clone(&signal));
        Ok(signal)
    }

    /// Create handles for every id up front. Failures are logged and left
    /// for preparation to report per unit.
    ///
    /// Only handles are created here; nothing connects until a comparison
    /// asks. Connection waits overlap because a run compares all of its
    /// units together.
    pub fn warm<'i, I>(&self, ids: I) -> usize
    where
        I: IntoIterator<Item = &'i str>,
    {
        let mut warmed = 0;
        for id in ids {
            match self.get(id) {
                Ok(_) => warmed += 1,
                Err(e) => debug!(id, error = %e, "warm-up failed"),
            }
        }
        warmed
    }

    /// Destroy and forget every handle. Destroy failures are logged only.
    pub fn clear(&self) {
        let drained: Vec<(String, Arc<dyn Signal>)> = self.lock().drain(..).collect();
        for (id, signal) in drained {
            if let Err(e) = signal.destroy() {
                debug!(id = %id, error = %e, "Destroy failed for signal");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// Cached identifiers in creation order.
    pub fn ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}

impl fmt::Debug for EndpointCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointCache")
            .field("ids", &self.ids())
            .finish()
    }
}

// ---------- per-run data ----------

/// One acquisition: an identifier read under one set of reduction settings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataKey {
    pub identifier: String,
    // f64 bits, so the key hashes
    period: Option<u64>,
    pub method: ReduceMethod,
    pub string: bool,
}

impl DataKey {
    /// Settings that cannot change the acquired value are normalized away:
    /// `string` reads never sample, and the method only matters with a period.
    pub fn new(identifier: impl Into<String>, settings: &ComparisonSettings) -> Self {
        let period = settings.reduce_period.filter(|_| !settings.string);
        Self {
            identifier: identifier.into(),
            period: period.map(f64::to_bits),
            method: if period.is_some() {
                settings.reduce_method
            } else {
                ReduceMethod::default()
            },
            string: settings.string,
        }
    }

    pub fn period(&self) -> Option<f64> {
        self.period.map(f64::from_bits)
    }
}

pub(crate) type Acquisition = Shared<BoxFuture<'static, Result<Value, AcquireError>>>;

/// Values acquired during one run, shared by every comparison that asks for
/// the same [`DataKey`]. Concurrent requests await the same acquisition.
#[derive(Default)]
pub struct DataCache {
    entries: Mutex<IndexMap<DataKey, Acquisition>>,
}

impl DataCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<DataKey, Acquisition>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            warn!("data cache lock poisoned; recovering");
            poisoned.into_inner()
        })
    }

    /// The acquisition for `key`; `start` builds it on the first request.
    pub(crate) fn get_or_start<F>(&self, key: DataKey, start: F) -> Acquisition
    where
        F: FnOnce(&DataKey) -> BoxFuture<'static, Result<Value, AcquireError>>,
    {
        let mut entries = self.lock();
        if let Some(acquisition) = entries.get(&key) {
            return acquisition.clone();
        }
        debug!(identifier = %key.identifier, period = ?key.period(), "starting acquisition");
        let acquisition = start(&key).shared();
        entries.insert(key, acquisition.clone());
        acquisition
    }

    /// Forget every acquisition, finished or not.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl fmt::Debug for DataCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataCache")
            .field("entries", &self.len())
            .finish()
    }
}

// ---------- process-wide default ----------

static DEFAULT_CACHE: OnceCell<Arc<EndpointCache>> = OnceCell::new();

/// Install the default cache. Later calls return the first instance.
pub fn init_default_cache(factory: Arc<dyn SignalFactory>) -> Arc<EndpointCache> {
    Arc::clone(DEFAULT_CACHE.get_or_init(|| Arc::new(EndpointCache::new(factory))))
}

pub fn default_cache() -> Option<Arc<EndpointCache>> {
    DEFAULT_CACHE.get().cloned()
}

/// Destroy every handle in the default cache, if one was installed.
pub fn reset_default_cache() {
    if let Some(cache) = DEFAULT_CACHE.get() {
        cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::mock::{MockBehavior, MockSignalFactory};
    use comparisons::Value;

    fn factory() -> Arc<MockSignalFactory> {
        Arc::new(MockSignalFactory::new(MockBehavior::Value(Value::Int(1))).rejecting("BAD"))
    }

    #[test]
    fn get_memoizes_handles() {
        let factory = factory();
        let cache = EndpointCache::new(factory.clone());
        let a = cache.get("PV:A").unwrap();
        let b = cache.get("PV:A").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.creations(), 1);
        assert_eq!(cache.ids(), vec!["PV:A".to_string()]);
    }

    #[test]
    fn failed_creation_is_not_cached() {
        let cache = EndpointCache::new(factory());
        assert!(cache.get("BAD").is_err());
        assert!(!cache.contains("BAD"));
        assert_eq!(cache.warm(["PV:A", "BAD", "PV:B"]), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn clear_destroys_and_is_idempotent() {
        let factory = factory();
        let cache = EndpointCache::new(factory.clone());
        cache.warm(["PV:A", "PV:B"]);
        cache.clear();
        assert!(cache.is_empty());
        assert!(factory.created().iter().all(|s| s.is_destroyed()));
        cache.clear();
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn data_keys_ignore_settings_that_do_not_change_the_read() {
        let plain = ComparisonSettings::default();
        let mut max = ComparisonSettings::default();
        max.reduce_method = ReduceMethod::Max;
        assert_eq!(DataKey::new("PV:A", &plain), DataKey::new("PV:A", &max));

        let mut sampled = max.clone();
        sampled.reduce_period = Some(1.0);
        let key = DataKey::new("PV:A", &sampled);
        assert_ne!(key, DataKey::new("PV:A", &max));
        assert_eq!(key.period(), Some(1.0));

        sampled.string = true;
        assert_eq!(DataKey::new("PV:A", &sampled).period(), None);
    }

    #[tokio::test]
    async fn data_cache_starts_each_key_once() {
        let data = DataCache::new();
        let key = DataKey::new("PV:A", &ComparisonSettings::default());
        let mut starts = 0;
        for _ in 0..3 {
            let acquisition = data.get_or_start(key.clone(), |_| {
                starts += 1;
                async { Ok::<_, AcquireError>(Value::Int(7)) }.boxed()
            });
            assert_eq!(acquisition.await, Ok(Value::Int(7)));
        }
        assert_eq!(starts, 1);
        assert_eq!(data.len(), 1);

        data.clear();
        assert!(data.is_empty());
    }

    #[test]
    fn default_cache_is_installed_once() {
        let first = init_default_cache(factory());
        let second = init_default_cache(factory());
        assert!(Arc::ptr_eq(&first, &second));
        assert!(default_cache().is_some());
    }
}

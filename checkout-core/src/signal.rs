//! Transport collaborators: signals, the factory that creates them, and the
//! device directory that hands out device attributes.
//!
//! The real transport lives outside this crate; production code injects its
//! own implementations, tests use [`mock`].

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

use comparisons::Value;

use crate::error::{DirectoryError, SignalError};

/// A live endpoint handle.
pub trait Signal: Send + Sync {
    fn name(&self) -> &str;

    /// Wait until connected, giving up after `timeout`.
    fn connect(&self, timeout: Duration) -> BoxFuture<'_, Result<(), SignalError>>;

    /// Read the current value; `as_string` requests the string representation.
    fn read(&self, as_string: bool) -> BoxFuture<'_, Result<Value, SignalError>>;

    /// Release the underlying connection.
    fn destroy(&self) -> Result<(), SignalError>;
}

/// Builds a signal for an endpoint identifier. Creation must not block on
/// connecting.
pub trait SignalFactory: Send + Sync {
    fn create(&self, id: &str) -> Result<Arc<dyn Signal>, SignalError>;
}

pub trait Device: Send + Sync {
    fn name(&self) -> &str;
    /// Signal for a (possibly dotted) attribute name.
    fn attribute(&self, attr: &str) -> Option<Arc<dyn Signal>>;
}

/// Resolves device names to live devices.
pub trait DeviceDirectory: Send + Sync {
    fn device(&self, name: &str) -> Result<Arc<dyn Device>, DirectoryError>;
}

pub mod mock {
    //! In-memory signals and devices.
    //!
    //! Available for integration tests and external test crates.

    use super::*;
    use indexmap::IndexMap;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Mutex, MutexGuard, PoisonError};

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// How a mock signal behaves once created.
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Connects immediately; every read returns the value.
        Value(Value),
        /// Connects immediately; reads walk the samples, repeating the last.
        Samples(Vec<Value>),
        /// Never connects: `connect` waits out its timeout and fails.
        NeverConnects,
        /// Connects immediately; reads fail with this reason.
        ReadFails(String),
    }

    pub struct MockSignal {
        name: String,
        behavior: Mutex<MockBehavior>,
        connects: AtomicUsize,
        reads: AtomicUsize,
        destroyed: AtomicBool,
        fail_destroy: bool,
    }

    impl MockSignal {
        pub fn new(name: impl Into<String>, behavior: MockBehavior) -> Self {
            Self {
                name: name.into(),
                behavior: Mutex::new(behavior),
                connects: AtomicUsize::new(0),
                reads: AtomicUsize::new(0),
                destroyed: AtomicBool::new(false),
                fail_destroy: false,
            }
        }

        /// `destroy` reports an error (the signal is still marked destroyed).
        pub fn failing_destroy(mut self) -> Self {
            self.fail_destroy = true;
            self
        }

        pub fn set_behavior(&self, behavior: MockBehavior) {
            *lock(&self.behavior) = behavior;
        }

        pub fn connect_count(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        pub fn read_count(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }

        pub fn is_destroyed(&self) -> bool {
            self.destroyed.load(Ordering::SeqCst)
        }
    }

    impl Signal for MockSignal {
        fn name(&self) -> &str {
            &self.name
        }

        fn connect(&self, timeout: Duration) -> BoxFuture<'_, Result<(), SignalError>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let behavior = lock(&self.behavior).clone();
            Box::pin(async move {
                match behavior {
                    MockBehavior::NeverConnects => {
                        tokio::time::sleep(timeout).await;
                        Err(SignalError::ConnectionTimeout(self.name.clone()))
                    }
                    _ => Ok(()),
                }
            })
        }

        fn read(&self, as_string: bool) -> BoxFuture<'_, Result<Value, SignalError>> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            let behavior = lock(&self.behavior).clone();
            Box::pin(async move {
                let value = match behavior {
                    MockBehavior::Value(value) => value,
                    MockBehavior::Samples(samples) => samples
                        .get(n)
                        .or_else(|| samples.last())
                        .cloned()
                        .ok_or_else(|| SignalError::Read {
                            id: self.name.clone(),
                            reason: "no samples".into(),
                        })?,
                    MockBehavior::NeverConnects => {
                        return Err(SignalError::Disconnected(self.name.clone()));
                    }
                    MockBehavior::ReadFails(reason) => {
                        return Err(SignalError::Read {
                            id: self.name.clone(),
                            reason,
                        });
                    }
                };
                if as_string {
                    Ok(Value::Str(value.to_string()))
                } else {
                    Ok(value)
                }
            })
        }

        fn destroy(&self) -> Result<(), SignalError> {
            self.destroyed.store(true, Ordering::SeqCst);
            if self.fail_destroy {
                return Err(SignalError::Destroy(self.name.clone()));
            }
            Ok(())
        }
    }

    /// Creates [`MockSignal`]s, keeping every one it made for inspection.
    pub struct MockSignalFactory {
        default: MockBehavior,
        behaviors: Mutex<HashMap<String, MockBehavior>>,
        rejected: Mutex<HashSet<String>>,
        created: Mutex<Vec<Arc<MockSignal>>>,
        creations: AtomicUsize,
    }

    impl MockSignalFactory {
        pub fn new(default: MockBehavior) -> Self {
            Self {
                default,
                behaviors: Mutex::new(HashMap::new()),
                rejected: Mutex::new(HashSet::new()),
                created: Mutex::new(Vec::new()),
                creations: AtomicUsize::new(0),
            }
        }

        /// Override the behavior for one identifier.
        pub fn with(self, id: &str, behavior: MockBehavior) -> Self {
            lock(&self.behaviors).insert(id.to_string(), behavior);
            self
        }

        /// Make `create` fail for one identifier.
        pub fn rejecting(self, id: &str) -> Self {
            lock(&self.rejected).insert(id.to_string());
            self
        }

        pub fn creations(&self) -> usize {
            self.creations.load(Ordering::SeqCst)
        }

        pub fn created(&self) -> Vec<Arc<MockSignal>> {
            lock(&self.created).clone()
        }
    }

    impl SignalFactory for MockSignalFactory {
        fn create(&self, id: &str) -> Result<Arc<dyn Signal>, SignalError> {
            if lock(&self.rejected).contains(id) {
                return Err(SignalError::Create {
                    id: id.to_string(),
                    reason: "rejected by mock factory".into(),
                });
            }
            self.creations.fetch_add(1, Ordering::SeqCst);
            let behavior = lock(&self.behaviors)
                .get(id)
                .cloned()
                .unwrap_or_else(|| self.default.clone());
            let signal = Arc::new(MockSignal::new(id, behavior));
            lock(&self.created).push(Arc::clone(&signal));
            Ok(signal)
        }
    }

    pub struct MockDevice {
        name: String,
        attrs: IndexMap<String, Arc<dyn Signal>>,
    }

    impl MockDevice {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                attrs: IndexMap::new(),
            }
        }

        /// Add an attribute backed by a fresh signal named `{device}.{attr}`.
        pub fn with_attr(mut self, attr: &str, behavior: MockBehavior) -> Self {
            let full = format!("{}.{attr}", self.name);
            self.attrs
                .insert(attr.to_string(), Arc::new(MockSignal::new(full, behavior)));
            self
        }
    }

    impl Device for MockDevice {
        fn name(&self) -> &str {
            &self.name
        }

        fn attribute(&self, attr: &str) -> Option<Arc<dyn Signal>> {
            self.attrs.get(attr).cloned()
        }
    }

    #[derive(Default)]
    pub struct MockDirectory {
        devices: HashMap<String, Arc<dyn Device>>,
        lookups: AtomicUsize,
    }

    impl MockDirectory {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_device(mut self, device: MockDevice) -> Self {
            self.devices
                .insert(device.name().to_string(), Arc::new(device));
            self
        }

        pub fn lookups(&self) -> usize {
            self.lookups.load(Ordering::SeqCst)
        }
    }

    impl DeviceDirectory for MockDirectory {
        fn device(&self, name: &str) -> Result<Arc<dyn Device>, DirectoryError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.devices
                .get(name)
                .cloned()
                .ok_or_else(|| DirectoryError::NotFound(name.to_string()))
        }
    }
}

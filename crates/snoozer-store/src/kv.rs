use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{Result, StoreError};

/// Capacity of the change-notification channel. Slow subscribers lag and
/// miss notifications rather than stalling writers.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Emitted after every successful write or removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    /// Name of the store that changed (`"durable"`, `"session"`, …).
    pub store: String,
    pub key: String,
}

/// Computes the replacement for a stored value from its current contents.
/// Returning `Ok(None)` leaves the value as it is.
pub type Modify<'a> = Box<dyn FnOnce(Option<Value>) -> Result<Option<Value>> + Send + 'a>;

/// Host-provided key-value storage with a per-item size quota.
///
/// Values are JSON documents replaced whole on every `set`. Implementations
/// must be `Send + Sync` so a single store can be shared between the engine,
/// the queue, and the daemon's background tasks.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Stable identifier used in logs and [`StoreChange`] notifications.
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Replace the value under `key`.
    ///
    /// Fails with [`StoreError::QuotaExceeded`] when the serialized value is
    /// larger than the store's per-item quota; the previous value is kept.
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Read, transform and write back `key` as one atomic step.
    ///
    /// No other writer, in this process or another one sharing the same
    /// backing file, can change `key` between the read and the write. An
    /// error from `f` aborts without writing. Returns whether a value was
    /// written.
    async fn modify<'a>(&self, key: &str, f: Modify<'a>) -> Result<bool>;

    /// Remove `key`. Silent no-op if it does not exist.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Subscribe to change notifications.
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

/// Serialize `value` and enforce the per-item quota.
pub(crate) fn encode_checked(key: &str, value: &Value, max: usize) -> Result<String> {
    let encoded = serde_json::to_string(value)?;
    let size = key.len() + encoded.len();
    if size > max {
        return Err(StoreError::QuotaExceeded {
            key: key.to_string(),
            size,
            max,
        });
    }
    Ok(encoded)
}

/// In-process store. Used as the session store in tests and by hosts that
/// have no session-scoped storage of their own.
pub struct MemoryStore {
    name: String,
    max_item_bytes: usize,
    values: Mutex<HashMap<String, Value>>,
    changes: broadcast::Sender<StoreChange>,
}

impl MemoryStore {
    pub fn new(name: &str) -> Self {
        Self::with_quota(name, usize::MAX)
    }

    pub fn with_quota(name: &str, max_item_bytes: usize) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            name: name.to_string(),
            max_item_bytes,
            values: Mutex::new(HashMap::new()),
            changes,
        }
    }

    fn notify(&self, key: &str) {
        // No receivers is fine; nobody is listening yet.
        let _ = self.changes.send(StoreChange {
            store: self.name.clone(),
            key: key.to_string(),
        });
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let values = self.values.lock().expect("memory store poisoned");
        Ok(values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        encode_checked(key, &value, self.max_item_bytes)?;
        {
            let mut values = self.values.lock().expect("memory store poisoned");
            values.insert(key.to_string(), value);
        }
        debug!(store = %self.name, key, "value written");
        self.notify(key);
        Ok(())
    }

    async fn modify<'a>(&self, key: &str, f: Modify<'a>) -> Result<bool> {
        let written = {
            let mut values = self.values.lock().expect("memory store poisoned");
            match f(values.get(key).cloned())? {
                Some(next) => {
                    encode_checked(key, &next, self.max_item_bytes)?;
                    values.insert(key.to_string(), next);
                    true
                }
                None => false,
            }
        };
        if written {
            debug!(store = %self.name, key, "value modified");
            self.notify(key);
        }
        Ok(written)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let removed = {
            let mut values = self.values.lock().expect("memory store poisoned");
            values.remove(key).is_some()
        };
        if removed {
            self.notify(key);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

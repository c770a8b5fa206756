use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use crate::error::StoreError;

/// Plain key-value map underneath the encrypted preference store.
///
/// Each mutating call is one atomic commit; there are no cross-key transactions.
pub trait KeyValueBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Insert or overwrite an entry.
    fn put(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Remove an entry; removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    fn contains(&self, key: &str) -> Result<bool, StoreError>;

    fn keys(&self) -> Result<Vec<String>, StoreError>;

    fn clear(&self) -> Result<(), StoreError>;
}

/// In-memory backend for tests and ephemeral sessions. Stores whatever it is given;
/// the preference store above it is responsible for encryption.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    inner: Arc<Mutex<BTreeMap<String, String>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_map<R>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, String>) -> R,
    ) -> Result<R, StoreError> {
        let mut map = self.inner.lock().map_err(|err| StoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        Ok(f(&mut map))
    }
}

impl KeyValueBackend for InMemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_map(|map| map.get(key).cloned())
    }

    fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.with_map(|map| {
            map.insert(key.to_string(), value);
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.with_map(|map| {
            map.remove(key);
        })
    }

    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        self.with_map(|map| map.contains_key(key))
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.with_map(|map| map.keys().cloned().collect())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.with_map(|map| map.clear())
    }
}

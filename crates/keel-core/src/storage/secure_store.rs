use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::Serialize;

use crate::{config::Algorithm, error::StoreError};

/// Cached facts about an open store. Never touches storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreInfo {
    pub algorithm: Algorithm,
    pub hardware_backed: bool,
    pub namespace: String,
    pub keys_encrypted: bool,
    pub names_encrypted: bool,
}

/// Contract for encrypted-at-rest storage of small string values and opaque blobs.
///
/// Every method except [`SecureStore::store_info`] may block on disk or cryptographic work.
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Persist a string value under a key, overwriting any existing entry.
    async fn put_string(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Retrieve the value for a key; `None` when absent (or unreadable, per failure policy).
    async fn get_string(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Remove a key and its value (idempotent).
    async fn remove_string(&self, key: &str) -> Result<(), StoreError>;

    async fn contains(&self, key: &str) -> Result<bool, StoreError>;

    /// Persist a blob under a logical name, overwriting any existing blob.
    async fn save_blob(&self, name: &str, bytes: Vec<u8>) -> Result<(), StoreError>;

    async fn read_blob(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Delete a blob; returns whether one existed.
    async fn delete_blob(&self, name: &str) -> Result<bool, StoreError>;

    async fn blob_exists(&self, name: &str) -> Result<bool, StoreError>;

    /// Remove every preference entry and blob in this store.
    async fn clear_all(&self) -> Result<(), StoreError>;

    async fn list_keys(&self) -> Result<BTreeSet<String>, StoreError>;

    async fn list_blob_names(&self) -> Result<BTreeSet<String>, StoreError>;

    fn store_info(&self) -> StoreInfo;
}

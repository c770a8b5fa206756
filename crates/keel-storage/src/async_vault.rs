use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;
use keel_core::{
    codec::ObjectCodec,
    storage::{SecureStore, StoreInfo},
    StoreError,
};
use tokio::sync::Semaphore;

use crate::vault::{Vault, VaultBuilder};

/// Operations allowed on the blocking pool at once unless configured otherwise.
pub const DEFAULT_IO_LIMIT: usize = 8;

/// Async facade over [`Vault`]: each call runs on the tokio blocking pool, at most
/// `io_limit` at a time.
///
/// Dropping a call's future before it gets a slot cancels it. Once running, an operation
/// completes even if its future is dropped.
#[derive(Clone)]
pub struct AsyncVault {
    inner: Arc<Vault>,
    permits: Arc<Semaphore>,
}

impl AsyncVault {
    pub fn new(vault: Vault) -> Self {
        Self::with_io_limit(vault, DEFAULT_IO_LIMIT)
    }

    pub fn with_io_limit(vault: Vault, io_limit: usize) -> Self {
        Self {
            inner: Arc::new(vault),
            permits: Arc::new(Semaphore::new(io_limit.max(1))),
        }
    }

    /// Open a vault without blocking the calling task.
    pub async fn open(builder: VaultBuilder) -> Result<Self, StoreError> {
        let vault = tokio::task::spawn_blocking(move || builder.open())
            .await
            .map_err(join_err)??;
        Ok(Self::new(vault))
    }

    /// The underlying blocking engine.
    pub fn blocking(&self) -> &Vault {
        &self.inner
    }

    pub async fn put_object<T, C>(&self, key: &str, value: T, codec: C) -> Result<(), StoreError>
    where
        T: Send + 'static,
        C: ObjectCodec<T> + 'static,
    {
        let key = key.to_string();
        self.run(move |vault| vault.put_object(&key, &value, &codec))
            .await
    }

    pub async fn get_object<T, C>(&self, key: &str, codec: C) -> Result<Option<T>, StoreError>
    where
        T: Send + 'static,
        C: ObjectCodec<T> + 'static,
    {
        let key = key.to_string();
        self.run(move |vault| vault.get_object(&key, &codec)).await
    }

    pub async fn remove_object(&self, key: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        self.run(move |vault| vault.remove_object(&key)).await
    }

    async fn run<R, F>(&self, op: F) -> Result<R, StoreError>
    where
        R: Send + 'static,
        F: FnOnce(&Vault) -> Result<R, StoreError> + Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(StoreError::storage)?;
        let vault = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            op(&vault)
        })
        .await
        .map_err(join_err)?
    }
}

#[async_trait]
impl SecureStore for AsyncVault {
    async fn put_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let (key, value) = (key.to_string(), value.to_string());
        self.run(move |vault| vault.put_string(&key, &value)).await
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.run(move |vault| vault.get_string(&key)).await
    }

    async fn remove_string(&self, key: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        self.run(move |vault| vault.remove_string(&key)).await
    }

    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        let key = key.to_string();
        self.run(move |vault| vault.contains(&key)).await
    }

    async fn save_blob(&self, name: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let name = name.to_string();
        self.run(move |vault| vault.save_blob(&name, bytes)).await
    }

    async fn read_blob(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let name = name.to_string();
        self.run(move |vault| vault.read_blob(&name)).await
    }

    async fn delete_blob(&self, name: &str) -> Result<bool, StoreError> {
        let name = name.to_string();
        self.run(move |vault| vault.delete_blob(&name)).await
    }

    async fn blob_exists(&self, name: &str) -> Result<bool, StoreError> {
        let name = name.to_string();
        self.run(move |vault| vault.blob_exists(&name)).await
    }

    async fn clear_all(&self) -> Result<(), StoreError> {
        self.run(|vault| vault.clear_all()).await
    }

    async fn list_keys(&self) -> Result<BTreeSet<String>, StoreError> {
        self.run(|vault| vault.list_keys()).await
    }

    async fn list_blob_names(&self) -> Result<BTreeSet<String>, StoreError> {
        self.run(|vault| vault.list_blob_names()).await
    }

    fn store_info(&self) -> StoreInfo {
        self.inner.store_info()
    }
}

fn join_err(err: tokio::task::JoinError) -> StoreError {
    StoreError::Storage {
        reason: format!("blocking task failed: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use keel_core::{codec::JsonCodec, StoreConfig};

    use super::*;
    use crate::key_provider::InMemoryCustodian;

    async fn open(root: &std::path::Path) -> AsyncVault {
        AsyncVault::open(Vault::builder(
            StoreConfig::default(),
            root,
            Arc::new(InMemoryCustodian::new()),
        ))
        .await
        .expect("open")
    }

    #[tokio::test]
    async fn string_round_trip_and_idempotent_remove() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open(dir.path()).await;

        store.put_string("greeting", "hello").await.expect("put");
        assert_eq!(
            store.get_string("greeting").await.unwrap().as_deref(),
            Some("hello")
        );
        store.remove_string("greeting").await.expect("remove");
        store.remove_string("greeting").await.expect("remove again");
        assert!(!store.contains("greeting").await.unwrap());
    }

    #[tokio::test]
    async fn objects_through_the_facade() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open(dir.path()).await;
        let tags = vec!["a".to_string(), "b".to_string()];

        store
            .put_object("tags", tags.clone(), JsonCodec::new())
            .await
            .expect("put");
        let loaded: Option<Vec<String>> = store
            .get_object("tags", JsonCodec::new())
            .await
            .expect("get");
        assert_eq!(loaded, Some(tags));
        store.remove_object("tags").await.expect("remove");
        assert!(!store.contains("tags").await.unwrap());
    }

    #[tokio::test]
    async fn hardware_required_fails_at_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = AsyncVault::open(Vault::builder(
            StoreConfig::high_security(),
            dir.path(),
            Arc::new(InMemoryCustodian::new()),
        ))
        .await
        .err()
        .expect("must not open");
        assert!(matches!(err, StoreError::HardwareRequired { .. }));
    }
}

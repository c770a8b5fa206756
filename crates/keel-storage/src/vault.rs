use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use keel_core::{
    codec::ObjectCodec,
    storage::{KeyValueBackend, StoreInfo},
    StoreConfig, StoreError,
};
use parking_lot::RwLock;
use tracing::{debug, info, instrument};

use crate::{
    aead::EnvelopeEngine, blob_store::BlobStore, failure::FailureHandler,
    file_backend::JsonFileBackend, key_provider::KeyCustodian, keyset::KeyHierarchy,
    names::NameCodec, preferences::PreferenceStore,
};

/// Blocking encrypted storage engine: a preference map plus a blob directory, both scoped
/// to one namespace.
///
/// Every method may block on disk or cryptographic work and is safe to call from many
/// threads at once. Single-entry operations share the store-wide gate; [`Vault::clear_all`]
/// takes it exclusively, so a clear waits for in-flight operations and operations issued
/// after it started wait for the clear.
pub struct Vault {
    config: StoreConfig,
    info: StoreInfo,
    prefs: PreferenceStore,
    blobs: BlobStore,
    gate: RwLock<()>,
}

/// Assembles a [`Vault`] from a configuration, a storage root and a key custodian.
pub struct VaultBuilder {
    config: StoreConfig,
    root: PathBuf,
    custodian: Arc<dyn KeyCustodian>,
    backend: Option<Arc<dyn KeyValueBackend>>,
}

impl VaultBuilder {
    pub fn new(
        config: StoreConfig,
        root: impl Into<PathBuf>,
        custodian: Arc<dyn KeyCustodian>,
    ) -> Self {
        Self {
            config,
            root: root.into(),
            custodian,
            backend: None,
        }
    }

    /// Use a custom preference map instead of the namespace's JSON file.
    pub fn backend(mut self, backend: Arc<dyn KeyValueBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Derive the key hierarchy and open both stores. Fails without leaving a usable
    /// engine if any key cannot be obtained.
    #[instrument(skip_all, fields(namespace = %self.config.namespace()))]
    pub fn open(self) -> Result<Vault, StoreError> {
        let config = self.config;
        let layout = Layout::new(&self.root, &config);

        let keys = KeyHierarchy::load_or_create(&config, self.custodian.as_ref(), &layout.keyset)?;
        let engine = EnvelopeEngine::new(&config);
        let failures = FailureHandler::new(config.decryption_failure_policy());
        let metadata = Arc::new(keys.metadata);

        let backend = match self.backend {
            Some(backend) => backend,
            None => Arc::new(JsonFileBackend::open(&layout.prefs)?),
        };
        let prefs = PreferenceStore::new(
            backend,
            engine,
            keys.prefs,
            NameCodec::for_pref_keys(config.encrypt_keys().then(|| metadata.clone())),
            failures,
        );
        let blobs = BlobStore::new(
            &layout.blobs,
            engine,
            keys.blobs,
            NameCodec::for_blob_names(config.encrypt_file_names().then(|| metadata.clone())),
            failures,
        );

        let info = StoreInfo {
            algorithm: config.algorithm(),
            hardware_backed: keys.hardware_backed,
            namespace: config.namespace().to_string(),
            keys_encrypted: prefs.keys_encrypted(),
            names_encrypted: blobs.names_encrypted(),
        };
        info!(
            algorithm = %info.algorithm,
            hardware_backed = info.hardware_backed,
            "vault opened"
        );
        debug!(root = ?layout.dir, "vault layout");

        Ok(Vault {
            config,
            info,
            prefs,
            blobs,
            gate: RwLock::new(()),
        })
    }
}

/// On-disk locations for one namespace.
struct Layout {
    dir: PathBuf,
    prefs: PathBuf,
    blobs: PathBuf,
    keyset: PathBuf,
}

impl Layout {
    fn new(root: &Path, config: &StoreConfig) -> Self {
        let dir = root.join(config.durability_mode().dir_name());
        let ns = config.namespace();
        Self {
            prefs: dir.join(format!("keel_prefs_{ns}.json")),
            blobs: dir.join(format!("keel_blobs_{ns}")),
            keyset: dir.join(format!("keel_keysets_{ns}.json")),
            dir,
        }
    }
}

impl Vault {
    pub fn builder(
        config: StoreConfig,
        root: impl Into<PathBuf>,
        custodian: Arc<dyn KeyCustodian>,
    ) -> VaultBuilder {
        VaultBuilder::new(config, root, custodian)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Cached facts; never touches storage.
    pub fn store_info(&self) -> StoreInfo {
        self.info.clone()
    }

    pub fn put_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _gate = self.gate.read();
        self.prefs.put(key, value.as_bytes())
    }

    pub fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _gate = self.gate.read();
        self.prefs.get_string(key)
    }

    pub fn remove_string(&self, key: &str) -> Result<(), StoreError> {
        let _gate = self.gate.read();
        self.prefs.remove(key)
    }

    /// Existence check; does not decrypt.
    pub fn contains(&self, key: &str) -> Result<bool, StoreError> {
        let _gate = self.gate.read();
        self.prefs.contains(key)
    }

    pub fn put_object<T>(
        &self,
        key: &str,
        value: &T,
        codec: &dyn ObjectCodec<T>,
    ) -> Result<(), StoreError> {
        let _gate = self.gate.read();
        self.prefs.put_object(key, value, codec)
    }

    pub fn get_object<T>(
        &self,
        key: &str,
        codec: &dyn ObjectCodec<T>,
    ) -> Result<Option<T>, StoreError> {
        let _gate = self.gate.read();
        self.prefs.get_object(key, codec)
    }

    pub fn remove_object(&self, key: &str) -> Result<(), StoreError> {
        self.remove_string(key)
    }

    /// Names longer than 191 bytes (175 with encrypted filenames) are rejected.
    pub fn save_blob(&self, name: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let _gate = self.gate.read();
        self.blobs.save(name, bytes)
    }

    pub fn read_blob(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let _gate = self.gate.read();
        self.blobs.read(name)
    }

    /// Returns whether a blob existed.
    pub fn delete_blob(&self, name: &str) -> Result<bool, StoreError> {
        let _gate = self.gate.read();
        self.blobs.delete(name)
    }

    pub fn blob_exists(&self, name: &str) -> Result<bool, StoreError> {
        let _gate = self.gate.read();
        self.blobs.exists(name)
    }

    pub fn list_keys(&self) -> Result<BTreeSet<String>, StoreError> {
        let _gate = self.gate.read();
        self.prefs.list_keys()
    }

    pub fn list_blob_names(&self) -> Result<BTreeSet<String>, StoreError> {
        let _gate = self.gate.read();
        self.blobs.list_names()
    }

    /// Remove every preference entry and every blob of this namespace.
    #[instrument(skip_all, fields(namespace = %self.info.namespace))]
    pub fn clear_all(&self) -> Result<(), StoreError> {
        let _gate = self.gate.write();
        self.prefs.clear()?;
        self.blobs.clear()?;
        info!("vault cleared");
        Ok(())
    }
}

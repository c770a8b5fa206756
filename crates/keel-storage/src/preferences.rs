use std::{collections::BTreeSet, sync::Arc};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use keel_core::{codec::ObjectCodec, storage::KeyValueBackend, StoreError};
use tracing::{debug, instrument};

use crate::{
    aead::EnvelopeEngine, failure::FailureHandler, keyset::DataKey, memory::SecretBuffer,
    names::NameCodec,
};

/// Encrypting adapter over a [`KeyValueBackend`].
///
/// Values are stored as `base64(envelope)`; physical keys come from the [`NameCodec`].
pub(crate) struct PreferenceStore {
    backend: Arc<dyn KeyValueBackend>,
    engine: EnvelopeEngine,
    key: DataKey,
    names: NameCodec,
    failures: FailureHandler,
}

impl PreferenceStore {
    pub(crate) fn new(
        backend: Arc<dyn KeyValueBackend>,
        engine: EnvelopeEngine,
        key: DataKey,
        names: NameCodec,
        failures: FailureHandler,
    ) -> Self {
        Self {
            backend,
            engine,
            key,
            names,
            failures,
        }
    }

    pub(crate) fn keys_encrypted(&self) -> bool {
        self.names.is_encrypted()
    }

    #[instrument(skip_all)]
    pub(crate) fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let physical = self.names.encrypt_name(key)?;
        let envelope = self
            .engine
            .encrypt(&self.key, value, self.engine.associated_data(key))?;
        self.backend.put(&physical, STANDARD.encode(envelope))
    }

    /// Decrypted bytes for `key`, or `None` when absent or unreadable under the policy.
    #[instrument(skip_all)]
    pub(crate) fn get(&self, key: &str) -> Result<Option<SecretBuffer>, StoreError> {
        let physical = self.names.encrypt_name(key)?;
        let Some(stored) = self.backend.get(&physical)? else {
            return Ok(None);
        };

        match self.open(key, &stored) {
            Ok(plain) => Ok(Some(SecretBuffer::new(plain, self.engine.secure_memory()))),
            Err(err) => self
                .failures
                .recover(err, || self.backend.remove(&physical)),
        }
    }

    pub(crate) fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        let Some(plain) = self.get(key)? else {
            return Ok(None);
        };
        match String::from_utf8(plain.into_inner()) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                let cause = StoreError::Serialization {
                    entry: key.to_string(),
                    reason: err.utf8_error().to_string(),
                };
                // Dropping the rejected bytes through a buffer keeps secure-memory wiping.
                drop(SecretBuffer::new(err.into_bytes(), self.engine.secure_memory()));
                self.failures.recover(cause, || self.remove(key))
            }
        }
    }

    pub(crate) fn put_object<T>(
        &self,
        key: &str,
        value: &T,
        codec: &dyn ObjectCodec<T>,
    ) -> Result<(), StoreError> {
        let encoded = codec.encode(value).map_err(|reason| StoreError::Serialization {
            entry: key.to_string(),
            reason,
        })?;
        let encoded = SecretBuffer::new(encoded, self.engine.secure_memory());
        self.put(key, &encoded)
    }

    pub(crate) fn get_object<T>(
        &self,
        key: &str,
        codec: &dyn ObjectCodec<T>,
    ) -> Result<Option<T>, StoreError> {
        let Some(plain) = self.get(key)? else {
            return Ok(None);
        };
        match codec.decode(&plain) {
            Ok(value) => Ok(Some(value)),
            Err(reason) => self.failures.recover(
                StoreError::Serialization {
                    entry: key.to_string(),
                    reason,
                },
                || self.remove(key),
            ),
        }
    }

    #[instrument(skip_all)]
    pub(crate) fn remove(&self, key: &str) -> Result<(), StoreError> {
        let physical = self.names.encrypt_name(key)?;
        self.backend.remove(&physical)
    }

    pub(crate) fn contains(&self, key: &str) -> Result<bool, StoreError> {
        let physical = self.names.encrypt_name(key)?;
        self.backend.contains(&physical)
    }

    /// Logical keys of every entry whose physical key can be decoded.
    #[instrument(skip_all)]
    pub(crate) fn list_keys(&self) -> Result<BTreeSet<String>, StoreError> {
        let mut out = BTreeSet::new();
        for physical in self.backend.keys()? {
            match self.names.decrypt_name(&physical) {
                Ok(key) => {
                    out.insert(key);
                }
                Err(err) => debug!(error = %err, "skipping undecodable preference key"),
            }
        }
        Ok(out)
    }

    pub(crate) fn clear(&self) -> Result<(), StoreError> {
        self.backend.clear()
    }

    fn open(&self, key: &str, stored: &str) -> Result<Vec<u8>, StoreError> {
        let envelope = STANDARD
            .decode(stored)
            .map_err(|e| StoreError::Decryption {
                entry: key.to_string(),
                reason: format!("stored value is not base64: {e}"),
            })?;
        self.engine
            .decrypt(&self.key, &envelope, self.engine.associated_data(key), key)
    }
}

#[cfg(test)]
mod tests {
    use keel_core::{codec::JsonCodec, storage::InMemoryBackend, Algorithm, FailurePolicy};
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::keyset::NameKey;

    fn store(
        backend: InMemoryBackend,
        encrypt_keys: bool,
        policy: FailurePolicy,
    ) -> PreferenceStore {
        let config = keel_core::StoreConfig::builder()
            .decryption_failure_policy(policy)
            .build()
            .unwrap();
        PreferenceStore::new(
            Arc::new(backend),
            EnvelopeEngine::new(&config),
            DataKey::generate(Algorithm::Aes256Gcm),
            NameCodec::for_pref_keys(encrypt_keys.then(|| Arc::new(NameKey::generate()))),
            FailureHandler::new(policy),
        )
    }

    #[test]
    fn stores_base64_ciphertext_only() {
        let backend = InMemoryBackend::new();
        let prefs = store(backend.clone(), false, FailurePolicy::ReturnEmpty);
        prefs.put("token", b"hunter2").expect("put");

        let raw = backend.get("token").unwrap().expect("stored under plain key");
        assert!(!raw.contains("hunter2"));
        assert!(STANDARD.decode(&raw).is_ok());
        assert_eq!(prefs.get_string("token").unwrap().as_deref(), Some("hunter2"));
    }

    #[test]
    fn encrypted_keys_hide_names_but_enumerate() {
        let backend = InMemoryBackend::new();
        let prefs = store(backend.clone(), true, FailurePolicy::ReturnEmpty);
        prefs.put("a", b"1").unwrap();
        prefs.put("b", b"2").unwrap();
        backend.put("garbage", "AAAA".into()).unwrap();

        assert!(!backend.contains("a").unwrap());
        assert!(prefs.contains("a").unwrap());
        let keys = prefs.list_keys().unwrap();
        assert_eq!(keys, BTreeSet::from(["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn swapped_values_do_not_decrypt() {
        let backend = InMemoryBackend::new();
        let prefs = store(backend.clone(), false, FailurePolicy::Raise);
        prefs.put("a", b"alpha").unwrap();
        prefs.put("b", b"beta").unwrap();
        let a = backend.get("a").unwrap().unwrap();
        backend.put("b", a).unwrap();

        let err = prefs.get_string("b").expect_err("bound to key a");
        assert!(matches!(err, StoreError::Decryption { .. }));
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Session {
        user: String,
        ttl: u64,
    }

    #[test]
    fn objects_round_trip_and_decode_failures_follow_policy() {
        let backend = InMemoryBackend::new();
        let prefs = store(backend.clone(), false, FailurePolicy::DeleteAndReturnEmpty);
        let codec = JsonCodec::<Session>::new();
        let session = Session {
            user: "ada".into(),
            ttl: 60,
        };
        prefs.put_object("session", &session, &codec).unwrap();
        assert_eq!(prefs.get_object("session", &codec).unwrap(), Some(session));

        prefs.put("session", b"not json").unwrap();
        assert_eq!(prefs.get_object("session", &codec).unwrap(), None);
        assert!(!prefs.contains("session").unwrap());
    }
}

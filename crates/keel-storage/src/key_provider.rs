use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

const MASTER_KEY_LEN: usize = 32;
const WRAP_NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("generation error: {0}")]
    Generation(String),
    #[error("unwrap failed for {alias}: wrong master key or corrupted key material")]
    Unwrap { alias: String },
}

/// Holder of namespace-scoped master keys (OS keychain in production; memory in tests).
///
/// Master keys never leave the custodian: callers hand over data keys to wrap or unwrap.
/// `context` is bound as associated data so a wrapped key only unwraps for the location
/// it was created for.
pub trait KeyCustodian: Send + Sync {
    /// Whether master keys live behind a hardware boundary.
    fn is_hardware_backed(&self) -> bool;

    fn wrap_key(
        &self,
        master_alias: &str,
        key: &[u8],
        context: &[u8],
    ) -> Result<Vec<u8>, KeyError>;

    fn unwrap_key(
        &self,
        master_alias: &str,
        wrapped: &[u8],
        context: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KeyError>;
}

/// Durable home of master keys, one encoded secret per alias.
pub trait SecretStore: Send + Sync {
    /// `Ok(None)` only when nothing was ever stored for `alias`. Any other failure is an
    /// error; callers must not treat it as a missing key.
    fn load(&self, alias: &str) -> Result<Option<Zeroizing<String>>, KeyError>;

    fn save(&self, alias: &str, secret: &str) -> Result<(), KeyError>;
}

/// OS keychain entries under one service name.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, alias: &str) -> Result<keyring::Entry, KeyError> {
        keyring::Entry::new(&self.service, alias)
            .map_err(|e| KeyError::Keyring(format!("keychain entry {alias}: {e}")))
    }
}

impl SecretStore for KeyringStore {
    fn load(&self, alias: &str) -> Result<Option<Zeroizing<String>>, KeyError> {
        lookup(alias, self.entry(alias)?.get_password())
    }

    fn save(&self, alias: &str, secret: &str) -> Result<(), KeyError> {
        self.entry(alias)?
            .set_password(secret)
            .map_err(|e| KeyError::Keyring(format!("keychain store for {alias}: {e}")))
    }
}

fn lookup(
    alias: &str,
    result: keyring::Result<String>,
) -> Result<Option<Zeroizing<String>>, KeyError> {
    match result {
        Ok(secret) => Ok(Some(Zeroizing::new(secret))),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(KeyError::Keyring(format!("keychain get for {alias}: {e}"))),
    }
}

/// Custodian whose master keys live in a [`SecretStore`], the OS keychain by default.
///
/// A master key is generated only when the store has never held one for the alias.
/// Keys are cached for the custodian's lifetime, so the keychain is consulted once
/// per alias.
pub struct KeyringCustodian {
    store: Box<dyn SecretStore>,
    cache: Mutex<HashMap<String, Zeroizing<[u8; MASTER_KEY_LEN]>>>,
}

impl KeyringCustodian {
    pub fn new(service: impl Into<String>) -> Self {
        Self::with_store(KeyringStore::new(service))
    }

    pub fn with_store(store: impl SecretStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn master_key(&self, alias: &str) -> Result<Zeroizing<[u8; MASTER_KEY_LEN]>, KeyError> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|err| KeyError::Keyring(format!("lock poisoned: {err}")))?;
        if let Some(key) = cache.get(alias) {
            return Ok(key.clone());
        }

        let key = match self.store.load(alias)? {
            Some(secret) => decode_key(&secret)?,
            None => {
                let key = generate_master_key();
                self.store.save(alias, &encode_key(&key))?;
                debug!(%alias, "generated master key");
                key
            }
        };
        cache.insert(alias.to_string(), key.clone());
        Ok(key)
    }
}

impl KeyCustodian for KeyringCustodian {
    fn is_hardware_backed(&self) -> bool {
        false
    }

    fn wrap_key(
        &self,
        master_alias: &str,
        key: &[u8],
        context: &[u8],
    ) -> Result<Vec<u8>, KeyError> {
        let master = self.master_key(master_alias)?;
        wrap_with(&master, key, context)
    }

    fn unwrap_key(
        &self,
        master_alias: &str,
        wrapped: &[u8],
        context: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KeyError> {
        let master = self.master_key(master_alias)?;
        unwrap_with(&master, master_alias, wrapped, context)
    }
}

/// In-memory custodian for tests and ephemeral sessions. Clones share master keys.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCustodian {
    inner: Arc<Mutex<HashMap<String, Zeroizing<[u8; MASTER_KEY_LEN]>>>>,
    hardware_backed: bool,
}

impl InMemoryCustodian {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report master keys as hardware-backed, to exercise hardware key protection paths.
    pub fn hardware_backed(mut self, backed: bool) -> Self {
        self.hardware_backed = backed;
        self
    }

    fn master_key(&self, alias: &str) -> Result<Zeroizing<[u8; MASTER_KEY_LEN]>, KeyError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))?;

        let key = guard
            .entry(alias.to_string())
            .or_insert_with(generate_master_key);
        Ok(key.clone())
    }
}

impl KeyCustodian for InMemoryCustodian {
    fn is_hardware_backed(&self) -> bool {
        self.hardware_backed
    }

    fn wrap_key(
        &self,
        master_alias: &str,
        key: &[u8],
        context: &[u8],
    ) -> Result<Vec<u8>, KeyError> {
        let master = self.master_key(master_alias)?;
        wrap_with(&master, key, context)
    }

    fn unwrap_key(
        &self,
        master_alias: &str,
        wrapped: &[u8],
        context: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KeyError> {
        let master = self.master_key(master_alias)?;
        unwrap_with(&master, master_alias, wrapped, context)
    }
}

/// Wrapped form is `nonce || ciphertext || tag` under AES-256-GCM.
fn wrap_with(
    master: &[u8; MASTER_KEY_LEN],
    key: &[u8],
    context: &[u8],
) -> Result<Vec<u8>, KeyError> {
    let cipher = Aes256Gcm::new_from_slice(master)
        .map_err(|e| KeyError::Generation(format!("cipher init failed: {e}")))?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let sealed = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: key,
                aad: context,
            },
        )
        .map_err(|e| KeyError::Generation(format!("wrap failed: {e}")))?;

    let mut out = Vec::with_capacity(WRAP_NONCE_LEN + sealed.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&sealed);
    Ok(out)
}

fn unwrap_with(
    master: &[u8; MASTER_KEY_LEN],
    alias: &str,
    wrapped: &[u8],
    context: &[u8],
) -> Result<Zeroizing<Vec<u8>>, KeyError> {
    if wrapped.len() <= WRAP_NONCE_LEN {
        return Err(KeyError::Decode(format!(
            "wrapped key too short: {} bytes",
            wrapped.len()
        )));
    }
    let cipher = Aes256Gcm::new_from_slice(master)
        .map_err(|e| KeyError::Generation(format!("cipher init failed: {e}")))?;
    let (nonce, sealed) = wrapped.split_at(WRAP_NONCE_LEN);
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: sealed,
                aad: context,
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| KeyError::Unwrap {
            alias: alias.to_string(),
        })
}

fn generate_master_key() -> Zeroizing<[u8; MASTER_KEY_LEN]> {
    let mut bytes = Zeroizing::new([0u8; MASTER_KEY_LEN]);
    OsRng.fill_bytes(&mut *bytes);
    bytes
}

fn encode_key(key: &[u8; MASTER_KEY_LEN]) -> String {
    general_purpose::STANDARD.encode(key)
}

fn decode_key(secret: &str) -> Result<Zeroizing<[u8; MASTER_KEY_LEN]>, KeyError> {
    let bytes = Zeroizing::new(
        general_purpose::STANDARD
            .decode(secret)
            .map_err(|e| KeyError::Decode(e.to_string()))?,
    );

    if bytes.len() != MASTER_KEY_LEN {
        return Err(KeyError::Decode(format!(
            "expected {MASTER_KEY_LEN} bytes, got {}",
            bytes.len()
        )));
    }

    let mut out = Zeroizing::new([0u8; MASTER_KEY_LEN]);
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_custodian_round_trips_wrapped_key() {
        let custodian = InMemoryCustodian::new();
        let wrapped = custodian
            .wrap_key("alias_default", b"data-key-bytes", b"alias_default_prefs")
            .expect("wrap");
        assert!(!wrapped
            .windows(b"data-key-bytes".len())
            .any(|w| w == b"data-key-bytes"));

        let unwrapped = custodian
            .clone()
            .unwrap_key("alias_default", &wrapped, b"alias_default_prefs")
            .expect("unwrap");
        assert_eq!(unwrapped.as_slice(), b"data-key-bytes");
    }

    #[test]
    fn unwrap_rejects_other_context_or_alias() {
        let custodian = InMemoryCustodian::new();
        let wrapped = custodian
            .wrap_key("alias_default", b"k", b"alias_default_prefs")
            .expect("wrap");

        let err = custodian
            .unwrap_key("alias_default", &wrapped, b"alias_default_blob")
            .expect_err("context mismatch");
        assert!(matches!(err, KeyError::Unwrap { .. }));

        let err = custodian
            .unwrap_key("alias_other", &wrapped, b"alias_default_prefs")
            .expect_err("different master key");
        assert!(matches!(err, KeyError::Unwrap { .. }));
    }

    #[test]
    fn hardware_flag_is_reported() {
        assert!(!InMemoryCustodian::new().is_hardware_backed());
        assert!(InMemoryCustodian::new()
            .hardware_backed(true)
            .is_hardware_backed());
        assert!(!KeyringCustodian::new("keel-test").is_hardware_backed());
    }

    /// Secrets shared between custodians, standing in for a persistent keychain.
    #[derive(Clone, Default)]
    struct SharedSecrets(Arc<Mutex<HashMap<String, String>>>);

    impl SecretStore for SharedSecrets {
        fn load(&self, alias: &str) -> Result<Option<Zeroizing<String>>, KeyError> {
            Ok(self.0.lock().unwrap().get(alias).cloned().map(Zeroizing::new))
        }

        fn save(&self, alias: &str, secret: &str) -> Result<(), KeyError> {
            self.0
                .lock()
                .unwrap()
                .insert(alias.to_string(), secret.to_string());
            Ok(())
        }
    }

    /// A keychain that is present but refuses reads.
    #[derive(Clone, Default)]
    struct LockedKeychain {
        saves: Arc<Mutex<usize>>,
    }

    impl SecretStore for LockedKeychain {
        fn load(&self, alias: &str) -> Result<Option<Zeroizing<String>>, KeyError> {
            Err(KeyError::Keyring(format!("{alias}: user interaction required")))
        }

        fn save(&self, _alias: &str, _secret: &str) -> Result<(), KeyError> {
            *self.saves.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[test]
    fn keychain_lookup_separates_missing_from_failure() {
        assert!(lookup("a", Err(keyring::Error::NoEntry)).unwrap().is_none());
        assert_eq!(
            lookup("a", Ok("secret".into())).unwrap().as_deref().map(String::as_str),
            Some("secret")
        );

        let failure = keyring::Error::PlatformFailure(Box::new(std::io::Error::other("locked")));
        let err = lookup("a", Err(failure)).expect_err("platform failure propagates");
        assert!(matches!(err, KeyError::Keyring(_)));
    }

    #[test]
    fn master_key_survives_a_new_custodian() {
        let secrets = SharedSecrets::default();
        let wrapped = KeyringCustodian::with_store(secrets.clone())
            .wrap_key("alias_default", b"data-key", b"alias_default_prefs")
            .expect("wrap");

        let reopened = KeyringCustodian::with_store(secrets.clone());
        let key = reopened
            .unwrap_key("alias_default", &wrapped, b"alias_default_prefs")
            .expect("same master key after reopen");
        assert_eq!(key.as_slice(), b"data-key");
        assert_eq!(secrets.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn unreadable_keychain_never_replaces_master_key() {
        let keychain = LockedKeychain::default();
        let custodian = KeyringCustodian::with_store(keychain.clone());

        let err = custodian
            .wrap_key("alias_default", b"k", b"alias_default_prefs")
            .expect_err("read failure must surface");
        assert!(matches!(err, KeyError::Keyring(_)));
        assert_eq!(*keychain.saves.lock().unwrap(), 0);
    }

    #[test]
    fn corrupted_keychain_secret_is_not_overwritten() {
        let secrets = SharedSecrets::default();
        secrets.save("alias_default", "not-a-key").unwrap();
        let custodian = KeyringCustodian::with_store(secrets.clone());

        let err = custodian
            .wrap_key("alias_default", b"k", b"alias_default_prefs")
            .expect_err("undecodable secret");
        assert!(matches!(err, KeyError::Decode(_)));
        assert_eq!(
            secrets.0.lock().unwrap().get("alias_default").map(String::as_str),
            Some("not-a-key")
        );
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let err = decode_key("abcd").expect_err("should reject wrong length");
        assert!(matches!(err, KeyError::Decode(_)));
    }
}

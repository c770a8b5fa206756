use std::{
    collections::BTreeMap,
    fmt,
    fs::{self, File},
    io::{Read, Write},
    path::Path,
};

use base64::{engine::general_purpose, Engine as _};
use keel_core::{Algorithm, KeyProtection, StoreConfig, StoreError};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::key_provider::KeyCustodian;

/// AES-256-SIV takes two 256-bit subkeys.
pub(crate) const NAME_KEY_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyPurpose {
    Preferences,
    Blobs,
    Metadata,
}

impl KeyPurpose {
    fn suffix(self) -> &'static str {
        match self {
            KeyPurpose::Preferences => "prefs",
            KeyPurpose::Blobs => "blob",
            KeyPurpose::Metadata => "metadata",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum KeyType {
    Aead(Algorithm),
    Siv,
}

impl KeyType {
    fn key_len(self) -> usize {
        match self {
            KeyType::Aead(algorithm) => algorithm.key_len(),
            KeyType::Siv => NAME_KEY_LEN,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredKey {
    key_type: KeyType,
    wrapped: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Keyset {
    keys: BTreeMap<String, StoredKey>,
}

/// Symmetric key for value and blob envelopes.
pub(crate) struct DataKey {
    algorithm: Algorithm,
    bytes: Zeroizing<Vec<u8>>,
}

impl DataKey {
    pub(crate) fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[cfg(test)]
    pub(crate) fn generate(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            bytes: random_key(algorithm.key_len()),
        }
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataKey")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Deterministic-encryption key for names.
pub(crate) struct NameKey {
    bytes: Zeroizing<Vec<u8>>,
}

impl NameKey {
    pub(crate) fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[cfg(test)]
    pub(crate) fn generate() -> Self {
        Self {
            bytes: random_key(NAME_KEY_LEN),
        }
    }
}

impl fmt::Debug for NameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameKey").finish_non_exhaustive()
    }
}

/// The three keys of one engine instance, each wrapped by the namespace-scoped master key.
#[derive(Debug)]
pub(crate) struct KeyHierarchy {
    pub(crate) prefs: DataKey,
    pub(crate) blobs: DataKey,
    pub(crate) metadata: NameKey,
    pub(crate) hardware_backed: bool,
}

impl KeyHierarchy {
    /// Unwrap the keys recorded in the keyset file at `path`, generating and recording
    /// whichever are missing.
    ///
    /// A new keyset file is created without replacing one that appeared meanwhile; if
    /// another engine created it first, its keys are loaded instead of ours.
    pub(crate) fn load_or_create(
        config: &StoreConfig,
        custodian: &dyn KeyCustodian,
        path: &Path,
    ) -> Result<Self, StoreError> {
        let master_alias = config.scoped_master_alias();
        let hardware = custodian.is_hardware_backed();
        match config.key_protection() {
            KeyProtection::HardwareRequired if !hardware => {
                return Err(StoreError::HardwareRequired {
                    alias: master_alias,
                })
            }
            KeyProtection::HardwarePreferred if !hardware => {
                warn!(
                    alias = %master_alias,
                    "hardware key protection unavailable, using software keys"
                );
            }
            _ => {}
        }

        loop {
            let existing = read_keyset(path)?;
            let create_new = existing.is_none();
            let mut keyset = existing.unwrap_or_default();
            let mut loader = Loader {
                keyset: &mut keyset,
                custodian,
                master_alias: &master_alias,
                dirty: false,
            };

            let (prefs_type, prefs) =
                loader.obtain(KeyPurpose::Preferences, KeyType::Aead(config.algorithm()))?;
            let (blobs_type, blobs) =
                loader.obtain(KeyPurpose::Blobs, KeyType::Aead(config.algorithm()))?;
            let (_, metadata) = loader.obtain(KeyPurpose::Metadata, KeyType::Siv)?;
            let dirty = loader.dirty;

            if dirty && !write_keyset(path, &keyset, create_new)? {
                debug!(alias = %master_alias, "keyset created concurrently, reloading");
                continue;
            }

            return Ok(Self {
                prefs: DataKey {
                    algorithm: aead_algorithm(prefs_type)?,
                    bytes: prefs,
                },
                blobs: DataKey {
                    algorithm: aead_algorithm(blobs_type)?,
                    bytes: blobs,
                },
                metadata: NameKey { bytes: metadata },
                hardware_backed: hardware && config.key_protection() != KeyProtection::Software,
            });
        }
    }
}

struct Loader<'a> {
    keyset: &'a mut Keyset,
    custodian: &'a dyn KeyCustodian,
    master_alias: &'a str,
    dirty: bool,
}

impl Loader<'_> {
    fn obtain(
        &mut self,
        purpose: KeyPurpose,
        wanted: KeyType,
    ) -> Result<(KeyType, Zeroizing<Vec<u8>>), StoreError> {
        let location = format!("{}_{}", self.master_alias, purpose.suffix());

        if let Some(stored) = self.keyset.keys.get(&location) {
            let wrapped = general_purpose::STANDARD
                .decode(&stored.wrapped)
                .map_err(|e| init_err(format!("keyset entry {location}: {e}")))?;
            let bytes = self
                .custodian
                .unwrap_key(self.master_alias, &wrapped, location.as_bytes())
                .map_err(|e| init_err(format!("keyset entry {location}: {e}")))?;
            if bytes.len() != stored.key_type.key_len() {
                return Err(init_err(format!(
                    "keyset entry {location}: expected {} key bytes, got {}",
                    stored.key_type.key_len(),
                    bytes.len()
                )));
            }
            if stored.key_type != wanted {
                warn!(
                    %location,
                    stored = ?stored.key_type,
                    requested = ?wanted,
                    "existing key type differs from configuration, keeping existing key"
                );
            }
            return Ok((stored.key_type, bytes));
        }

        let bytes = random_key(wanted.key_len());
        let wrapped = self
            .custodian
            .wrap_key(self.master_alias, &bytes, location.as_bytes())
            .map_err(|e| init_err(format!("wrapping {location}: {e}")))?;
        debug!(%location, "generated new key");
        self.keyset.keys.insert(
            location,
            StoredKey {
                key_type: wanted,
                wrapped: general_purpose::STANDARD.encode(wrapped),
            },
        );
        self.dirty = true;
        Ok((wanted, bytes))
    }
}

fn aead_algorithm(key_type: KeyType) -> Result<Algorithm, StoreError> {
    match key_type {
        KeyType::Aead(algorithm) => Ok(algorithm),
        KeyType::Siv => Err(init_err("data key recorded with a name-key type")),
    }
}

fn random_key(len: usize) -> Zeroizing<Vec<u8>> {
    let mut bytes = Zeroizing::new(vec![0u8; len]);
    OsRng.fill_bytes(&mut bytes);
    bytes
}

fn read_keyset(path: &Path) -> Result<Option<Keyset>, StoreError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(init_err(format!("reading keyset: {err}"))),
    };
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .map_err(|e| init_err(format!("reading keyset: {e}")))?;
    serde_json::from_slice(&buf)
        .map(Some)
        .map_err(|e| init_err(format!("parsing keyset: {e}")))
}

/// Returns `false` when `create_new` is set and the file already exists; nothing is
/// written then.
fn write_keyset(path: &Path, keyset: &Keyset, create_new: bool) -> Result<bool, StoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| init_err("invalid keyset path"))?;
    fs::create_dir_all(parent).map_err(|e| init_err(format!("keyset dir: {e}")))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| init_err(e.to_string()))?;
    let json = serde_json::to_vec_pretty(keyset).map_err(|e| init_err(e.to_string()))?;
    tmp.write_all(&json).map_err(|e| init_err(e.to_string()))?;
    tmp.flush().map_err(|e| init_err(e.to_string()))?;
    if !create_new {
        tmp.persist(path).map_err(|e| init_err(e.error.to_string()))?;
        return Ok(true);
    }
    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(init_err(e.error.to_string())),
    }
}

fn init_err(reason: impl Into<String>) -> StoreError {
    StoreError::Initialization {
        reason: reason.into(),
    }
}

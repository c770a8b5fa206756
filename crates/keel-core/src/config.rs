use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_MASTER_KEY_ALIAS: &str = "keel_master_key";

/// AEAD primitive used for preference values and blob contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    #[default]
    Aes256Gcm,
    Aes128Gcm,
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
    #[serde(rename = "xchacha20-poly1305")]
    XChaCha20Poly1305,
}

impl Algorithm {
    /// Length of the symmetric key in bytes.
    pub fn key_len(self) -> usize {
        match self {
            Algorithm::Aes128Gcm => 16,
            Algorithm::Aes256Gcm | Algorithm::ChaCha20Poly1305 | Algorithm::XChaCha20Poly1305 => 32,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::Aes256Gcm => "aes256-gcm",
            Algorithm::Aes128Gcm => "aes128-gcm",
            Algorithm::ChaCha20Poly1305 => "chacha20-poly1305",
            Algorithm::XChaCha20Poly1305 => "xchacha20-poly1305",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requirement placed on the key custodian.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyProtection {
    #[default]
    Software,
    HardwarePreferred,
    HardwareRequired,
}

/// Storage location semantics: readable before the first device unlock, or only after.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DurabilityMode {
    #[default]
    BeforeUnlock,
    AfterUnlock,
}

impl DurabilityMode {
    /// Directory under the engine root holding this mode's data.
    pub fn dir_name(self) -> &'static str {
        match self {
            DurabilityMode::BeforeUnlock => "device",
            DurabilityMode::AfterUnlock => "credential",
        }
    }
}

/// What a read does when a stored value cannot be decrypted or decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    #[default]
    ReturnEmpty,
    Raise,
    DeleteAndReturnEmpty,
}

/// Named starting points for a configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    #[default]
    Default,
    HighSecurity,
    Performance,
}

impl Preset {
    pub fn builder(self) -> StoreConfigBuilder {
        match self {
            Preset::Default => StoreConfigBuilder::default(),
            Preset::HighSecurity => StoreConfigBuilder::default()
                .key_protection(KeyProtection::HardwareRequired)
                .use_associated_data(true)
                .encrypt_keys(true)
                .encrypt_file_names(true)
                .secure_memory(true)
                .decryption_failure_policy(FailurePolicy::DeleteAndReturnEmpty),
            Preset::Performance => StoreConfigBuilder::default()
                .algorithm(Algorithm::Aes128Gcm)
                .use_associated_data(false)
                .encrypt_keys(false)
                .encrypt_file_names(false)
                .secure_memory(false),
        }
    }
}

/// Immutable, validated engine settings. Obtain one through [`StoreConfig::builder`]
/// or a [`Preset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    algorithm: Algorithm,
    key_protection: KeyProtection,
    durability_mode: DurabilityMode,
    encrypt_keys: bool,
    encrypt_file_names: bool,
    use_associated_data: bool,
    decryption_failure_policy: FailurePolicy,
    namespace: String,
    master_key_alias: String,
    secure_memory: bool,
}

impl StoreConfig {
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    pub fn high_security() -> Self {
        Preset::HighSecurity.into_config()
    }

    pub fn performance() -> Self {
        Preset::Performance.into_config()
    }

    /// Mutable copy of this configuration for incremental overrides.
    pub fn to_builder(&self) -> StoreConfigBuilder {
        StoreConfigBuilder {
            algorithm: self.algorithm,
            key_protection: self.key_protection,
            durability_mode: self.durability_mode,
            encrypt_keys: self.encrypt_keys,
            encrypt_file_names: self.encrypt_file_names,
            use_associated_data: self.use_associated_data,
            decryption_failure_policy: self.decryption_failure_policy,
            namespace: self.namespace.clone(),
            master_key_alias: self.master_key_alias.clone(),
            secure_memory: self.secure_memory,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn key_protection(&self) -> KeyProtection {
        self.key_protection
    }

    pub fn durability_mode(&self) -> DurabilityMode {
        self.durability_mode
    }

    pub fn encrypt_keys(&self) -> bool {
        self.encrypt_keys
    }

    pub fn encrypt_file_names(&self) -> bool {
        self.encrypt_file_names
    }

    pub fn use_associated_data(&self) -> bool {
        self.use_associated_data
    }

    pub fn decryption_failure_policy(&self) -> FailurePolicy {
        self.decryption_failure_policy
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn master_key_alias(&self) -> &str {
        &self.master_key_alias
    }

    pub fn secure_memory(&self) -> bool {
        self.secure_memory
    }

    /// Namespace-scoped alias of the master key held by the custodian.
    pub fn scoped_master_alias(&self) -> String {
        format!("{}_{}", self.master_key_alias, self.namespace)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Preset::Default.into_config()
    }
}

impl Preset {
    fn into_config(self) -> StoreConfig {
        let b = self.builder();
        // Preset values are constants that always validate.
        StoreConfig {
            algorithm: b.algorithm,
            key_protection: b.key_protection,
            durability_mode: b.durability_mode,
            encrypt_keys: b.encrypt_keys,
            encrypt_file_names: b.encrypt_file_names,
            use_associated_data: b.use_associated_data,
            decryption_failure_policy: b.decryption_failure_policy,
            namespace: b.namespace,
            master_key_alias: b.master_key_alias,
            secure_memory: b.secure_memory,
        }
    }
}

/// Builder for [`StoreConfig`]; `build` validates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfigBuilder {
    algorithm: Algorithm,
    key_protection: KeyProtection,
    durability_mode: DurabilityMode,
    encrypt_keys: bool,
    encrypt_file_names: bool,
    use_associated_data: bool,
    decryption_failure_policy: FailurePolicy,
    namespace: String,
    master_key_alias: String,
    secure_memory: bool,
}

impl Default for StoreConfigBuilder {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            key_protection: KeyProtection::default(),
            durability_mode: DurabilityMode::default(),
            encrypt_keys: false,
            encrypt_file_names: false,
            use_associated_data: true,
            decryption_failure_policy: FailurePolicy::default(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            master_key_alias: DEFAULT_MASTER_KEY_ALIAS.to_string(),
            secure_memory: false,
        }
    }
}

impl StoreConfigBuilder {
    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn key_protection(mut self, key_protection: KeyProtection) -> Self {
        self.key_protection = key_protection;
        self
    }

    pub fn durability_mode(mut self, durability_mode: DurabilityMode) -> Self {
        self.durability_mode = durability_mode;
        self
    }

    pub fn encrypt_keys(mut self, enabled: bool) -> Self {
        self.encrypt_keys = enabled;
        self
    }

    pub fn encrypt_file_names(mut self, enabled: bool) -> Self {
        self.encrypt_file_names = enabled;
        self
    }

    pub fn use_associated_data(mut self, enabled: bool) -> Self {
        self.use_associated_data = enabled;
        self
    }

    pub fn decryption_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.decryption_failure_policy = policy;
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn master_key_alias(mut self, alias: impl Into<String>) -> Self {
        self.master_key_alias = alias.into();
        self
    }

    pub fn secure_memory(mut self, enabled: bool) -> Self {
        self.secure_memory = enabled;
        self
    }

    pub fn build(self) -> Result<StoreConfig, StoreError> {
        validate_namespace(&self.namespace)?;
        if self.master_key_alias.trim().is_empty() {
            return Err(StoreError::Configuration {
                reason: "master key alias must not be blank".to_string(),
            });
        }

        Ok(StoreConfig {
            algorithm: self.algorithm,
            key_protection: self.key_protection,
            durability_mode: self.durability_mode,
            encrypt_keys: self.encrypt_keys,
            encrypt_file_names: self.encrypt_file_names,
            use_associated_data: self.use_associated_data,
            decryption_failure_policy: self.decryption_failure_policy,
            namespace: self.namespace,
            master_key_alias: self.master_key_alias,
            secure_memory: self.secure_memory,
        })
    }
}

fn validate_namespace(namespace: &str) -> Result<(), StoreError> {
    if namespace.is_empty() {
        return Err(StoreError::Configuration {
            reason: "namespace must not be empty".to_string(),
        });
    }
    if let Some(bad) = namespace
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(StoreError::Configuration {
            reason: format!("namespace {namespace:?} contains invalid character {bad:?}"),
        });
    }
    Ok(())
}

use std::{
    fs,
    path::{Path, PathBuf},
};

use color_eyre::Result;
use dirs::config_dir;
use keel_core::{
    Algorithm, DurabilityMode, FailurePolicy, KeyProtection, Preset, StoreConfig,
    StoreConfigBuilder,
};
use serde::{Deserialize, Serialize};

/// User-level configuration loaded from `~/.config/keel/config.toml` (platform-specific).
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Override for the storage root.
    pub data_dir: Option<PathBuf>,
    /// Starting point for the store configuration.
    #[serde(default)]
    pub preset: Preset,
    /// Individual overrides applied on top of the preset.
    #[serde(default)]
    pub store: StoreOverrides,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct StoreOverrides {
    pub algorithm: Option<Algorithm>,
    pub key_protection: Option<KeyProtection>,
    pub durability_mode: Option<DurabilityMode>,
    pub encrypt_keys: Option<bool>,
    pub encrypt_file_names: Option<bool>,
    pub use_associated_data: Option<bool>,
    pub decryption_failure_policy: Option<FailurePolicy>,
    pub namespace: Option<String>,
    pub master_key_alias: Option<String>,
    pub secure_memory: Option<bool>,
}

impl StoreOverrides {
    fn apply(&self, mut builder: StoreConfigBuilder) -> StoreConfigBuilder {
        if let Some(v) = self.algorithm {
            builder = builder.algorithm(v);
        }
        if let Some(v) = self.key_protection {
            builder = builder.key_protection(v);
        }
        if let Some(v) = self.durability_mode {
            builder = builder.durability_mode(v);
        }
        if let Some(v) = self.encrypt_keys {
            builder = builder.encrypt_keys(v);
        }
        if let Some(v) = self.encrypt_file_names {
            builder = builder.encrypt_file_names(v);
        }
        if let Some(v) = self.use_associated_data {
            builder = builder.use_associated_data(v);
        }
        if let Some(v) = self.decryption_failure_policy {
            builder = builder.decryption_failure_policy(v);
        }
        if let Some(v) = &self.namespace {
            builder = builder.namespace(v.clone());
        }
        if let Some(v) = &self.master_key_alias {
            builder = builder.master_key_alias(v.clone());
        }
        if let Some(v) = self.secure_memory {
            builder = builder.secure_memory(v);
        }
        builder
    }
}

impl Config {
    /// Validated store configuration: preset, then file overrides, then the CLI namespace.
    pub fn store_config(&self, namespace: Option<&str>) -> Result<StoreConfig> {
        let mut builder = self.store.apply(self.preset.builder());
        if let Some(ns) = namespace {
            builder = builder.namespace(ns);
        }
        Ok(builder.build()?)
    }
}

/// Load config from the default path; if missing, return defaults.
pub fn load() -> Result<Config> {
    let path = default_path()?;
    load_from_path(path)
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("keel").join("config.toml"))
}

/// Write the given config to disk unless a file already exists, to avoid clobbering
/// user edits. Returns the path either way.
pub fn write_default_if_missing(config: &Config) -> Result<PathBuf> {
    let path = default_path()?;
    write_to_path_if_missing(config, &path)
}

fn write_to_path_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_default_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = load_from_path(dir.path().join("config.toml")).expect("load");
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.store_config(None).unwrap(), StoreConfig::default());
    }

    #[test]
    fn parses_preset_and_overrides() {
        let contents = r#"
            data_dir = "/tmp/keel-data"
            preset = "high-security"
            [store]
            key_protection = "hardware-preferred"
            algorithm = "xchacha20-poly1305"
            namespace = "work"
        "#;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, contents).expect("write temp config");

        let cfg = load_from_path(&path).expect("load");
        assert_eq!(cfg.data_dir, Some(PathBuf::from("/tmp/keel-data")));
        assert_eq!(cfg.preset, Preset::HighSecurity);

        let store = cfg.store_config(None).expect("valid");
        assert_eq!(store.key_protection(), KeyProtection::HardwarePreferred);
        assert_eq!(store.algorithm(), Algorithm::XChaCha20Poly1305);
        assert_eq!(store.namespace(), "work");
        assert!(store.encrypt_file_names());

        let cli_ns = cfg.store_config(Some("personal")).expect("valid");
        assert_eq!(cli_ns.namespace(), "personal");
    }

    #[test]
    fn invalid_namespace_is_reported() {
        let cfg = Config::default();
        assert!(cfg.store_config(Some("bad name")).is_err());
    }

    #[test]
    fn write_default_creates_file_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        let cfg = Config {
            data_dir: Some(PathBuf::from("/tmp/keel-data")),
            preset: Preset::Performance,
            store: StoreOverrides::default(),
        };

        write_to_path_if_missing(&cfg, &path).expect("write should succeed");
        let second = write_to_path_if_missing(&cfg, &path).expect("second write ok");
        assert_eq!(second, path);
        let loaded = load_from_path(&path).expect("parse");
        assert_eq!(loaded, cfg);
    }
}

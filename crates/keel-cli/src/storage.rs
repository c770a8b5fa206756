use std::{path::PathBuf, sync::Arc};

use crate::config::Config;
use color_eyre::Result;
use dirs::data_dir;
use keel_storage::{AsyncVault, KeyringCustodian, Vault};
use tracing::debug;

/// Keychain service name holding the per-namespace master keys.
const KEYRING_SERVICE: &str = "keel";

/// Resolve the default data directory for Keel.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("keel"))
}

/// Open the configured vault with master keys held in the OS keychain.
pub async fn vault_from_config(config: &Config, namespace: Option<&str>) -> Result<AsyncVault> {
    let store_config = config.store_config(namespace)?;
    let root = match &config.data_dir {
        Some(root) => root.clone(),
        None => default_data_dir()?,
    };
    debug!(?root, namespace = store_config.namespace(), "opening vault");
    let builder = Vault::builder(
        store_config,
        root,
        Arc::new(KeyringCustodian::new(KEYRING_SERVICE)),
    );
    Ok(AsyncVault::open(builder).await?)
}

/// Helper for tests to open a vault rooted at a temp dir with in-memory master keys.
#[cfg(test)]
pub async fn test_store(root: impl Into<PathBuf>) -> AsyncVault {
    use keel_core::StoreConfig;
    use keel_storage::InMemoryCustodian;

    let builder = Vault::builder(
        StoreConfig::default(),
        root,
        Arc::new(InMemoryCustodian::new()),
    );
    AsyncVault::open(builder).await.expect("open test vault")
}

//! Encrypted preference and blob storage built on a small key hierarchy.
//! Values use AES-GCM or ChaCha20-Poly1305 envelopes bound to their logical names; names can
//! be encrypted with AES-SIV. Master keys live with a `KeyCustodian` (OS keyring in
//! production, memory in tests).

mod aead;
pub mod async_vault;
mod blob_store;
mod failure;
pub mod file_backend;
pub mod key_provider;
mod keyset;
mod locks;
mod memory;
mod names;
mod preferences;
pub mod vault;

pub use async_vault::AsyncVault;
pub use file_backend::JsonFileBackend;
pub use key_provider::{
    InMemoryCustodian, KeyCustodian, KeyError, KeyringCustodian, KeyringStore, SecretStore,
};
pub use vault::{Vault, VaultBuilder};

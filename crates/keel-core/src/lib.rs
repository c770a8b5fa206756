//! Core abstractions for Keel: configuration, error taxonomy, and the storage contracts
//! shared by the encrypted preference and blob stores.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod codec;
pub mod config;
pub mod error;
pub mod storage;

pub use config::{
    Algorithm, DurabilityMode, FailurePolicy, KeyProtection, Preset, StoreConfig,
    StoreConfigBuilder,
};
pub use error::{ErrorKind, StoreError};

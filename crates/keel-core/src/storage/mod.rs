mod backend;
mod secure_store;

pub use backend::{InMemoryBackend, KeyValueBackend};
pub use secure_store::{SecureStore, StoreInfo};

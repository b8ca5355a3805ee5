//! Pluggable key/value storage for certificate and key material.

pub mod consul;
pub mod error;
pub mod memory;
pub mod storage;
pub mod storage_config;

use std::sync::Arc;

pub use consul::ConsulStorage;
pub use error::{Result, StorageError};
pub use memory::MemoryStorage;
pub use storage::Storage;
pub use storage_config::{ConsulStorageConfig, StorageBackendConfig};

/// Build the configured storage backend behind a shared trait object.
pub fn build_storage(config: &StorageBackendConfig) -> Arc<dyn Storage> {
    match config {
        StorageBackendConfig::Consul(consul_config) => Arc::new(ConsulStorage::new(
            &consul_config.addr,
            Some(consul_config.cache_ttl_secs),
        )),
        StorageBackendConfig::Memory => Arc::new(MemoryStorage::new()),
    }
}

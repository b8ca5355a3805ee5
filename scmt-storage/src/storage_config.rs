//! Storage backend configuration types.

use serde::{Deserialize, Serialize};

/// Configuration for the storage backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageBackendConfig {
    /// Consul KV store (the reference production backend).
    Consul(ConsulStorageConfig),
    /// In-process storage. Not durable across restarts; for tests and
    /// single-node setups.
    Memory,
}

impl Default for StorageBackendConfig {
    fn default() -> Self {
        StorageBackendConfig::Memory
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsulStorageConfig {
    /// `host:port` of the Consul agent, e.g. `127.0.0.1:8500`.
    pub addr: String,
    /// How long a read value is cached before the next `read` re-fetches it.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    10
}

impl Default for ConsulStorageConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8500".to_string(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl StorageBackendConfig {
    pub fn backend_type(&self) -> &'static str {
        match self {
            StorageBackendConfig::Consul(_) => "consul",
            StorageBackendConfig::Memory => "memory",
        }
    }

    pub fn consul(addr: impl Into<String>) -> Self {
        StorageBackendConfig::Consul(ConsulStorageConfig {
            addr: addr.into(),
            cache_ttl_secs: default_cache_ttl_secs(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_memory() {
        assert_eq!(StorageBackendConfig::default().backend_type(), "memory");
    }

    #[test]
    fn consul_config_serializes_with_tag() {
        let config = StorageBackendConfig::consul("consul.local:8500");
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"type\":\"consul\""));
        assert!(json.contains("consul.local:8500"));
    }
}

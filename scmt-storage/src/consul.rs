//! Storage backend speaking the Consul KV HTTP API: `GET /v1/kv/<key>`
//! (base64 `Value` in a JSON envelope), `GET /v1/kv/<path>?keys` for
//! listing, and `DELETE /v1/kv/<key>?recurse=true` for deletion.

use crate::error::{Result, StorageError};
use crate::storage::Storage;
use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const DEFAULT_CACHE_TTL_SECS: u64 = 10;

struct CacheEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

pub struct ConsulStorage {
    client: reqwest::Client,
    base_url: String,
    cache_ttl: Duration,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

#[derive(Deserialize)]
struct KvEntry {
    #[serde(rename = "Value")]
    value: Option<String>,
}

impl ConsulStorage {
    pub fn new(addr: &str, cache_ttl_secs: Option<u64>) -> Self {
        let addr = addr.trim_start_matches("http://").trim_end_matches('/');
        Self {
            client: reqwest::Client::new(),
            base_url: format!("http://{addr}"),
            cache_ttl: Duration::from_secs(cache_ttl_secs.unwrap_or(DEFAULT_CACHE_TTL_SECS)),
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn normalize(key: &str) -> &str {
        key.trim_start_matches('/')
    }

    async fn cache_get(&self, key: &str) -> Option<Vec<u8>> {
        let cache = self.cache.read().await;
        cache
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }

    async fn cache_put(&self, key: &str, value: Vec<u8>) {
        let mut cache = self.cache.write().await;
        cache.retain(|_, entry| entry.expires_at > Instant::now());
        cache.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + self.cache_ttl,
            },
        );
    }

    async fn cache_invalidate(&self, key: &str) {
        self.cache.write().await.remove(key);
    }
}

#[async_trait]
impl Storage for ConsulStorage {
    async fn exists(&self, path: &str) -> Result<bool> {
        if self.read(path).await.is_ok() {
            return Ok(true);
        }
        match self.list(path).await {
            Ok(children) => Ok(!children.is_empty()),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let key = Self::normalize(key);

        if let Some(value) = self.cache_get(key).await {
            return Ok(value);
        }

        let url = format!("{}/v1/kv/{key}", self.base_url);
        tracing::debug!("GET {url}");
        let text = self.client.get(&url).send().await?.text().await?;

        if text.is_empty() {
            return Err(StorageError::NotFound(key.to_string()));
        }

        let mut decoded: Vec<KvEntry> = serde_json::from_str(&text)?;
        let entry = decoded
            .pop()
            .ok_or_else(|| StorageError::Decode(format!("empty kv response for {key}")))?;
        let b64 = entry
            .value
            .ok_or_else(|| StorageError::Decode(format!("no Value field for {key}")))?;
        let value = base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| StorageError::Decode(e.to_string()))?;

        self.cache_put(key, value.clone()).await;
        Ok(value)
    }

    async fn write(&self, key: &str, value: &[u8]) -> Result<()> {
        let key = Self::normalize(key);
        let url = format!("{}/v1/kv/{key}", self.base_url);
        tracing::debug!("PUT {url}");
        self.client.put(&url).body(value.to_vec()).send().await?;
        self.cache_put(key, value.to_vec()).await;
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<String>> {
        let path = Self::normalize(path);
        let url = format!("{}/v1/kv/{path}?keys", self.base_url);
        tracing::debug!("GET {url}");
        let text = self.client.get(&url).send().await?.text().await?;

        if text.is_empty() {
            return Err(StorageError::NotFound(path.to_string()));
        }

        let keys: Vec<String> = serde_json::from_str(&text)?;
        let prefix = if path.ends_with('/') || path.is_empty() {
            path.to_string()
        } else {
            format!("{path}/")
        };

        let mut children = Vec::new();
        for key in keys {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            let segment = rest.split('/').next().unwrap_or("");
            if !segment.is_empty() && !children.contains(&segment.to_string()) {
                children.push(segment.to_string());
            }
        }

        Ok(children)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = Self::normalize(key);
        let url = format!("{}/v1/kv/{key}?recurse=true", self.base_url);
        tracing::debug!("DELETE {url}");
        self.client.delete(&url).send().await?;
        self.cache_invalidate(key).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_leading_slash() {
        assert_eq!(ConsulStorage::normalize("/a/b"), "a/b");
        assert_eq!(ConsulStorage::normalize("a/b"), "a/b");
    }
}

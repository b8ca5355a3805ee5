//! In-process storage backend. Used by the test suite and by single-node
//! deployments that don't need a shared KV store.

use crate::error::{Result, StorageError};
use crate::storage::Storage;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryStorage {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(key: &str) -> String {
        key.trim_start_matches('/').to_string()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn exists(&self, path: &str) -> Result<bool> {
        let path = Self::normalize(path);
        let data = self.data.read().await;
        if data.contains_key(&path) {
            return Ok(true);
        }
        let prefix = format!("{path}/");
        Ok(data.keys().any(|k| k.starts_with(&prefix)))
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let key = Self::normalize(key);
        self.data
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or(StorageError::NotFound(key))
    }

    async fn write(&self, key: &str, value: &[u8]) -> Result<()> {
        let key = Self::normalize(key);
        self.data.write().await.insert(key, value.to_vec());
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<String>> {
        let path = Self::normalize(path);
        let prefix = if path.is_empty() || path.ends_with('/') {
            path.clone()
        } else {
            format!("{path}/")
        };

        let data = self.data.read().await;
        let mut children = Vec::new();
        for key in data.keys() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            let segment = rest.split('/').next().unwrap_or("");
            if !segment.is_empty() && !children.contains(&segment.to_string()) {
                children.push(segment.to_string());
            }
        }

        if children.is_empty() && !data.contains_key(&path) {
            return Err(StorageError::NotFound(path));
        }

        Ok(children)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = Self::normalize(key);
        let prefix = format!("{key}/");
        let mut data = self.data.write().await;
        data.remove(&key);
        data.retain(|k, _| !k.starts_with(&prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let storage = MemoryStorage::new();
        storage.write("ca/example.com/cert", b"abc").await.unwrap();
        assert_eq!(storage.read("ca/example.com/cert").await.unwrap(), b"abc");
        assert!(storage.exists("ca/example.com").await.unwrap());
    }

    #[tokio::test]
    async fn list_returns_immediate_children() {
        let storage = MemoryStorage::new();
        storage.write("ca/a.com/cert", b"1").await.unwrap();
        storage.write("ca/b.com/cert", b"2").await.unwrap();

        let mut children = storage.list("ca").await.unwrap();
        children.sort();
        assert_eq!(children, vec!["a.com".to_string(), "b.com".to_string()]);
    }

    #[tokio::test]
    async fn delete_removes_subtree() {
        let storage = MemoryStorage::new();
        storage.write("ca/a.com/cert", b"1").await.unwrap();
        storage.write("ca/a.com/key", b"2").await.unwrap();
        storage.delete("ca/a.com").await.unwrap();

        assert!(storage.read("ca/a.com/cert").await.is_err());
        assert!(storage.read("ca/a.com/key").await.is_err());
    }

    #[tokio::test]
    async fn read_missing_key_is_not_found() {
        let storage = MemoryStorage::new();
        match storage.read("missing").await {
            Err(StorageError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }
}

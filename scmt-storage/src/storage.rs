//! The `Storage` trait that every key/value backend implements.
//!
//! All keys are slash-delimited paths, mirroring a filesystem or a Consul
//! KV tree. `list` returns the immediate child segments under a prefix,
//! not a recursive walk.

use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Whether `path` exists, either as a readable key or as a directory
    /// with at least one child key underneath it.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Read the raw bytes stored at `key`.
    ///
    /// Returns [`crate::error::StorageError::NotFound`] if the key has
    /// never been written.
    async fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Write `value` to `key`, overwriting any previous value.
    async fn write(&self, key: &str, value: &[u8]) -> Result<()>;

    /// List the immediate child key segments under `path`.
    async fn list(&self, path: &str) -> Result<Vec<String>>;

    /// Delete `key` and everything beneath it.
    async fn delete(&self, key: &str) -> Result<()>;
}

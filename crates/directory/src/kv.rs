//! The master key/value store collaborator (§4.7, §5): an external
//! embedded database in the original system, specified here only by
//! the interface the directory service needs from it.

use std::collections::HashMap;

use async_trait::async_trait;
use mofka_core::error::{Error, Result};
use tokio::sync::RwLock;

/// New-only keys plus append-only collections, as the directory service uses them.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Puts all `entries` atomically, failing the whole batch if any key
    /// already exists. Used by `create_topic` to install the three
    /// capability keys together.
    async fn put_new_batch(&self, entries: Vec<(String, Vec<u8>)>) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Probes whether `key` exists without fetching its value.
    async fn length(&self, key: &str) -> Result<Option<u64>>;

    async fn append_to_collection(&self, key: &str, value: Vec<u8>) -> Result<()>;

    async fn list_collection(&self, key: &str) -> Result<Vec<Vec<u8>>>;
}

/// In-memory `KeyValueStore`, the default/test implementation of the
/// directory database.
#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    collections: RwLock<HashMap<String, Vec<Vec<u8>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn put_new_batch(&self, entries: Vec<(String, Vec<u8>)>) -> Result<()> {
        let mut store = self.entries.write().await;
        for (key, _) in &entries {
            if store.contains_key(key) {
                return Err(Error::store(format!("key '{key}' already exists")));
            }
        }
        for (key, value) in entries {
            store.insert(key, value);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn length(&self, key: &str) -> Result<Option<u64>> {
        Ok(self.entries.read().await.get(key).map(|v| v.len() as u64))
    }

    async fn append_to_collection(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.collections
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .push(value);
        Ok(())
    }

    async fn list_collection(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        Ok(self.collections.read().await.get(key).cloned().unwrap_or_default())
    }
}

//! Conversation state storage handed to in-process skills

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::protocol::error::SkillResult;

/// Key/value store for skill state
#[async_trait]
pub trait Storage: Send + Sync {
    async fn read(&self, key: &str) -> SkillResult<Option<Value>>;

    async fn write(&self, key: &str, value: Value) -> SkillResult<()>;

    /// Remove `key`; deleting a missing key is not an error
    async fn delete(&self, key: &str) -> SkillResult<()>;
}

/// Process-local storage
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read(&self, key: &str) -> SkillResult<Option<Value>> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn write(&self, key: &str, value: Value) -> SkillResult<()> {
        self.items.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> SkillResult<()> {
        self.items.write().await.remove(key);
        Ok(())
    }
}

/// View of another storage confined to one logical partition
///
/// Every key is prefixed with the partition name, so two skills sharing the same
/// backing store never see each other's state.
#[derive(Clone)]
pub struct PartitionedStorage {
    inner: Arc<dyn Storage>,
    partition: String,
}

impl PartitionedStorage {
    pub fn new(inner: Arc<dyn Storage>, partition: impl Into<String>) -> Self {
        Self {
            inner,
            partition: partition.into(),
        }
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    fn key(&self, key: &str) -> String {
        format!("{}/{}", self.partition, key)
    }
}

#[async_trait]
impl Storage for PartitionedStorage {
    async fn read(&self, key: &str) -> SkillResult<Option<Value>> {
        self.inner.read(&self.key(key)).await
    }

    async fn write(&self, key: &str, value: Value) -> SkillResult<()> {
        self.inner.write(&self.key(key), value).await
    }

    async fn delete(&self, key: &str) -> SkillResult<()> {
        self.inner.delete(&self.key(key)).await
    }
}

impl std::fmt::Debug for PartitionedStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionedStorage")
            .field("partition", &self.partition)
            .finish()
    }
}

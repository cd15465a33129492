use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;

use crate::model::HighlightRecord;

pub const LATEST_HIGHLIGHT_KEY: &str = "latestHighlight";

/// Durable key-value state shared by every context. Each call replaces or
/// removes a whole value, so readers never see a partial write.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<JsonValue>>;
    async fn set(&self, key: &str, value: JsonValue) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryStateStore {
    values: Mutex<HashMap<String, JsonValue>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<JsonValue>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: JsonValue) -> Result<()> {
        self.values.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.lock().await.remove(key);
        Ok(())
    }
}

/// Single-slot store for the most recent qualifying selection.
#[derive(Clone)]
pub struct HighlightCache {
    store: Arc<dyn StateStore>,
}

impl HighlightCache {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Last write wins; the previous record is replaced, never merged.
    pub async fn set(&self, record: &HighlightRecord) -> Result<()> {
        let value = serde_json::to_value(record)?;
        self.store.set(LATEST_HIGHLIGHT_KEY, value).await
    }

    pub async fn get(&self) -> Result<Option<HighlightRecord>> {
        match self.store.get(LATEST_HIGHLIGHT_KEY).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Removing an absent record is not an error.
    pub async fn clear(&self) -> Result<()> {
        self.store.remove(LATEST_HIGHLIGHT_KEY).await
    }
}

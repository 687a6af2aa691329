use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::Store;
use crate::error::StoreError;
use crate::key::Token;

/// Non-durable store backed by a map. Useful on its own behind a
/// `BoundedCache` and as a test double.
pub struct MemoryStore<V> {
    entries: RwLock<HashMap<Token, V>>,
}

impl<V> MemoryStore<V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn contains(&self, token: &Token) -> bool {
        self.entries.read().await.contains_key(token)
    }
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> Store<V> for MemoryStore<V>
where
    V: Clone + Send + Sync,
{
    async fn load(&self, token: &Token) -> Result<Option<V>, StoreError> {
        Ok(self.entries.read().await.get(token).cloned())
    }

    async fn save(&self, token: &Token, value: &V) -> Result<(), StoreError> {
        self.entries
            .write()
            .await
            .insert(token.clone(), value.clone());
        Ok(())
    }

    async fn remove(&self, token: &Token) -> Result<(), StoreError> {
        self.entries.write().await.remove(token);
        Ok(())
    }
}

//! Shared test doubles

use std::sync::Mutex;

use async_trait::async_trait;
use basement::{Store, StoreError, Token};

/// One call observed by [`RecordingStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Load(String),
    Save(String),
    Remove(String),
}

/// Wraps a store and records every call that reaches it
pub struct RecordingStore<S> {
    inner: S,
    calls: Mutex<Vec<Call>>,
}

impl<S> RecordingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn removes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Remove(token) => Some(token),
                _ => None,
            })
            .collect()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl<V, S> Store<V> for RecordingStore<S>
where
    V: Send + Sync,
    S: Store<V>,
{
    async fn load(&self, token: &Token) -> Result<Option<V>, StoreError> {
        self.record(Call::Load(token.to_string()));
        self.inner.load(token).await
    }

    async fn save(&self, token: &Token, value: &V) -> Result<(), StoreError> {
        self.record(Call::Save(token.to_string()));
        self.inner.save(token, value).await
    }

    async fn remove(&self, token: &Token) -> Result<(), StoreError> {
        self.record(Call::Remove(token.to_string()));
        self.inner.remove(token).await
    }
}

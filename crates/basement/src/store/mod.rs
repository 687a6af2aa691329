//! Persistent store adapters
//!
//! A store associates tokens with values durably (or not, for the in-memory
//! variant). `load` returning `None` means "not cached yet" and is not an
//! error; `remove` must tolerate tokens that were never saved.

mod fs;
mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::key::Token;

#[async_trait]
pub trait Store<V>: Send + Sync {
    /// Return the stored value, or `None` on a miss.
    async fn load(&self, token: &Token) -> Result<Option<V>, StoreError>;

    /// Associate `value` with `token`, overwriting any previous value.
    async fn save(&self, token: &Token, value: &V) -> Result<(), StoreError>;

    /// Delete the association. Removing a missing token succeeds.
    async fn remove(&self, token: &Token) -> Result<(), StoreError>;
}

#[async_trait]
impl<V, T> Store<V> for Arc<T>
where
    V: Send + Sync,
    T: Store<V> + ?Sized,
{
    async fn load(&self, token: &Token) -> Result<Option<V>, StoreError> {
        (**self).load(token).await
    }

    async fn save(&self, token: &Token, value: &V) -> Result<(), StoreError> {
        (**self).save(token, value).await
    }

    async fn remove(&self, token: &Token) -> Result<(), StoreError> {
        (**self).remove(token).await
    }
}

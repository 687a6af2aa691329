//! Cache-aside resolution
//!
//! `Basement` derives the token for a source, asks its store (normally a
//! [`BoundedCache`](crate::BoundedCache)) for it, and on a miss runs the
//! caller's fetch and saves the result before handing it back.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{BasementError, Result};
use crate::key::{KeyDeriver, StructuralHash, Token};
use crate::store::Store;

type Pending<V> = Shared<BoxFuture<'static, Result<V>>>;

/// Weak handles only: a fetch stays registered while some caller awaits it
type InFlight<V> = Arc<Mutex<HashMap<Token, WeakShared<BoxFuture<'static, Result<V>>>>>>;

/// Immutable pipeline configuration: how to key a source and where results live
pub struct Options<S: ?Sized, V> {
    key: Arc<dyn KeyDeriver<S>>,
    store: Arc<dyn Store<V>>,
    single_flight: bool,
}

impl<S, V> Options<S, V>
where
    S: Serialize + ?Sized + 'static,
    V: Send + Sync + 'static,
{
    /// Options keyed by [`StructuralHash`]
    pub fn new(store: impl Store<V> + 'static) -> Self {
        Self::with_deriver(store, StructuralHash)
    }
}

impl<S, V> Options<S, V>
where
    S: ?Sized + 'static,
    V: Send + Sync + 'static,
{
    /// Options with a custom key deriver
    pub fn with_deriver(store: impl Store<V> + 'static, key: impl KeyDeriver<S> + 'static) -> Self {
        Self {
            key: Arc::new(key),
            store: Arc::new(store),
            single_flight: true,
        }
    }

    /// Share one fetch between concurrent misses on the same token (default on).
    /// Disabling it lets every miss run its own fetch.
    pub fn single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }
}

impl<S: ?Sized, V> Clone for Options<S, V> {
    fn clone(&self) -> Self {
        Self {
            key: Arc::clone(&self.key),
            store: Arc::clone(&self.store),
            single_flight: self.single_flight,
        }
    }
}

/// Fetch-and-cache orchestrator
pub struct Basement<S, V> {
    options: Options<S, V>,
    in_flight: InFlight<V>,
}

impl<S, V> Basement<S, V>
where
    S: Serialize + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(options: Options<S, V>) -> Self {
        Self {
            options,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store<V>> {
        &self.options.store
    }

    /// Token the configured deriver assigns to `source`
    pub fn token(&self, source: &S) -> Result<Token> {
        self.options.key.derive(source)
    }

    /// Reject sources that are neither a string nor a structured object.
    /// Performs no I/O.
    pub fn validate(&self, source: &S) -> Result<()> {
        let value = serde_json::to_value(source)
            .map_err(|e| BasementError::Validation(format!("Unserializable source: {e}")))?;

        let kind = match value {
            Value::String(_) | Value::Object(_) => return Ok(()),
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Array(_) => "array",
        };
        Err(BasementError::Validation(format!(
            "Expected String|Object source, encountered {kind}."
        )))
    }

    /// Resolve an optional source. `None` is a legal input meaning there is
    /// nothing to resolve and returns `Ok(None)` without any I/O.
    pub async fn resolve<F, Fut, E>(&self, source: Option<&S>, fetch: F) -> Result<Option<V>>
    where
        F: FnOnce(S) -> Fut,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + Send + 'static,
    {
        let Some(source) = source else {
            return Ok(None);
        };
        self.validate(source)?;
        self.get(source, fetch).await.map(Some)
    }

    /// Derive the token, try the store, and on a miss fetch and save.
    ///
    /// Nothing is saved when the fetch fails.
    pub async fn get<F, Fut, E>(&self, source: &S, fetch: F) -> Result<V>
    where
        F: FnOnce(S) -> Fut,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + Send + 'static,
    {
        let token = self.options.key.derive(source)?;

        if let Some(value) = self.options.store.load(&token).await? {
            debug!(token = %token, "Cache hit");
            return Ok(value);
        }

        debug!(token = %token, "Cache miss, fetching");

        if !self.options.single_flight {
            let store = Arc::clone(&self.options.store);
            return fetch_and_save(store, token, fetch(source.clone())).await;
        }

        let waiter = {
            let mut in_flight = lock(&self.in_flight);
            let pending = match in_flight.get(&token).and_then(WeakShared::upgrade) {
                Some(pending) => {
                    debug!(token = %token, "Joining in-flight fetch");
                    pending
                }
                None => {
                    let store = Arc::clone(&self.options.store);
                    let registry = Arc::clone(&self.in_flight);
                    let key = token.clone();
                    let pending = fetch(source.clone());

                    let task = async move {
                        let result = fetch_and_save(store, key.clone(), pending).await;
                        lock(&registry).remove(&key);
                        result
                    }
                    .boxed()
                    .shared();

                    if let Some(weak) = task.downgrade() {
                        in_flight.insert(token.clone(), weak);
                    }
                    task
                }
            };

            Waiter {
                pending: Some(pending),
                registry: Arc::clone(&self.in_flight),
                token,
            }
        };

        waiter.await
    }

    /// Number of fetches currently shared between callers
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }
}

fn lock<V>(
    in_flight: &InFlight<V>,
) -> MutexGuard<'_, HashMap<Token, WeakShared<BoxFuture<'static, Result<V>>>>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One caller's handle on a shared fetch. When the last handle is dropped
/// before the fetch settles, the fetch is cancelled and unregistered.
struct Waiter<V> {
    // Only cleared by `Drop`
    pending: Option<Pending<V>>,
    registry: InFlight<V>,
    token: Token,
}

impl<V: Clone> Future for Waiter<V> {
    type Output = Result<V>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.pending.as_mut() {
            Some(pending) => pending.poll_unpin(cx),
            None => Poll::Pending,
        }
    }
}

impl<V> Drop for Waiter<V> {
    fn drop(&mut self) {
        // Release this handle before checking whether any are left
        drop(self.pending.take());

        let mut in_flight = lock(&self.registry);
        let abandoned = in_flight
            .get(&self.token)
            .is_some_and(|weak| weak.upgrade().is_none());
        if abandoned {
            in_flight.remove(&self.token);
            debug!(token = %self.token, "Dropped abandoned fetch");
        }
    }
}

async fn fetch_and_save<V, Fut, E>(store: Arc<dyn Store<V>>, token: Token, pending: Fut) -> Result<V>
where
    V: Send + Sync,
    Fut: Future<Output = std::result::Result<V, E>>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let value = pending.await.map_err(BasementError::fetch)?;
    store.save(&token, &value).await?;
    debug!(token = %token, "Fetched and saved");
    Ok(value)
}

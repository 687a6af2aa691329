//! Published three-state view of a resolution
//!
//! A [`Session`] is one caller context (a widget, a request handler, ...)
//! that repeatedly resolves sources and publishes `Loading`, `Ready` or
//! `Error` on a `watch` channel. Each invocation takes a sequence number;
//! only the newest invocation may publish, so a slow fetch from an
//! abandoned invocation can never overwrite a newer state.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::BasementError;
use crate::pipeline::Basement;

#[derive(Debug, Clone)]
pub enum ResultState<V> {
    Loading,
    /// `None` when there was no source to resolve
    Ready(Option<V>),
    Error(BasementError),
}

impl<V> ResultState<V> {
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    pub fn result(&self) -> Option<&V> {
        match self {
            Self::Ready(value) => value.as_ref(),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&BasementError> {
        match self {
            Self::Error(err) => Some(err),
            _ => None,
        }
    }

    /// `(is_loading, result, error)` as consumed by rendering layers
    pub fn as_tuple(&self) -> (bool, Option<&V>, Option<&BasementError>) {
        (self.is_loading(), self.result(), self.error())
    }
}

impl<V> From<crate::Result<Option<V>>> for ResultState<V> {
    fn from(result: crate::Result<Option<V>>) -> Self {
        match result {
            Ok(value) => Self::Ready(value),
            Err(err) => Self::Error(err),
        }
    }
}

/// One caller context publishing the state of its latest resolution
pub struct Session<S, V> {
    basement: Arc<Basement<S, V>>,
    sequence: AtomicU64,
    current: Mutex<Option<Option<S>>>,
    state: watch::Sender<ResultState<V>>,
}

impl<S, V> Session<S, V>
where
    S: Serialize + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Start in `Loading`, before any source has been supplied
    pub fn new(basement: Arc<Basement<S, V>>) -> Self {
        let (state, _) = watch::channel(ResultState::Loading);
        Self {
            basement,
            sequence: AtomicU64::new(0),
            current: Mutex::new(None),
            state,
        }
    }

    /// Observe every published transition
    pub fn subscribe(&self) -> watch::Receiver<ResultState<V>> {
        self.state.subscribe()
    }

    /// Most recently published state
    pub fn state(&self) -> ResultState<V> {
        self.state.borrow().clone()
    }

    /// Start a new invocation, superseding any still in flight.
    ///
    /// Returns the state this invocation settled on. It is published only if
    /// no newer invocation started in the meantime.
    pub async fn resolve<F, Fut, E>(&self, source: Option<S>, fetch: F) -> ResultState<V>
    where
        F: FnOnce(S) -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + Send + 'static,
    {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(source.clone());

        let Some(source) = source else {
            let ready = ResultState::Ready(None);
            self.publish(sequence, ready.clone());
            return ready;
        };

        if let Err(err) = self.basement.validate(&source) {
            warn!(error = %err, "Rejected source");
            let failed = ResultState::Error(err);
            self.publish(sequence, failed.clone());
            return failed;
        }

        self.publish(sequence, ResultState::Loading);

        let settled = match self.basement.get(&source, fetch).await {
            Ok(value) => ResultState::Ready(Some(value)),
            Err(err) => {
                warn!(error = %err, "Resolution failed");
                ResultState::Error(err)
            }
        };

        if !self.publish(sequence, settled.clone()) {
            debug!(sequence, "Discarded result of superseded invocation");
        }
        settled
    }

    /// Resolve only when `source` differs from the current invocation's
    /// source. Returns `None` when nothing changed.
    pub async fn resolve_if_changed<F, Fut, E>(
        &self,
        source: Option<S>,
        fetch: F,
    ) -> Option<ResultState<V>>
    where
        S: PartialEq,
        F: FnOnce(S) -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + Send + 'static,
    {
        let unchanged = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|current| *current == source);
        if unchanged {
            return None;
        }
        Some(self.resolve(source, fetch).await)
    }

    /// Publish `state` if `sequence` is still the newest invocation
    fn publish(&self, sequence: u64, state: ResultState<V>) -> bool {
        self.state.send_if_modified(|current| {
            if self.sequence.load(Ordering::SeqCst) != sequence {
                return false;
            }
            *current = state;
            true
        })
    }
}

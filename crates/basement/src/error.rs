//! Error types for the basement cache

use std::fmt;
use std::sync::Arc;

/// Failure raised by a persistent store backend.
///
/// Sources are held in `Arc` so a single failure can be handed to every
/// waiter of a shared fetch and kept in published state.
#[derive(Debug, Clone)]
pub enum StoreError {
    Io(Arc<std::io::Error>),
    Serialization(Arc<serde_json::Error>),
    InvalidToken(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "IO error: {err}"),
            Self::Serialization(err) => write!(f, "Serialization error: {err}"),
            Self::InvalidToken(token) => write!(f, "Invalid token: {token:?}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err.as_ref()),
            Self::Serialization(err) => Some(err.as_ref()),
            Self::InvalidToken(_) => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(Arc::new(err))
    }
}

/// Every way a resolution can fail
#[derive(Debug, Clone)]
pub enum BasementError {
    /// Bad input caught before any I/O
    Validation(String),
    KeyDerivation(String),
    Store(StoreError),
    Fetch(Arc<dyn std::error::Error + Send + Sync>),
}

impl BasementError {
    /// Wrap a caller fetch failure
    pub fn fetch<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Fetch(Arc::from(err.into()))
    }
}

impl fmt::Display for BasementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "Validation error: {msg}"),
            Self::KeyDerivation(msg) => write!(f, "Key derivation error: {msg}"),
            Self::Store(err) => write!(f, "Store error: {err}"),
            Self::Fetch(err) => write!(f, "Fetch error: {err}"),
        }
    }
}

impl std::error::Error for BasementError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Fetch(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<StoreError> for BasementError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

pub type Result<T> = std::result::Result<T, BasementError>;

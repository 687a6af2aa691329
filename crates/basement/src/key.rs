//! Deterministic cache keys

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{BasementError, Result};

/// Seed mixed into every structural hash so tokens stay stable across restarts
const TOKEN_SEED: &[u8] = b"basement/v1\0";

/// Opaque cache key derived from a source
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Maps a source to its token. Must be pure and must not perform I/O.
pub trait KeyDeriver<S: ?Sized>: Send + Sync {
    fn derive(&self, source: &S) -> Result<Token>;
}

impl<S, F> KeyDeriver<S> for F
where
    S: ?Sized,
    F: Fn(&S) -> Result<Token> + Send + Sync,
{
    fn derive(&self, source: &S) -> Result<Token> {
        self(source)
    }
}

/// Default deriver: SHA-256 over the canonical JSON form of the source.
///
/// Converting through `serde_json::Value` sorts object keys, so structurally
/// equal sources hash identically regardless of field order.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralHash;

impl<S> KeyDeriver<S> for StructuralHash
where
    S: Serialize + ?Sized,
{
    fn derive(&self, source: &S) -> Result<Token> {
        let value = serde_json::to_value(source)
            .map_err(|e| BasementError::KeyDerivation(e.to_string()))?;
        let canonical = serde_json::to_vec(&value)
            .map_err(|e| BasementError::KeyDerivation(e.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(TOKEN_SEED);
        hasher.update(&canonical);
        Ok(Token(hex::encode(hasher.finalize())))
    }
}

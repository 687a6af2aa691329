use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tracing::{debug, warn};

use super::Store;
use crate::error::StoreError;
use crate::key::Token;

/// Distinguishes temp files of overlapping saves within this process
static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Filesystem store: one JSON file per token, named exactly as the token.
///
/// The base directory is created on demand before every operation, so it is
/// recreated if something deletes it while the store is in use.
pub struct FsStore<V> {
    base_dir: PathBuf,
    _value: PhantomData<fn() -> V>,
}

impl<V> FsStore<V> {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            _value: PhantomData,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    async fn ensure_dir(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.base_dir).await?;
        Ok(())
    }

    /// Resolve the file for a token, refusing anything that is not a
    /// single plain file name
    fn entry_path(&self, token: &Token) -> Result<PathBuf, StoreError> {
        let name = token.as_str();
        let invalid = name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\', '\0']);
        if invalid {
            return Err(StoreError::InvalidToken(name.to_string()));
        }
        Ok(self.base_dir.join(name))
    }

    /// Unique sibling path for one save of `token`
    fn temp_path(&self, token: &Token) -> PathBuf {
        let sequence = TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        self.base_dir
            .join(format!(".{token}.{}.{sequence}.tmp", std::process::id()))
    }
}

#[async_trait]
impl<V> Store<V> for FsStore<V>
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    async fn load(&self, token: &Token) -> Result<Option<V>, StoreError> {
        let path = self.entry_path(token)?;
        self.ensure_dir().await?;

        match fs::read(&path).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, token: &Token, value: &V) -> Result<(), StoreError> {
        let path = self.entry_path(token)?;
        self.ensure_dir().await?;

        let raw = serde_json::to_vec(value)?;
        // Concurrent saves of one token each rename their own complete file;
        // the last rename wins
        let tmp = self.temp_path(token);
        fs::write(&tmp, &raw).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            if let Err(cleanup) = fs::remove_file(&tmp).await {
                warn!(path = ?tmp, error = %cleanup, "Failed to clean up temp file");
            }
            return Err(e.into());
        }

        debug!(token = %token, size = raw.len(), "Saved entry to disk");
        Ok(())
    }

    async fn remove(&self, token: &Token) -> Result<(), StoreError> {
        let path = self.entry_path(token)?;
        self.ensure_dir().await?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(token = %token, "Removed entry from disk");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

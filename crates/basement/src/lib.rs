//! Basement - tiered fetch-and-cache orchestrator
//!
//! Derives a deterministic token for a source, checks a bounded in-memory
//! LRU tier, falls through to a persistent store, and on a full miss runs a
//! caller-supplied fetch, saving the result in both tiers. Evicting from the
//! LRU tier also removes the durable copy, so the two tiers stay in sync.

pub mod error;
pub mod key;
pub mod lru;
pub mod pipeline;
pub mod state;
pub mod store;
pub mod types;

pub use error::{BasementError, Result, StoreError};
pub use key::{KeyDeriver, StructuralHash, Token};
pub use lru::{BoundedCache, DEFAULT_LIMIT};
pub use pipeline::{Basement, Options};
pub use state::{ResultState, Session};
pub use store::{FsStore, MemoryStore, Store};
pub use types::CacheStats;

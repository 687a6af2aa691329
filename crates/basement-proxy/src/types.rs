//! Wire types for the basement proxy

use basement::{CacheStats, ResultState};
use serde::{Deserialize, Serialize};

/// Query string for `/resolve`
#[derive(Debug, Deserialize)]
pub struct ResolveQuery {
    pub src: Option<String>,
}

/// Three-state result as rendered to HTTP clients
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct StateBody {
    pub loading: bool,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl From<&ResultState<String>> for StateBody {
    fn from(state: &ResultState<String>) -> Self {
        let (loading, result, error) = state.as_tuple();
        Self {
            loading,
            result: result.cloned(),
            error: error.map(ToString::to_string),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheStats,
}

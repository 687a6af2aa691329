use std::env;
use std::path::PathBuf;

use basement::DEFAULT_LIMIT;

/// Proxy configuration parsed from environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyConfig {
    pub port: u16,
    pub cache_dir: PathBuf,
    pub limit: usize,
    pub fetch_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: 3002,
            cache_dir: PathBuf::from("./cache/basement"),
            limit: DEFAULT_LIMIT,
            fetch_timeout_secs: 30,
        }
    }
}

impl ProxyConfig {
    /// Parse configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Parse configuration from any variable lookup; unset or unparsable
    /// values fall back to the defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let port = lookup("PORT")
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(defaults.port);

        let cache_dir = lookup("BASEMENT_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);

        let limit = lookup("BASEMENT_LIMIT")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.limit);

        let fetch_timeout_secs = lookup("FETCH_TIMEOUT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(defaults.fetch_timeout_secs);

        Self {
            port,
            cache_dir,
            limit,
            fetch_timeout_secs,
        }
    }
}

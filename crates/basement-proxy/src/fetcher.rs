//! Remote image retrieval encoded as data URIs

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::{ProxyError, Result};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// HTTP client that downloads a URL and returns it as
/// `data:<content-type>;base64,<payload>`
#[derive(Clone)]
pub struct DataUriFetcher {
    client: Client,
}

impl DataUriFetcher {
    /// Create a fetcher whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub async fn fetch(&self, url: &str) -> Result<String> {
        debug!(url = %url, "Fetching remote resource");

        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            warn!(status = %response.status(), url = %url, "Failed to fetch resource");
            return Err(ProxyError::Upstream(format!(
                "{} returned status {}",
                url,
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let data = response.bytes().await?;

        debug!(
            size = data.len(),
            content_type = %content_type,
            "Fetched remote resource"
        );

        Ok(encode_data_uri(&content_type, &data))
    }
}

/// Render bytes as a base64 data URI
pub fn encode_data_uri(content_type: &str, data: &[u8]) -> String {
    format!("data:{};base64,{}", content_type, STANDARD.encode(data))
}

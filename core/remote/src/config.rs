//! Remote service configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use spotsync_common::{Error, Result};

use crate::retry::RetryConfig;

/// Default base URL for a locally running service.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api/";

/// Connection settings for [`crate::http::HttpGateway`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    /// Sent as a bearer token when set.
    pub api_token: Option<String>,
    pub timeout_secs: u64,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    pub retry_initial_delay_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_token: None,
            timeout_secs: 15,
            max_retries: 2,
            retry_initial_delay_ms: 500,
        }
    }
}

impl GatewayConfig {
    /// Parse the base URL, normalized to end with a slash.
    pub fn parsed_base_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("Invalid base URL '{}': {}", self.base_url, e)))?;
        if url.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "Base URL '{}' cannot hold a path",
                self.base_url
            )));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            ..Default::default()
        }
    }
}

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::RepositoryError;
use crate::parse::FeatureApiResponse;

/// Where a feature payload comes from: an api host plus a client key, and the
/// key to decrypt it with when the payload is encrypted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureEndpoint {
    pub api_host: String,
    pub client_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decryption_key: Option<String>,
}

impl FeatureEndpoint {
    pub fn new(api_host: impl Into<String>, client_key: impl Into<String>) -> Self {
        Self {
            api_host: api_host.into(),
            client_key: client_key.into(),
            decryption_key: None,
        }
    }

    #[must_use]
    pub fn with_decryption_key(mut self, key: impl Into<String>) -> Self {
        self.decryption_key = Some(key.into());
        self
    }

    /// Build an endpoint from a context, if it names both host and key.
    #[must_use]
    pub fn from_context(context: &crate::Context) -> Option<Self> {
        let endpoint = Self {
            api_host: context.api_host.clone()?,
            client_key: context.client_key.clone()?,
            decryption_key: context.decryption_key.clone(),
        };
        Some(endpoint)
    }

    /// Cache identity: `"{api_host}||{client_key}"`.
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!("{}||{}", self.api_host, self.client_key)
    }

    #[must_use]
    pub fn features_url(&self) -> String {
        format!(
            "{}/api/features/{}",
            self.api_host.trim_end_matches('/'),
            self.client_key
        )
    }
}

/// Retrieves raw feature payloads.
///
/// The repository owns caching, deduplication and decryption; a fetcher only
/// performs the request.
#[async_trait]
pub trait FeatureFetcher: Send + Sync {
    async fn fetch(&self, endpoint: &FeatureEndpoint) -> Result<FeatureApiResponse, RepositoryError>;
}

/// Per-request limit used by the HTTP fetcher and usage transport.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `reqwest`-backed fetcher for `GET {api_host}/api/features/{client_key}`.
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

#[cfg(feature = "http")]
impl Default for HttpFetcher {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[cfg(feature = "http")]
impl HttpFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client (proxies, default headers).
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            ..Self::default()
        }
    }

    /// Give up on a request after `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl FeatureFetcher for HttpFetcher {
    async fn fetch(&self, endpoint: &FeatureEndpoint) -> Result<FeatureApiResponse, RepositoryError> {
        let url = endpoint.features_url();
        tracing::debug!(%url, "fetching features");

        let response = self.client.get(&url).timeout(self.timeout).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RepositoryError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

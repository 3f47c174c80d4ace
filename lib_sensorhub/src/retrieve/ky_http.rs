//! # HTTP Retrieval Utilities
//!
//! This module provides a robust, asynchronous API client wrapper around `reqwest`.
//! It includes middleware support for exponential backoff retries and returns
//! plain-text bodies, which is what device CGI endpoints answer with.

use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use reqwest::header::AUTHORIZATION;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::ConfigurationError;

/// A standardized container for text responses.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// The response body, decoded as text.
    pub body: String,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    /// The absolute URL that was requested.
    pub url: String,
}

/// HTTP basic-auth credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Transport settings owned by the client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Upper bound on one request, retries excluded.
    pub timeout: Duration,
    /// Retries for transient failures (connect errors, 5xx, 408, 429).
    pub max_retries: u32,
    pub credentials: Option<Credentials>,
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_retries: 1,
            credentials: None,
            user_agent: "SensorHub/1.0".to_string(),
        }
    }
}

/// A flexible asynchronous HTTP client.
///
/// Built on top of `reqwest_middleware`, it handles the base URL,
/// basic authentication, and automatic retries.
pub struct ApiClient {
    /// The underlying middleware-enabled client.
    inner: ClientWithMiddleware,
    /// The base URL to which all relative paths are joined.
    base_url: Url,
    /// Pre-encoded `Authorization` header value, if credentials were given.
    authorization: Option<String>,
}

impl ApiClient {
    /// Creates a new `ApiClient` instance with a retry policy.
    ///
    /// A trailing `/` is added to `base_url` when missing so that relative paths
    /// extend it instead of replacing its last segment.
    pub fn new(base_url: &str, options: &ClientOptions) -> Result<Self, ConfigurationError> {
        let mut normalized = base_url.trim().to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let url = Url::parse(&normalized).map_err(|e| ConfigurationError::InvalidAddress {
            address: base_url.to_string(),
            reason: e.to_string(),
        })?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(options.max_retries);

        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .user_agent(options.user_agent.as_str())
            .build()
            .map_err(|e| ConfigurationError::HttpClient(e.to_string()))?;

        let client = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        let authorization = options.credentials.as_ref().map(|c| {
            let token = general_purpose::STANDARD.encode(format!("{}:{}", c.username, c.password));
            format!("Basic {}", token)
        });

        Ok(Self {
            inner: client,
            base_url: url,
            authorization,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs a GET and returns the body as text.
    ///
    /// Non-2xx statuses are not errors here; callers inspect `success`.
    ///
    /// # Errors
    /// Returns an `anyhow::Error` if URL joining, network execution or reading
    /// the body fails. A body cut short by the peer is an error, not an empty string.
    pub async fn get_text(&self, path: &str) -> anyhow::Result<ApiResponse> {
        let full_url = self.base_url.join(path.trim_start_matches('/'))?;
        let mut req = self.inner.get(full_url.clone());

        if let Some(auth) = &self.authorization {
            req = req.header(AUTHORIZATION, auth.as_str());
        }

        let response: reqwest::Response = req.send().await?;
        let status = response.status();
        let body = response.text().await?;

        Ok(ApiResponse {
            body,
            status: status.as_u16(),
            success: status.is_success(),
            url: full_url.to_string(),
        })
    }
}

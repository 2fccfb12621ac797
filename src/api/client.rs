//! HTTP client for the portal REST API.
//!
//! Every route path is appended to the configured base URL. Responses are
//! only inspected for their status; a non-2xx body is kept as opaque text.

use reqwest::{Client, Method, Response};
use serde_json::Value;

use crate::config::RemoteConfig;
use crate::error::SyncError;
use crate::sync::executor::Transport;
use crate::sync::routes::{HttpMethod, ReplayRequest};

/// HTTP client wrapper for portal API communication.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

/// Result of a connectivity probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The server answered, whatever the status.
    Reachable,
    /// The request never got an answer.
    Unreachable,
}

impl ApiClient {
    /// Create a client from the remote settings.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Http` if the TLS backend cannot be initialised.
    pub fn new(config: &RemoteConfig) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| SyncError::Http(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create a client with default timeouts for the given base URL.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Http` if the TLS backend cannot be initialised.
    pub fn with_base_url(base_url: &str) -> Result<Self, SyncError> {
        Self::new(&RemoteConfig {
            base_url: base_url.to_string(),
            ..RemoteConfig::default()
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request with an optional JSON body to a relative API path.
    pub async fn send(
        &self,
        method: HttpMethod,
        path: &str,
        body: &Value,
    ) -> Result<Response, reqwest::Error> {
        let mut builder = self.client.request(to_method(method), self.url(path));
        if !body.is_null() {
            builder = builder.json(body);
        }
        builder.send().await
    }

    /// Check whether the API answers at all.
    pub async fn probe(&self, path: &str) -> ProbeResult {
        match self.client.get(self.url(path)).send().await {
            Ok(_) => ProbeResult::Reachable,
            Err(e) if is_network_error(&e) => {
                log::debug!("Connectivity probe failed: {e}");
                ProbeResult::Unreachable
            },
            Err(e) => {
                log::debug!("Connectivity probe error treated as reachable: {e}");
                ProbeResult::Reachable
            },
        }
    }
}

impl Transport for ApiClient {
    async fn replay(&self, request: &ReplayRequest) -> Result<(), String> {
        let response = self
            .send(request.method, &request.path, &request.body)
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let body = body.trim();
        if body.is_empty() {
            Err(format!("HTTP {status}"))
        } else {
            Err(body.to_string())
        }
    }
}

const fn to_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

/// Whether the error means the request never reached a server.
fn is_network_error(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout()
}

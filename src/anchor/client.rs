//! Anchor Publisher
//!
//! Uploads rendered anchor records to an external storage network and
//! returns the ID the network assigned. Failures are typed per network and
//! never retried here.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::PublisherConfig;
use crate::error::PublisherError;

#[async_trait]
pub trait AnchorPublisher: Send + Sync {
    /// Network name used in logs and errors
    fn network(&self) -> &str;

    /// Upload `bytes`, returning the external ID
    async fn upload(&self, bytes: &[u8]) -> Result<String, PublisherError>;
}

/// Publisher posting to an HTTP upload endpoint with bearer auth
#[derive(Debug, Clone)]
pub struct HttpPublisher {
    network: String,
    endpoint: String,
    token: String,
    id_pointer: String,
    timeout: Duration,
    http_client: Client,
}

impl HttpPublisher {
    /// Build a publisher; a missing endpoint or token fails here, before any request
    pub fn new(
        network: &str,
        endpoint: Option<&str>,
        token: Option<&str>,
        id_pointer: &str,
        timeout: Duration,
    ) -> Result<Self, PublisherError> {
        let missing = |key: &str| PublisherError::MissingConfig {
            network: network.to_string(),
            key: key.to_string(),
        };

        let endpoint = endpoint
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| missing(&format!("{}_endpoint", network)))?;
        let token = token
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| missing(&format!("{}_token", network)))?;

        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PublisherError::Http {
                network: network.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            network: network.to_string(),
            endpoint: endpoint.to_string(),
            token: token.to_string(),
            id_pointer: id_pointer.to_string(),
            timeout,
            http_client,
        })
    }

    /// IPFS pinning service; the CID is read from `/value/cid`
    pub fn ipfs(config: &PublisherConfig) -> Result<Self, PublisherError> {
        Self::new(
            "ipfs",
            config.ipfs_endpoint.as_deref(),
            config.ipfs_token.as_deref(),
            "/value/cid",
            config.timeout(),
        )
    }

    /// Arweave bundler; the transaction id is read from `/id`
    pub fn arweave(config: &PublisherConfig) -> Result<Self, PublisherError> {
        Self::new(
            "arweave",
            config.arweave_endpoint.as_deref(),
            config.arweave_token.as_deref(),
            "/id",
            config.timeout(),
        )
    }

    fn http_error(&self, message: impl ToString) -> PublisherError {
        PublisherError::Http {
            network: self.network.clone(),
            message: message.to_string(),
        }
    }

    fn response_error(&self, message: impl ToString) -> PublisherError {
        PublisherError::Response {
            network: self.network.clone(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl AnchorPublisher for HttpPublisher {
    fn network(&self) -> &str {
        &self.network
    }

    async fn upload(&self, bytes: &[u8]) -> Result<String, PublisherError> {
        debug!("Uploading {} bytes to {} ({})", bytes.len(), self.network, self.endpoint);

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PublisherError::Timeout {
                        network: self.network.clone(),
                        secs: self.timeout.as_secs(),
                    }
                } else {
                    self.http_error(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.http_error(format!("HTTP {}: {}", status, body.trim())));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| self.response_error(format!("invalid JSON: {}", e)))?;

        let id = body
            .pointer(&self.id_pointer)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| self.response_error(format!("no string at {}", self.id_pointer)))?;

        info!("Published anchor to {}: {}", self.network, id);
        Ok(id.to_string())
    }
}

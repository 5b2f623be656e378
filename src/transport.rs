//! # List Transport
//!
//! The HTTP collaborator the poller fetches through. The poller only needs
//! `get`; the transport must honor the cancellation token and report an abort
//! as [`FetchError::Cancelled`] so it can be told apart from real failures.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

use crate::error::FetchError;
use crate::query::RequestDescriptor;

/// Performs list requests for the poller.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch the resource identified by `descriptor`.
    async fn get(
        &self,
        descriptor: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, FetchError>;
}

/// Transport backed by the console's REST API.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    api_root: Url,
}

impl HttpTransport {
    /// Create a transport for the API served under `base_url`.
    ///
    /// Descriptors resolve against `<base_url>/api/v1/`.
    pub fn new(base_url: &Url) -> Result<Self, url::ParseError> {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: &Url, client: reqwest::Client) -> Result<Self, url::ParseError> {
        let mut root = base_url.as_str().trim_end_matches('/').to_string();
        root.push_str("/api/v1/");
        Ok(Self {
            client,
            api_root: Url::parse(&root)?,
        })
    }

    pub fn api_root(&self) -> &Url {
        &self.api_root
    }

    /// Absolute URL for `descriptor`.
    pub fn resolve(&self, descriptor: &RequestDescriptor) -> Result<Url, FetchError> {
        self.api_root
            .join(descriptor.as_str())
            .map_err(|source| FetchError::InvalidDescriptor {
                descriptor: descriptor.to_string(),
                source,
            })
    }

    async fn send(&self, url: Url) -> Result<serde_json::Value, FetchError> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body = response.bytes().await?;
            return Ok(serde_json::from_slice(&body)?);
        }

        let body = response.text().await.unwrap_or_default();
        Err(FetchError::from_status(status, &body))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip_all, fields(descriptor = %descriptor))]
    async fn get(
        &self,
        descriptor: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, FetchError> {
        let url = self.resolve(descriptor)?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("List request aborted");
                Err(FetchError::Cancelled)
            }
            result = self.send(url) => result,
        }
    }
}

//! Client for the broker that schedules tiles onto remote workers.
//!
//! The broker gives no ordering or timing guarantee: eventually most tiles
//! produce a result on the result queue, some more than once, some never.

use analyst_core::tile::TileRequest;
use analyst_core::types::JobId;
use async_trait::async_trait;

/// Errors from handing a batch of tiles to the broker.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The broker returned a non-2xx status code.
    #[error("Broker rejected batch ({status}): {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The batch could not be handed over for another reason.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}

/// Schedules the tiles of one job onto the worker pool.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Hand every tile of `job_id` to the broker in a single batch.
    async fn dispatch(&self, job_id: JobId, tiles: &[TileRequest]) -> Result<(), BrokerError>;
}

/// Broker reachable over HTTP.
///
/// Tiles are posted as one JSON array to `{base_url}/enqueue/regional`.
pub struct HttpBroker {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBroker {
    /// Create a client for the broker at `base_url`, e.g.
    /// `http://localhost:6001`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn enqueue_url(&self) -> String {
        format!("{}/enqueue/regional", self.base_url)
    }

    /// Ensure the response has a success status code, turning anything else
    /// into [`BrokerError::Rejected`] with the body text.
    async fn ensure_success(response: reqwest::Response) -> Result<(), BrokerError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(BrokerError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerClient for HttpBroker {
    async fn dispatch(&self, job_id: JobId, tiles: &[TileRequest]) -> Result<(), BrokerError> {
        let response = self
            .client
            .post(self.enqueue_url())
            .json(tiles)
            .send()
            .await?;

        Self::ensure_success(response).await?;

        tracing::debug!(
            job_id = %job_id,
            tiles = tiles.len(),
            "Tile batch accepted by broker",
        );
        Ok(())
    }
}

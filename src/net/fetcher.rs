//! Retrying HTTP fetcher
//!
//! Issues GET requests for piece sources, retrying transport failures and
//! retryable statuses with exponential backoff.

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;
use crate::error::AssembleError;
use crate::net::retry::{retry_after, RetryPolicy};
use crate::net::{PieceBody, PieceSource};

/// HTTP piece source with bounded retries
#[derive(Debug, Clone)]
pub struct RetryingFetcher {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl RetryingFetcher {
    /// Create a fetcher using the given retry policy
    pub fn new(policy: RetryPolicy) -> Result<Self, AssembleError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AssembleError::config_error(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, policy })
    }

    /// Create a fetcher around an existing client
    pub fn with_client(client: reqwest::Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }
}

#[async_trait]
impl PieceSource for RetryingFetcher {
    async fn fetch(&self, url: &Url, cancel: &CancellationToken) -> Result<Box<dyn PieceBody>, AssembleError> {
        let mut attempt = 0u32;
        loop {
            trace!("GET {} (attempt {})", url, attempt + 1);
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(AssembleError::cancelled(format!("request to {} cancelled", url)));
                }
                sent = self.client.get(url.clone()).send() => sent,
            };

            let (err, wait_hint) = match sent {
                Ok(response) if response.status().is_success() => {
                    debug!("GET {} -> {} ({:?} bytes)", url, response.status(), response.content_length());
                    return Ok(Box::new(HttpBody { response }));
                }
                Ok(response) => {
                    let status = response.status();
                    let hint = retry_after(status, response.headers());
                    let err = AssembleError::network_error(
                        format!("HTTP error code {}", status.as_u16()),
                        url.as_str(),
                        RetryPolicy::should_retry_status(status),
                    );
                    (err, hint)
                }
                Err(e) => (AssembleError::from(e), None),
            };

            if !err.is_retryable() {
                return Err(err);
            }
            if !self.policy.allows_retry(attempt) {
                return Err(err.with_context(format!("giving up after {} attempts", attempt + 1)));
            }

            let delay = self.policy.backoff(attempt, wait_hint);
            warn!(
                "Request to {} failed (attempt {}/{}): {}; retrying in {:?}",
                url,
                attempt + 1,
                self.policy.max_retries + 1,
                err,
                delay
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(AssembleError::cancelled(format!("request to {} cancelled during backoff", url)));
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

/// Streaming body of a successful response
struct HttpBody {
    response: reqwest::Response,
}

#[async_trait]
impl PieceBody for HttpBody {
    fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>, AssembleError> {
        Ok(self.response.chunk().await?)
    }
}

//! Network module
//!
//! Piece sources and the retrying HTTP transport.

pub mod retry;
pub mod fetcher;

#[cfg(test)]
pub(crate) mod stub;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use url::Url;
use crate::error::AssembleError;

pub use retry::RetryPolicy;
pub use fetcher::RetryingFetcher;

/// Where piece bytes come from
///
/// `fetch` resolves once a successful response has started; the body is
/// then consumed chunk by chunk so it can be written and hashed in one pass.
#[async_trait]
pub trait PieceSource: Send + Sync {
    /// Start fetching `url`, giving up when `cancel` fires
    async fn fetch(&self, url: &Url, cancel: &CancellationToken) -> Result<Box<dyn PieceBody>, AssembleError>;
}

/// Body of a successful piece response
#[async_trait]
pub trait PieceBody: Send {
    /// Declared body length, if the source announced one
    fn content_length(&self) -> Option<u64>;

    /// Next chunk of the body, `None` at the end
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, AssembleError>;
}

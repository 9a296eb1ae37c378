//! Embedding provider capability and the gateway that fronts it.
//!
//! * [`EmbeddingProvider`] — the external capability: a batch of texts in,
//!   one fixed-dimension vector per text out.
//! * [`EmbeddingGateway`] — memoization keyed by `(model, exact text)`,
//!   bounded exponential-backoff retry for retryable failures, and a
//!   semaphore capping in-flight provider calls.
//! * [`MockEmbeddingProvider`] — deterministic vectors for tests and CI.
//! * [`HttpEmbeddingProvider`] — OpenAI-compatible HTTP provider.

pub mod gateway;
pub mod http;
pub mod mock;

use async_trait::async_trait;

use crate::errors::EmbeddingError;

pub use gateway::{EmbeddingGateway, GatewayStats, RetryPolicy};
pub use http::HttpEmbeddingProvider;
pub use mock::MockEmbeddingProvider;

/// External embedding capability.
///
/// Implementations must be deterministic for identical inputs; the gateway's
/// cache relies on it.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds a batch of texts, one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Identifier of the underlying model, part of the cache key.
    fn model(&self) -> &str;

    /// Fixed output dimension for every vector this provider returns.
    fn dimensions(&self) -> usize;
}

//! Embedding provider trait: turns text into fixed-length vectors.
//!
//! Implementations live in `contextrelay-providers`: a deterministic mock,
//! HTTP adapters for hosted APIs, and a fallback chain. Which one runs is a
//! configuration choice.

use crate::error::EmbeddingError;
use async_trait::async_trait;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name (e.g., "mock", "voyage", "openai").
    fn name(&self) -> &str;

    /// Length of every vector this provider returns.
    fn dimensions(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding batch".into()))
    }

    /// Whether the provider is currently usable.
    fn is_available(&self) -> bool {
        true
    }

    /// Simulate an outage. Returns `false` when the provider does not support it.
    fn set_available(&self, _available: bool) -> bool {
        false
    }
}

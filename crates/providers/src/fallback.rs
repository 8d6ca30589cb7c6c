//! Embedder fallback: ordered retry chain with per-provider timeouts.
//!
//! When a provider fails (timeout, rate limit, error), automatically tries the next
//! provider in the configured chain. Every entry must produce vectors of the
//! same length, otherwise similarity across fragments embedded by different
//! entries would be undefined.

use async_trait::async_trait;
use contextrelay_core::error::EmbeddingError;
use contextrelay_core::EmbeddingProvider;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// An embedder that wraps an ordered list of embedders and falls back on failure.
pub struct FallbackEmbedder {
    name: String,
    chain: Vec<FallbackEntry>,
}

/// A single entry in the fallback chain.
struct FallbackEntry {
    provider: Arc<dyn EmbeddingProvider>,
    timeout: Duration,
}

impl FallbackEmbedder {
    /// Create a new fallback embedder with no entries.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chain: Vec::new(),
        }
    }

    /// Add a provider to the fallback chain with a custom timeout.
    pub fn add(mut self, provider: Arc<dyn EmbeddingProvider>, timeout: Duration) -> Self {
        self.chain.push(FallbackEntry { provider, timeout });
        self
    }

    /// Add a provider with the default timeout (30s).
    pub fn add_default(self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.add(provider, Duration::from_secs(30))
    }

    /// Number of providers in the chain.
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

#[async_trait]
impl EmbeddingProvider for FallbackEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.chain
            .first()
            .map(|e| e.provider.dimensions())
            .unwrap_or(0)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut last_error = EmbeddingError::NotConfigured("No providers in fallback chain".into());

        for (i, entry) in self.chain.iter().enumerate() {
            let provider_name = entry.provider.name().to_string();

            if !entry.provider.is_available() {
                warn!(provider = %provider_name, "Fallback: provider unavailable, skipping");
                last_error = EmbeddingError::Unavailable(provider_name);
                continue;
            }

            info!(
                provider = %provider_name,
                attempt = i + 1,
                total = self.chain.len(),
                "Fallback: trying embedder"
            );

            match tokio::time::timeout(entry.timeout, entry.provider.embed(texts)).await {
                Ok(Ok(vectors)) => return Ok(vectors),
                Ok(Err(e)) => {
                    warn!(
                        provider = %provider_name,
                        error = %e,
                        "Fallback: embedder failed, trying next"
                    );
                    last_error = e;
                }
                Err(_) => {
                    warn!(
                        provider = %provider_name,
                        timeout_secs = entry.timeout.as_secs(),
                        "Fallback: embedder timed out, trying next"
                    );
                    last_error = EmbeddingError::Timeout(format!(
                        "Embedder '{}' timed out after {}s",
                        provider_name,
                        entry.timeout.as_secs()
                    ));
                }
            }
        }

        Err(last_error)
    }

    fn is_available(&self) -> bool {
        self.chain.iter().any(|e| e.provider.is_available())
    }

    /// Toggles every entry that supports it.
    fn set_available(&self, available: bool) -> bool {
        let mut supported = false;
        for entry in &self.chain {
            supported |= entry.provider.set_available(available);
        }
        supported
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEmbedder;
    use std::sync::Mutex;

    /// An embedder that always fails.
    struct FailingEmbedder {
        error: EmbeddingError,
        call_count: Mutex<usize>,
    }

    impl FailingEmbedder {
        fn new(error: EmbeddingError) -> Self {
            Self {
                error,
                call_count: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        fn name(&self) -> &str {
            "failing"
        }

        fn dimensions(&self) -> usize {
            8
        }

        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            *self.call_count.lock().unwrap() += 1;
            Err(self.error.clone())
        }
    }

    /// An embedder that hangs forever (for timeout testing).
    struct HangingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for HangingEmbedder {
        fn name(&self) -> &str {
            "hanging"
        }

        fn dimensions(&self) -> usize {
            8
        }

        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    fn texts() -> Vec<String> {
        vec!["hello".into()]
    }

    #[tokio::test]
    async fn first_embedder_succeeds() {
        let fallback = FallbackEmbedder::new("test")
            .add_default(Arc::new(MockEmbedder::new(8)))
            .add_default(Arc::new(FailingEmbedder::new(EmbeddingError::Network("x".into()))));

        let result = fallback.embed(&texts()).await.unwrap();
        assert_eq!(result[0].len(), 8);
        assert_eq!(fallback.dimensions(), 8);
    }

    #[tokio::test]
    async fn falls_back_on_rate_limit() {
        let p1 = Arc::new(FailingEmbedder::new(EmbeddingError::RateLimited {
            retry_after_secs: 60,
        }));
        let fallback = FallbackEmbedder::new("test")
            .add_default(p1.clone())
            .add_default(Arc::new(MockEmbedder::new(8)));

        assert!(fallback.embed(&texts()).await.is_ok());
        assert_eq!(p1.calls(), 1);
    }

    #[tokio::test]
    async fn all_embedders_fail() {
        let p1 = Arc::new(FailingEmbedder::new(EmbeddingError::Network("conn refused".into())));
        let p2 = Arc::new(FailingEmbedder::new(EmbeddingError::AuthenticationFailed(
            "bad key".into(),
        )));

        let fallback = FallbackEmbedder::new("test")
            .add_default(p1.clone())
            .add_default(p2.clone());

        // Last error should be from the last embedder
        match fallback.embed(&texts()).await.unwrap_err() {
            EmbeddingError::AuthenticationFailed(_) => {}
            other => panic!("Expected AuthenticationFailed, got: {other:?}"),
        }
        assert_eq!(p1.calls(), 1);
        assert_eq!(p2.calls(), 1);
    }

    #[tokio::test]
    async fn timeout_triggers_fallback() {
        let fallback = FallbackEmbedder::new("test")
            .add(Arc::new(HangingEmbedder), Duration::from_millis(50))
            .add_default(Arc::new(MockEmbedder::new(8)));

        assert!(fallback.embed(&texts()).await.is_ok());
    }

    #[tokio::test]
    async fn unavailable_entries_are_skipped() {
        let mock = Arc::new(MockEmbedder::new(8));
        let fallback = FallbackEmbedder::new("test").add_default(mock.clone());

        assert!(fallback.set_available(false));
        assert!(!fallback.is_available());
        assert!(matches!(
            fallback.embed(&texts()).await,
            Err(EmbeddingError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn empty_chain_returns_not_configured() {
        let fallback = FallbackEmbedder::new("empty");
        assert!(fallback.is_empty());
        assert!(matches!(
            fallback.embed(&texts()).await,
            Err(EmbeddingError::NotConfigured(_))
        ));
    }
}

//! Embedder factory: selects the embedding implementation from config.
//!
//! `mock` runs offline. `voyage` and `openai` call the hosted API and, when
//! `fallback_to_mock` is set, fall back to a mock of the same dimensionality
//! so vectors stay comparable.

use crate::fallback::FallbackEmbedder;
use crate::mock::MockEmbedder;
use crate::openai_compat::OpenAiCompatEmbedder;
use contextrelay_config::{EmbeddingConfig, EmbeddingProviderKind};
use contextrelay_core::EmbeddingProvider;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Build the configured embedder.
pub fn build_from_config(config: &EmbeddingConfig) -> Arc<dyn EmbeddingProvider> {
    let dimensions = config.effective_dimensions();

    let hosted = match config.provider {
        EmbeddingProviderKind::Mock => {
            info!(dimensions, "Using mock embedder");
            return Arc::new(MockEmbedder::new(dimensions));
        }
        kind => {
            let Some(api_key) = config.api_key.clone().filter(|k| !k.is_empty()) else {
                warn!(provider = %kind, "No API key configured, using mock embedder");
                return Arc::new(MockEmbedder::new(dimensions));
            };
            hosted_embedder(kind, api_key, config)
        }
    };

    info!(
        provider = %hosted.name(),
        model = %hosted.model(),
        dimensions,
        fallback = config.fallback_to_mock,
        "Using hosted embedder"
    );

    if config.fallback_to_mock {
        let timeout = Duration::from_secs(config.timeout_secs);
        Arc::new(
            FallbackEmbedder::new(format!("{}+mock", hosted.name()))
                .add(Arc::new(hosted), timeout)
                .add_default(Arc::new(MockEmbedder::new(dimensions))),
        )
    } else {
        Arc::new(hosted)
    }
}

fn hosted_embedder(
    kind: EmbeddingProviderKind,
    api_key: String,
    config: &EmbeddingConfig,
) -> OpenAiCompatEmbedder {
    let mut embedder = match kind {
        EmbeddingProviderKind::Openai => OpenAiCompatEmbedder::openai(api_key),
        _ => OpenAiCompatEmbedder::voyage(api_key),
    };

    if let Some(base_url) = &config.base_url {
        embedder = embedder.with_base_url(base_url);
    }
    if config.model.is_some() || config.dimensions.is_some() {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| embedder.model().to_string());
        embedder = embedder.with_model(model, config.effective_dimensions());
    }
    embedder.with_batch_size(config.batch_size)
}

//! Embedding provider implementations for the context relay.
//!
//! All providers implement the `contextrelay_core::EmbeddingProvider` trait.
//! The factory selects the correct one based on configuration.

pub mod factory;
pub mod fallback;
pub mod mock;
pub mod openai_compat;

pub use factory::build_from_config;
pub use fallback::FallbackEmbedder;
pub use mock::MockEmbedder;
pub use openai_compat::OpenAiCompatEmbedder;

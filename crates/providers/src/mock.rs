//! Deterministic offline embedder.
//!
//! The vector for a text depends only on the text: the RNG is seeded with
//! the sum of its code points, components are drawn uniformly from [-1, 1]
//! and the result is L2-normalised. Identical texts therefore always
//! conflict with each other, unrelated texts land near zero similarity,
//! and nothing needs network access.

use async_trait::async_trait;
use contextrelay_core::error::EmbeddingError;
use contextrelay_core::similarity::normalize;
use contextrelay_core::EmbeddingProvider;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

pub struct MockEmbedder {
    dimensions: usize,
    available: AtomicBool,
}

impl MockEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            available: AtomicBool::new(true),
        }
    }

    fn seed(text: &str) -> u64 {
        text.chars().map(|c| c as u64).sum()
    }

    /// The vector for one text.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(Self::seed(text));
        let mut v: Vec<f32> = (0..self.dimensions)
            .map(|_| rng.random_range(-1.0f32..=1.0))
            .collect();
        normalize(&mut v);
        v
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    fn name(&self) -> &str {
        "mock"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if !self.is_available() {
            return Err(EmbeddingError::Unavailable(
                "mock embedder switched off".into(),
            ));
        }
        debug!(count = texts.len(), dimensions = self.dimensions, "Mock embedding batch");
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn set_available(&self, available: bool) -> bool {
        self.available.store(available, Ordering::SeqCst);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextrelay_core::cosine_similarity;

    #[tokio::test]
    async fn same_text_same_vector() {
        let embedder = MockEmbedder::new(64);
        let out = embedder
            .embed(&["budget".to_string(), "budget".to_string()])
            .await
            .unwrap();
        assert_eq!(out[0], out[1]);
        assert_eq!(out[0].len(), 64);
    }

    #[tokio::test]
    async fn vectors_are_unit_length() {
        let embedder = MockEmbedder::new(384);
        let v = embedder.embed_one("The budget is $2000").await.unwrap();
        let norm: f64 = v.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn unrelated_texts_are_not_conflicts() {
        let embedder = MockEmbedder::new(384);
        let a = embedder.embed_one("Ship on Friday").await.unwrap();
        let b = embedder.embed_one("Vendor contract renewal terms").await.unwrap();
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!(sim < 0.8, "similarity {sim} unexpectedly high");
    }

    #[tokio::test]
    async fn switched_off_embedder_fails() {
        let embedder = MockEmbedder::default();
        assert!(embedder.set_available(false));
        assert!(matches!(
            embedder.embed_one("x").await,
            Err(EmbeddingError::Unavailable(_))
        ));
        embedder.set_available(true);
        assert!(embedder.embed_one("x").await.is_ok());
    }
}

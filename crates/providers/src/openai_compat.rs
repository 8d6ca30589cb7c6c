//! OpenAI-compatible embeddings endpoint.
//!
//! Works with: OpenAI, Voyage AI, and any service exposing
//! `POST {base_url}/embeddings` that accepts `{input, model}` and answers
//! `{data: [{embedding, index}]}`.

use async_trait::async_trait;
use contextrelay_core::error::EmbeddingError;
use contextrelay_core::EmbeddingProvider;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A hosted embedding provider speaking the OpenAI embeddings wire format.
pub struct OpenAiCompatEmbedder {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
    /// Voyage distinguishes "document" from "query" inputs.
    input_type: Option<String>,
    batch_size: usize,
    client: reqwest::Client,
}

impl OpenAiCompatEmbedder {
    /// Create a new provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            dimensions,
            input_type: None,
            batch_size: 128,
            client,
        }
    }

    /// Voyage AI (voyage-3, 1024 dimensions, document inputs).
    pub fn voyage(api_key: impl Into<String>) -> Self {
        Self::new(
            "voyage",
            "https://api.voyageai.com/v1",
            api_key,
            "voyage-3",
            1024,
        )
        .with_input_type("document")
    }

    /// OpenAI (text-embedding-3-small, 1536 dimensions).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new(
            "openai",
            "https://api.openai.com/v1",
            api_key,
            "text-embedding-3-small",
            1536,
        )
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>, dimensions: usize) -> Self {
        self.model = model.into();
        self.dimensions = dimensions;
        self
    }

    pub fn with_input_type(mut self, input_type: impl Into<String>) -> Self {
        self.input_type = Some(input_type.into());
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/embeddings", self.base_url);
        let body = ApiRequest {
            input: batch,
            model: &self.model,
            input_type: self.input_type.as_deref(),
        };

        debug!(provider = %self.name, model = %self.model, count = batch.len(), "Sending embedding request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EmbeddingError::Timeout(e.to_string())
                } else {
                    EmbeddingError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if let Some(err) = status_error(status) {
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status, body = %error_body, "Embedding provider returned error");
            return Err(match err {
                EmbeddingError::ApiError { status_code, .. } => EmbeddingError::ApiError {
                    status_code,
                    message: error_body,
                },
                other => other,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        into_vectors(api_response, batch.len(), self.dimensions)
    }
}

/// Map a non-success status to an error. `None` for 2xx.
fn status_error(status: u16) -> Option<EmbeddingError> {
    match status {
        200..=299 => None,
        429 => Some(EmbeddingError::RateLimited {
            retry_after_secs: 5,
        }),
        401 | 403 => Some(EmbeddingError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        )),
        other => Some(EmbeddingError::ApiError {
            status_code: other,
            message: String::new(),
        }),
    }
}

/// Order by `index`, check count and dimensionality.
fn into_vectors(
    response: ApiResponse,
    expected_count: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let mut data = response.data;
    data.sort_by_key(|d| d.index);

    if data.len() != expected_count {
        return Err(EmbeddingError::InvalidResponse(format!(
            "expected {expected_count} embeddings, got {}",
            data.len()
        )));
    }

    data.into_iter()
        .map(|d| {
            if d.embedding.len() != dimensions {
                Err(EmbeddingError::DimensionMismatch {
                    expected: dimensions,
                    actual: d.embedding.len(),
                })
            } else {
                Ok(d.embedding)
            }
        })
        .collect()
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }

    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }
}

// --- API types ---

#[derive(Serialize)]
struct ApiRequest<'a> {
    input: &'a [String],
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_type: Option<&'a str>,
}

#[derive(Deserialize)]
struct ApiResponse {
    data: Vec<ApiEmbedding>,
}

#[derive(Deserialize)]
struct ApiEmbedding {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        let voyage = OpenAiCompatEmbedder::voyage("k");
        assert_eq!(voyage.name(), "voyage");
        assert_eq!(voyage.dimensions(), 1024);
        assert_eq!(voyage.model(), "voyage-3");
        assert_eq!(voyage.input_type.as_deref(), Some("document"));

        let openai = OpenAiCompatEmbedder::openai("k").with_base_url("http://localhost:9/v1/");
        assert_eq!(openai.dimensions(), 1536);
        assert_eq!(openai.base_url, "http://localhost:9/v1");
    }

    #[test]
    fn request_body_shape() {
        let input = vec!["a".to_string()];
        let body = ApiRequest {
            input: &input,
            model: "voyage-3",
            input_type: Some("document"),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["input"][0], "a");
        assert_eq!(json["input_type"], "document");

        let plain = ApiRequest {
            input: &input,
            model: "m",
            input_type: None,
        };
        assert!(serde_json::to_value(&plain).unwrap().get("input_type").is_none());
    }

    #[test]
    fn response_is_reordered_by_index() {
        let response: ApiResponse = serde_json::from_str(
            r#"{"data":[{"embedding":[0.0,1.0],"index":1},{"embedding":[1.0,0.0],"index":0}]}"#,
        )
        .unwrap();
        let vectors = into_vectors(response, 2, 2).unwrap();
        assert_eq!(vectors[0], vec![1.0, 0.0]);
        assert_eq!(vectors[1], vec![0.0, 1.0]);
    }

    #[test]
    fn wrong_dimensions_rejected() {
        let response: ApiResponse =
            serde_json::from_str(r#"{"data":[{"embedding":[1.0],"index":0}]}"#).unwrap();
        assert!(matches!(
            into_vectors(response, 1, 3),
            Err(EmbeddingError::DimensionMismatch { expected: 3, actual: 1 })
        ));
    }

    #[test]
    fn status_mapping() {
        assert!(status_error(200).is_none());
        assert!(matches!(status_error(429), Some(EmbeddingError::RateLimited { .. })));
        assert!(matches!(status_error(401), Some(EmbeddingError::AuthenticationFailed(_))));
        assert!(matches!(
            status_error(500),
            Some(EmbeddingError::ApiError { status_code: 500, .. })
        ));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_network_error() {
        let embedder = OpenAiCompatEmbedder::openai("k").with_base_url("http://127.0.0.1:1/v1");
        let result = embedder.embed(&["x".to_string()]).await;
        assert!(matches!(
            result,
            Err(EmbeddingError::Network(_)) | Err(EmbeddingError::Timeout(_))
        ));
    }

    #[test]
    fn missing_key_reports_unavailable() {
        assert!(!OpenAiCompatEmbedder::openai("").is_available());
        assert!(OpenAiCompatEmbedder::openai("sk").is_available());
    }
}

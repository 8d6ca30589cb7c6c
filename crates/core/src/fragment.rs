//! Fragments: the atomic pieces of content a context packet is made of.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Number of leading characters compared by the content-prefix fallback.
pub const CONTENT_PREFIX_CHARS: usize = 50;

/// What kind of content a fragment holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentType {
    #[default]
    Text,
    Code,
    Data,
    Metadata,
    Decision,
}

/// An atomic piece of context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    /// Stable, opaque identifier.
    #[serde(rename = "fragment_id", alias = "id", default = "new_fragment_id")]
    pub id: String,

    /// Text or any structured JSON value.
    pub content: serde_json::Value,

    #[serde(default)]
    pub fragment_type: FragmentType,

    /// Embedding vector, when one has been computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// Weight in [0, 1] used by importance pruning.
    #[serde(default = "default_importance")]
    pub importance_score: f32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn new_fragment_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_importance() -> f32 {
    1.0
}

impl Fragment {
    /// Create a text fragment with a fresh id.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            id: new_fragment_id(),
            content: serde_json::Value::String(content.into()),
            fragment_type: FragmentType::Text,
            embedding: None,
            importance_score: default_importance(),
            tags: Vec::new(),
            metadata: serde_json::Map::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_importance(mut self, score: f32) -> Self {
        self.importance_score = score;
        self
    }

    pub fn with_type(mut self, fragment_type: FragmentType) -> Self {
        self.fragment_type = fragment_type;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// The content as text: strings verbatim, anything else as compact JSON.
    pub fn text_content(&self) -> Cow<'_, str> {
        match &self.content {
            serde_json::Value::String(s) => Cow::Borrowed(s.as_str()),
            other => Cow::Owned(other.to_string()),
        }
    }

    /// The first [`CONTENT_PREFIX_CHARS`] characters of the text content.
    pub fn content_prefix(&self) -> String {
        self.text_content()
            .chars()
            .take(CONTENT_PREFIX_CHARS)
            .collect()
    }

    pub fn has_embedding(&self) -> bool {
        self.embedding.is_some()
    }
}

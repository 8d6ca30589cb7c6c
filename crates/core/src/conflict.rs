//! Pairwise conflict detection between a candidate fragment and existing ones.
//!
//! Conflicts are advisory. The caller decides whether a match blocks the
//! candidate or is only recorded.

use crate::error::SimilarityError;
use crate::fragment::Fragment;
use crate::similarity::cosine_similarity;
use serde::{Deserialize, Serialize};

/// How a conflict was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    /// Cosine similarity of the two embeddings.
    Embedding,
    /// Approximation used when an embedding is missing: the first
    /// [`CONTENT_PREFIX_CHARS`](crate::fragment::CONTENT_PREFIX_CHARS)
    /// characters are equal. Not a semantic judgment.
    ContentPrefix,
}

/// A single existing fragment flagged against a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictMatch {
    pub candidate_id: String,
    pub existing_id: String,
    pub similarity: f64,
    pub method: MatchMethod,
}

/// Score one pair. `None` means the pair could not be compared.
///
/// A content-prefix match scores 1.0 so that it is still subject to the
/// threshold; a prefix mismatch is not evidence of anything and yields `None`.
fn score_pair(
    candidate: &Fragment,
    existing: &Fragment,
) -> Result<Option<(f64, MatchMethod)>, SimilarityError> {
    match (&candidate.embedding, &existing.embedding) {
        (Some(a), Some(b)) => Ok(Some((cosine_similarity(a, b)?, MatchMethod::Embedding))),
        _ => {
            if candidate.content_prefix() == existing.content_prefix() {
                Ok(Some((1.0, MatchMethod::ContentPrefix)))
            } else {
                Ok(None)
            }
        }
    }
}

/// Every existing fragment whose similarity to `candidate` is `>= threshold`,
/// in the order of `existing`.
pub fn find_conflicts(
    candidate: &Fragment,
    existing: &[Fragment],
    threshold: f64,
) -> Result<Vec<ConflictMatch>, SimilarityError> {
    let mut matches = Vec::new();
    for other in existing {
        if let Some((similarity, method)) = score_pair(candidate, other)? {
            if similarity >= threshold {
                matches.push(ConflictMatch {
                    candidate_id: candidate.id.clone(),
                    existing_id: other.id.clone(),
                    similarity,
                    method,
                });
            }
        }
    }
    Ok(matches)
}

/// Identifiers of the existing fragments conflicting with `candidate`.
///
/// Duplicate ids in `existing` are reported once.
pub fn detect_conflicts(
    candidate: &Fragment,
    existing: &[Fragment],
    threshold: f64,
) -> Result<Vec<String>, SimilarityError> {
    let mut ids: Vec<String> = Vec::new();
    for m in find_conflicts(candidate, existing, threshold)? {
        if !ids.contains(&m.existing_id) {
            ids.push(m.existing_id);
        }
    }
    Ok(ids)
}

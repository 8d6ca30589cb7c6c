//! Combining the fragments of several packets into one list.

use crate::conflict::find_conflicts;
use crate::error::SimilarityError;
use crate::fragment::Fragment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Keep everything, skipping repeated fragment ids.
    #[default]
    Union,
    /// Later sources replace earlier fragments with the same id or content prefix.
    Overwrite,
    /// Drop fragments the conflict detector flags against what is already merged.
    SemanticSimilarity,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Union => "union",
            Self::Overwrite => "overwrite",
            Self::SemanticSimilarity => "semantic_similarity",
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "union" => Ok(Self::Union),
            "overwrite" => Ok(Self::Overwrite),
            "semantic_similarity" => Ok(Self::SemanticSimilarity),
            other => Err(format!("unknown merge strategy: {other}")),
        }
    }
}

/// What happened to a colliding fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    KeptBoth,
    Overwritten,
    Deduplicated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConflict {
    /// The incoming fragment.
    pub fragment_id: String,
    /// The already-merged fragment it collided with.
    pub conflicting_with: String,
    pub resolution: Resolution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub fragments: Vec<Fragment>,
    pub conflicts: Vec<MergeConflict>,
}

/// Merge fragment lists in source order.
///
/// `threshold` only applies to [`MergeStrategy::SemanticSimilarity`].
pub fn merge_fragments(
    sources: &[&[Fragment]],
    strategy: MergeStrategy,
    threshold: f64,
) -> Result<MergeOutcome, SimilarityError> {
    let mut out = MergeOutcome::default();

    for fragment in sources.iter().flat_map(|s| s.iter()) {
        match strategy {
            MergeStrategy::Union => merge_union(&mut out, fragment),
            MergeStrategy::Overwrite => merge_overwrite(&mut out, fragment),
            MergeStrategy::SemanticSimilarity => {
                merge_semantic(&mut out, fragment, threshold)?
            }
        }
    }

    Ok(out)
}

fn merge_union(out: &mut MergeOutcome, fragment: &Fragment) {
    if out.fragments.iter().any(|f| f.id == fragment.id) {
        return;
    }
    let prefix = fragment.content_prefix();
    if let Some(existing) = out.fragments.iter().find(|f| f.content_prefix() == prefix) {
        out.conflicts.push(MergeConflict {
            fragment_id: fragment.id.clone(),
            conflicting_with: existing.id.clone(),
            resolution: Resolution::KeptBoth,
            similarity: None,
        });
    }
    out.fragments.push(fragment.clone());
}

fn merge_overwrite(out: &mut MergeOutcome, fragment: &Fragment) {
    let prefix = fragment.content_prefix();
    let position = out
        .fragments
        .iter()
        .position(|f| f.id == fragment.id)
        .or_else(|| {
            out.fragments
                .iter()
                .position(|f| f.content_prefix() == prefix)
        });

    match position {
        Some(pos) => {
            out.conflicts.push(MergeConflict {
                fragment_id: fragment.id.clone(),
                conflicting_with: out.fragments[pos].id.clone(),
                resolution: Resolution::Overwritten,
                similarity: None,
            });
            out.fragments[pos] = fragment.clone();
        }
        None => out.fragments.push(fragment.clone()),
    }
}

fn merge_semantic(
    out: &mut MergeOutcome,
    fragment: &Fragment,
    threshold: f64,
) -> Result<(), SimilarityError> {
    if out.fragments.iter().any(|f| f.id == fragment.id) {
        return Ok(());
    }

    let matches = find_conflicts(fragment, &out.fragments, threshold)?;
    let best = matches.into_iter().max_by(|a, b| {
        a.similarity
            .partial_cmp(&b.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    match best {
        Some(m) => out.conflicts.push(MergeConflict {
            fragment_id: fragment.id.clone(),
            conflicting_with: m.existing_id,
            resolution: Resolution::Deduplicated,
            similarity: Some(m.similarity),
        }),
        None => out.fragments.push(fragment.clone()),
    }
    Ok(())
}

/// Count of conflicts per resolution, for logging and event payloads.
pub fn resolution_counts(conflicts: &[MergeConflict]) -> HashMap<Resolution, usize> {
    let mut counts = HashMap::new();
    for c in conflicts {
        *counts.entry(c.resolution).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(fragments: &[Fragment]) -> Vec<&str> {
        fragments.iter().map(|f| f.id.as_str()).collect()
    }

    #[test]
    fn union_concatenates_and_skips_repeated_ids() {
        let a = vec![Fragment::text("one").with_id("1"), Fragment::text("two").with_id("2")];
        let b = vec![Fragment::text("two").with_id("2"), Fragment::text("three").with_id("3")];
        let out = merge_fragments(&[a.as_slice(), b.as_slice()], MergeStrategy::Union, 0.9).unwrap();
        assert_eq!(ids(&out.fragments), vec!["1", "2", "3"]);
        assert!(out.conflicts.is_empty());
    }

    #[test]
    fn union_reports_prefix_collisions_but_keeps_both() {
        let a = vec![Fragment::text("The budget is $2000").with_id("a")];
        let b = vec![Fragment::text("The budget is $2000").with_id("b")];
        let out = merge_fragments(&[a.as_slice(), b.as_slice()], MergeStrategy::Union, 0.9).unwrap();
        assert_eq!(ids(&out.fragments), vec!["a", "b"]);
        assert_eq!(out.conflicts.len(), 1);
        assert_eq!(out.conflicts[0].resolution, Resolution::KeptBoth);
        assert_eq!(out.conflicts[0].conflicting_with, "a");
    }

    #[test]
    fn overwrite_replaces_in_place() {
        let a = vec![
            Fragment::text("deadline friday").with_id("a"),
            Fragment::text("owner: sam").with_id("o"),
        ];
        let mut replacement = Fragment::text("deadline friday").with_id("b");
        replacement.importance_score = 0.3;
        let b = vec![replacement];

        let out = merge_fragments(&[a.as_slice(), b.as_slice()], MergeStrategy::Overwrite, 0.9).unwrap();
        assert_eq!(ids(&out.fragments), vec!["b", "o"]);
        assert_eq!(out.fragments[0].importance_score, 0.3);
        assert_eq!(out.conflicts[0].resolution, Resolution::Overwritten);
    }

    #[test]
    fn semantic_drops_near_duplicates() {
        let a = vec![Fragment::text("x").with_id("a").with_embedding(vec![1.0, 0.0])];
        let b = vec![
            Fragment::text("y").with_id("b").with_embedding(vec![0.99, 0.05]),
            Fragment::text("z").with_id("c").with_embedding(vec![0.0, 1.0]),
        ];
        let out = merge_fragments(&[a.as_slice(), b.as_slice()], MergeStrategy::SemanticSimilarity, 0.9).unwrap();
        assert_eq!(ids(&out.fragments), vec!["a", "c"]);
        assert_eq!(out.conflicts.len(), 1);
        assert_eq!(out.conflicts[0].resolution, Resolution::Deduplicated);
        assert!(out.conflicts[0].similarity.unwrap() > 0.9);

        let counts = resolution_counts(&out.conflicts);
        assert_eq!(counts[&Resolution::Deduplicated], 1);
    }

    #[test]
    fn strategy_wire_names() {
        let s: MergeStrategy = serde_json::from_str(r#""semantic_similarity""#).unwrap();
        assert_eq!(s, MergeStrategy::SemanticSimilarity);
        assert_eq!(MergeStrategy::default().to_string(), "union");
    }
}

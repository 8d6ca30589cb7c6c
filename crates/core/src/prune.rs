//! Pruning strategies that cut a fragment list down to a budget.

use crate::diversity::select_diverse_indices;
use crate::error::SimilarityError;
use crate::fragment::Fragment;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruningStrategy {
    /// Keep the newest fragments by `created_at`.
    Recency,
    /// Greedy max-min diversity over embeddings.
    SemanticDiversity,
    /// Keep the highest `importance_score`.
    #[serde(alias = "importance_based")]
    Importance,
    /// Keep the first fragments in packet order.
    SizeLimit,
}

impl PruningStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recency => "recency",
            Self::SemanticDiversity => "semantic_diversity",
            Self::Importance => "importance",
            Self::SizeLimit => "size_limit",
        }
    }
}

impl fmt::Display for PruningStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PruningStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recency" => Ok(Self::Recency),
            "semantic_diversity" => Ok(Self::SemanticDiversity),
            "importance" | "importance_based" => Ok(Self::Importance),
            "size_limit" => Ok(Self::SizeLimit),
            other => Err(format!("unknown pruning strategy: {other}")),
        }
    }
}

/// Reduce `fragments` to at most `budget` items.
///
/// At or under budget the input is returned unchanged. Recency and
/// importance keep the survivors in their original relative order; semantic
/// diversity returns them in selection order.
pub fn prune_fragments(
    fragments: &[Fragment],
    strategy: PruningStrategy,
    budget: usize,
) -> Result<Vec<Fragment>, SimilarityError> {
    if fragments.len() <= budget {
        return Ok(fragments.to_vec());
    }

    let kept: Vec<usize> = match strategy {
        PruningStrategy::SizeLimit => (0..budget).collect(),
        PruningStrategy::Recency => {
            let mut order: Vec<usize> = (0..fragments.len()).collect();
            // Newest first; for equal timestamps the later insertion wins.
            order.sort_by(|&a, &b| {
                fragments[b]
                    .created_at
                    .cmp(&fragments[a].created_at)
                    .then(b.cmp(&a))
            });
            order.truncate(budget);
            order.sort_unstable();
            order
        }
        PruningStrategy::Importance => {
            let mut order: Vec<usize> = (0..fragments.len()).collect();
            order.sort_by(|&a, &b| {
                fragments[b]
                    .importance_score
                    .partial_cmp(&fragments[a].importance_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.cmp(&b))
            });
            order.truncate(budget);
            order.sort_unstable();
            order
        }
        PruningStrategy::SemanticDiversity => select_diverse_indices(fragments, budget)?,
    };

    Ok(kept.into_iter().map(|i| fragments[i].clone()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn ids(fragments: &[Fragment]) -> Vec<&str> {
        fragments.iter().map(|f| f.id.as_str()).collect()
    }

    fn timeline() -> Vec<Fragment> {
        let base = Utc::now();
        vec![
            Fragment::text("a").with_id("a").with_created_at(base - Duration::minutes(30)),
            Fragment::text("b").with_id("b").with_created_at(base),
            Fragment::text("c").with_id("c").with_created_at(base - Duration::minutes(10)),
            Fragment::text("d").with_id("d").with_created_at(base - Duration::minutes(20)),
        ]
    }

    #[test]
    fn under_budget_is_untouched() {
        let input = timeline();
        let out = prune_fragments(&input, PruningStrategy::Recency, 10).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn recency_keeps_newest_in_packet_order() {
        let out = prune_fragments(&timeline(), PruningStrategy::Recency, 2).unwrap();
        assert_eq!(ids(&out), vec!["b", "c"]);
    }

    #[test]
    fn recency_breaks_timestamp_ties_by_insertion() {
        let now = Utc::now();
        let input: Vec<Fragment> = ["x", "y", "z"]
            .iter()
            .map(|id| Fragment::text(*id).with_id(*id).with_created_at(now))
            .collect();
        let out = prune_fragments(&input, PruningStrategy::Recency, 2).unwrap();
        assert_eq!(ids(&out), vec!["y", "z"]);
    }

    #[test]
    fn importance_keeps_highest_scores() {
        let input = vec![
            Fragment::text("a").with_id("a").with_importance(0.2),
            Fragment::text("b").with_id("b").with_importance(0.9),
            Fragment::text("c").with_id("c").with_importance(0.5),
            Fragment::text("d").with_id("d").with_importance(0.9),
        ];
        let out = prune_fragments(&input, PruningStrategy::Importance, 2).unwrap();
        assert_eq!(ids(&out), vec!["b", "d"]);
    }

    #[test]
    fn size_limit_truncates() {
        let out = prune_fragments(&timeline(), PruningStrategy::SizeLimit, 3).unwrap();
        assert_eq!(ids(&out), vec!["a", "b", "c"]);
    }

    #[test]
    fn diversity_uses_selection_order() {
        let input = vec![
            Fragment::text("a").with_id("a").with_embedding(vec![1.0, 0.0]),
            Fragment::text("b").with_id("b").with_embedding(vec![1.0, 0.0]),
            Fragment::text("c").with_id("c").with_embedding(vec![0.0, 1.0]),
        ];
        let out = prune_fragments(&input, PruningStrategy::SemanticDiversity, 2).unwrap();
        assert_eq!(ids(&out), vec!["a", "c"]);
    }

    #[test]
    fn zero_budget_empties_the_packet() {
        for strategy in [
            PruningStrategy::Recency,
            PruningStrategy::Importance,
            PruningStrategy::SizeLimit,
            PruningStrategy::SemanticDiversity,
        ] {
            assert!(prune_fragments(&timeline(), strategy, 0).unwrap().is_empty());
        }
    }

    #[test]
    fn strategy_parses_legacy_alias() {
        let s: PruningStrategy = serde_json::from_str(r#""importance_based""#).unwrap();
        assert_eq!(s, PruningStrategy::Importance);
        assert_eq!("semantic_diversity".parse::<PruningStrategy>().unwrap(), PruningStrategy::SemanticDiversity);
        assert!("random".parse::<PruningStrategy>().is_err());
    }
}

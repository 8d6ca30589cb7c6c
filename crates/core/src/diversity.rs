//! Greedy max-min diversity selection.
//!
//! Picking the `k` most mutually dissimilar fragments is NP-hard. This is
//! the usual greedy approximation: seed with the first fragment, then
//! repeatedly add the candidate whose highest similarity to anything already
//! selected is lowest. Cost is O(k·n) similarity evaluations per call; the
//! result is locally greedy and carries no optimality guarantee.

use crate::error::SimilarityError;
use crate::fragment::Fragment;
use crate::similarity::cosine_similarity;

/// Indices into `fragments` of the selected subset, in selection order.
///
/// Selection stops once `k` items are picked. When no unselected fragment
/// has an embedding, the rest are appended in input order until `k` is
/// reached. Ties go to the earlier fragment in the input.
pub fn select_diverse_indices(
    fragments: &[Fragment],
    k: usize,
) -> Result<Vec<usize>, SimilarityError> {
    let target = k.min(fragments.len());
    if target == 0 {
        return Ok(Vec::new());
    }

    let mut selected = Vec::with_capacity(target);
    let mut taken = vec![false; fragments.len()];
    selected.push(0);
    taken[0] = true;

    while selected.len() < target {
        let mut best: Option<(usize, f64)> = None;

        for (idx, candidate) in fragments.iter().enumerate() {
            if taken[idx] {
                continue;
            }
            let Some(embedding) = candidate.embedding.as_deref() else {
                continue;
            };

            // Selected fragments without embeddings carry no signal, so a
            // candidate with nothing to compare against scores -inf.
            let mut max_sim = f64::NEG_INFINITY;
            for &sel in &selected {
                if let Some(other) = fragments[sel].embedding.as_deref() {
                    max_sim = max_sim.max(cosine_similarity(embedding, other)?);
                }
            }

            match best {
                Some((_, score)) if max_sim >= score => {}
                _ => best = Some((idx, max_sim)),
            }
        }

        match best {
            Some((idx, _)) => {
                selected.push(idx);
                taken[idx] = true;
            }
            None => break,
        }
    }

    for (idx, was_taken) in taken.iter().enumerate() {
        if selected.len() >= target {
            break;
        }
        if !was_taken {
            selected.push(idx);
        }
    }

    Ok(selected)
}

/// The selected fragments themselves, seed first, then in selection order
/// (not input order).
pub fn select_diverse_subset(
    fragments: &[Fragment],
    k: usize,
) -> Result<Vec<Fragment>, SimilarityError> {
    Ok(select_diverse_indices(fragments, k)?
        .into_iter()
        .map(|idx| fragments[idx].clone())
        .collect())
}

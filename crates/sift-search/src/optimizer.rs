//! Token-budget context assembly.
//!
//! The top-N hits are always represented — verbatim when they fit,
//! token-truncated highest-score-first when they alone exceed the budget.
//! Whatever budget remains is filled greedily by blended
//! relevance/importance score, preferring paths not yet represented, with
//! a second pass allowing repeats if budget is still unused. The output
//! never exceeds `max_tokens` in total.

use std::collections::HashSet;

use sift_core::config::OptimizerConfig;
use sift_core::{SearchHit, token};

/// Fit `hits` (ranked descending) into `max_tokens`.
#[must_use]
pub fn optimize(
    hits: &[SearchHit],
    max_tokens: usize,
    preserve_top_n: usize,
    config: &OptimizerConfig,
) -> Vec<SearchHit> {
    if hits.is_empty() || max_tokens == 0 {
        return Vec::new();
    }

    let mut remaining = max_tokens;
    let mut selected: Vec<(usize, SearchHit)> = Vec::new();
    let mut seen_paths: HashSet<String> = HashSet::new();

    // preserved head: verbatim while it fits, truncated once it does not
    let n = preserve_top_n.min(hits.len());
    for (i, hit) in hits.iter().take(n).enumerate() {
        if remaining == 0 {
            break;
        }
        if let Some(taken) = take_fitting(hit, remaining, 1) {
            remaining -= token::count(&taken.chunk.content);
            seen_paths.insert(taken.chunk.path.clone());
            selected.push((i, taken));
        }
    }

    // greedy fill by blended score, diverse paths first
    let mut order: Vec<usize> = (n..hits.len()).collect();
    order.sort_by(|&a, &b| {
        blended(&hits[b], config)
            .partial_cmp(&blended(&hits[a], config))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut taken_idx: HashSet<usize> = selected.iter().map(|(i, _)| *i).collect();
    for pass in 0..2 {
        for &i in &order {
            if remaining == 0 {
                break;
            }
            if taken_idx.contains(&i) {
                continue;
            }
            let hit = &hits[i];
            // first pass sticks to unrepresented paths; second allows repeats
            if pass == 0 && seen_paths.contains(&hit.chunk.path) {
                continue;
            }
            if let Some(taken) = take_fitting(hit, remaining, config.min_chunk_tokens) {
                remaining -= token::count(&taken.chunk.content);
                seen_paths.insert(taken.chunk.path.clone());
                taken_idx.insert(i);
                selected.push((i, taken));
            }
        }
    }

    // original rank order out
    selected.sort_by_key(|(i, _)| *i);
    selected.into_iter().map(|(_, hit)| hit).collect()
}

fn blended(hit: &SearchHit, config: &OptimizerConfig) -> f32 {
    config.relevance_weight * hit.score
        + config.importance_weight * hit.chunk.metadata.importance_score
}

/// Take `hit` whole if it fits in `budget`, truncated to `budget` if that
/// still leaves at least `min_tokens`, otherwise not at all.
fn take_fitting(hit: &SearchHit, budget: usize, min_tokens: usize) -> Option<SearchHit> {
    let tokens = token::count(&hit.chunk.content);
    if tokens <= budget {
        return Some(hit.clone());
    }
    if budget < min_tokens {
        return None;
    }
    let cut = token::truncate(&hit.chunk.content, budget)?;
    let mut taken = hit.clone();
    taken.chunk.content = cut;
    taken.chunk.metadata.truncated = true;
    Some(taken)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::{Chunk, ChunkKind, ChunkMetadata, Ordinal};

    fn hit_with(path: &str, major: u32, score: f32, tokens: usize, importance: f32) -> SearchHit {
        let content = (0..tokens).map(|i| format!("t{i}")).collect::<Vec<_>>().join(" ");
        let metadata = ChunkMetadata {
            importance_score: importance,
            ..ChunkMetadata::default()
        };
        SearchHit {
            chunk: Chunk::new(path, Ordinal::new(major), ChunkKind::Code, content, metadata),
            score,
        }
    }

    fn total_tokens(hits: &[SearchHit]) -> usize {
        hits.iter().map(|h| token::count(&h.chunk.content)).sum()
    }

    fn config() -> OptimizerConfig {
        OptimizerConfig {
            relevance_weight: 0.7,
            importance_weight: 0.3,
            preserve_top_n: 3,
            min_chunk_tokens: 10,
        }
    }

    #[test]
    fn preserved_hits_kept_verbatim_when_they_fit() {
        let hits = vec![
            hit_with("a.rs", 0, 0.9, 50, 0.5),
            hit_with("b.rs", 0, 0.8, 50, 0.5),
        ];
        let out = optimize(&hits, 200, 2, &config());
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|h| !h.chunk.metadata.truncated));
        assert_eq!(out[0].chunk.content, hits[0].chunk.content);
    }

    #[test]
    fn oversized_preserved_head_truncated_highest_score_first() {
        let hits = vec![
            hit_with("a.rs", 0, 0.9, 80, 0.5),
            hit_with("b.rs", 0, 0.8, 80, 0.5),
        ];
        let out = optimize(&hits, 100, 2, &config());
        assert!(total_tokens(&out) <= 100);
        // first preserved fits whole; second is cut to the residual
        assert!(!out[0].chunk.metadata.truncated);
        assert!(out[1].chunk.metadata.truncated);
        assert!(out[1].chunk.content.ends_with(token::TRUNCATION_MARKER));
    }

    #[test]
    fn budget_invariant_holds() {
        let hits: Vec<SearchHit> = (0..12)
            .map(|i| hit_with("f.rs", i, 1.0 - 0.05 * f32::from(u8::try_from(i).unwrap()), 37, 0.4))
            .collect();
        for budget in [0, 10, 50, 100, 150, 1000] {
            let out = optimize(&hits, budget, 3, &config());
            assert!(total_tokens(&out) <= budget, "budget {budget} exceeded");
        }
    }

    #[test]
    fn fill_prefers_unseen_paths() {
        // preserved takes a.rs; fill should pick b.rs over another a.rs hit
        // with equal blended score
        let hits = vec![
            hit_with("a.rs", 0, 0.9, 20, 0.5),
            hit_with("a.rs", 1, 0.8, 20, 0.5),
            hit_with("b.rs", 0, 0.8, 20, 0.5),
        ];
        let out = optimize(&hits, 40, 1, &config());
        let paths: Vec<&str> = out.iter().map(|h| h.chunk.path.as_str()).collect();
        assert_eq!(paths, vec!["a.rs", "b.rs"]);
    }

    #[test]
    fn second_pass_allows_repeats_when_budget_left() {
        let hits = vec![
            hit_with("a.rs", 0, 0.9, 20, 0.5),
            hit_with("a.rs", 1, 0.8, 20, 0.5),
            hit_with("b.rs", 0, 0.8, 20, 0.5),
        ];
        let out = optimize(&hits, 100, 1, &config());
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn overflowing_fill_hit_truncated_when_residual_useful() {
        let hits = vec![
            hit_with("a.rs", 0, 0.9, 30, 0.5),
            hit_with("b.rs", 0, 0.8, 50, 0.5),
        ];
        // residual after a.rs is 20 >= min_chunk_tokens(10) -> b.rs truncated
        let out = optimize(&hits, 50, 1, &config());
        assert_eq!(out.len(), 2);
        assert!(out[1].chunk.metadata.truncated);
        assert!(total_tokens(&out) <= 50);
    }

    #[test]
    fn overflowing_fill_hit_dropped_when_residual_tiny() {
        let hits = vec![
            hit_with("a.rs", 0, 0.9, 30, 0.5),
            hit_with("b.rs", 0, 0.8, 50, 0.5),
        ];
        // residual after a.rs is 5 < min_chunk_tokens(10) -> b.rs dropped
        let out = optimize(&hits, 35, 1, &config());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].chunk.path, "a.rs");
    }

    #[test]
    fn importance_breaks_relevance_ties_in_fill() {
        let hits = vec![
            hit_with("head.rs", 0, 0.9, 10, 0.5),
            hit_with("plain.rs", 0, 0.5, 10, 0.1),
            hit_with("vital.rs", 0, 0.5, 10, 0.9),
        ];
        // budget only fits the head plus one more
        let out = optimize(&hits, 20, 1, &config());
        assert_eq!(out.len(), 2);
        assert!(out.iter().any(|h| h.chunk.path == "vital.rs"));
    }

    #[test]
    fn empty_and_zero_budget() {
        assert!(optimize(&[], 100, 3, &config()).is_empty());
        let hits = vec![hit_with("a.rs", 0, 0.9, 10, 0.5)];
        assert!(optimize(&hits, 0, 3, &config()).is_empty());
    }

    #[test]
    fn output_preserves_rank_order() {
        let hits = vec![
            hit_with("a.rs", 0, 0.9, 10, 0.1),
            hit_with("b.rs", 0, 0.8, 10, 0.9),
            hit_with("c.rs", 0, 0.7, 10, 0.5),
        ];
        let out = optimize(&hits, 100, 1, &config());
        let paths: Vec<&str> = out.iter().map(|h| h.chunk.path.as_str()).collect();
        assert_eq!(paths, vec!["a.rs", "b.rs", "c.rs"]);
    }
}

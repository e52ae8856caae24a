//! Optional rerank passes applied after the hybrid merge.
//!
//! Every pass is a pure list-in, list-out transform that must preserve the
//! no-duplicate-key invariant: reorder and rescore, never add.

use std::collections::HashMap;

use sift_core::SearchHit;

pub trait Rerank: Send + Sync {
    fn name(&self) -> &'static str;

    /// Reorder `hits`. The returned list must contain the same chunks.
    fn rerank(&self, hits: Vec<SearchHit>) -> Vec<SearchHit>;
}

/// Penalizes repeated source paths so one hot file cannot monopolize the
/// result list.
#[derive(Debug, Clone, Copy)]
pub struct DiversityRerank {
    /// Multiplier applied once per prior hit from the same path.
    pub path_penalty: f32,
}

impl Default for DiversityRerank {
    fn default() -> Self {
        Self { path_penalty: 0.8 }
    }
}

impl Rerank for DiversityRerank {
    fn name(&self) -> &'static str {
        "diversity"
    }

    fn rerank(&self, hits: Vec<SearchHit>) -> Vec<SearchHit> {
        let mut seen: HashMap<String, u32> = HashMap::new();
        let mut rescored: Vec<SearchHit> = hits
            .into_iter()
            .map(|mut hit| {
                let repeats = seen.entry(hit.chunk.path.clone()).or_insert(0);
                hit.score *= self.path_penalty.powi(i32::try_from(*repeats).unwrap_or(i32::MAX));
                *repeats += 1;
                hit
            })
            .collect();
        rescored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        rescored
    }
}

/// Boosts hits whose content contains the given query terms, a cheap
/// stand-in for a cross-encoder relevance pass.
#[derive(Debug, Clone)]
pub struct TermBoostRerank {
    terms: Vec<String>,
    boost: f32,
}

impl TermBoostRerank {
    #[must_use]
    pub fn new(query: &str, boost: f32) -> Self {
        Self {
            terms: query
                .split_whitespace()
                .map(str::to_lowercase)
                .filter(|t| t.len() >= 3)
                .collect(),
            boost,
        }
    }
}

impl Rerank for TermBoostRerank {
    fn name(&self) -> &'static str {
        "term-boost"
    }

    fn rerank(&self, hits: Vec<SearchHit>) -> Vec<SearchHit> {
        let mut rescored: Vec<SearchHit> = hits
            .into_iter()
            .map(|mut hit| {
                let content = hit.chunk.content.to_lowercase();
                let matched = self.terms.iter().filter(|t| content.contains(*t)).count();
                if matched > 0 {
                    #[expect(clippy::cast_precision_loss)]
                    let factor = 1.0 + self.boost * matched as f32;
                    hit.score *= factor;
                }
                hit
            })
            .collect();
        rescored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        rescored
    }
}

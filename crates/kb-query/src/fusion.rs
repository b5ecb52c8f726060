//! Weighted min-max fusion of lexical and semantic results.

use std::collections::HashMap;

use kb_core::SearchResult;

/// Weights applied to the normalized scores of each result set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridWeights {
    /// Weight of the normalized BM25 score.
    pub bm25: f32,

    /// Weight of the normalized semantic score.
    pub semantic: f32,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            bm25: 0.3,
            semantic: 0.7,
        }
    }
}

/// Minimum and divisor for min-max scaling.
///
/// The divisor is 1 when every value is equal, so equal inputs scale to 0.
fn min_and_range(values: impl Iterator<Item = f32> + Clone) -> (f32, f32) {
    let min = values.clone().fold(f32::INFINITY, f32::min);
    let max = values.fold(f32::NEG_INFINITY, f32::max);
    let range = if max > min { max - min } else { 1.0 };
    (min, range)
}

/// Scale BM25 scores to [0, 1], best match at 1.
pub fn normalize_bm25(results: &[SearchResult]) -> Vec<f32> {
    let scores = results.iter().map(|r| r.bm25_score.unwrap_or(0.0));
    let (min, range) = min_and_range(scores.clone());
    scores.map(|s| (s - min) / range).collect()
}

/// Scale cosine distances to [0, 1] similarities, closest at 1.
pub fn normalize_distances(results: &[SearchResult]) -> Vec<f32> {
    let distances = results.iter().map(|r| r.distance.unwrap_or(0.0));
    let (min, range) = min_and_range(distances.clone());
    distances.map(|d| 1.0 - (d - min) / range).collect()
}

/// Merge lexical and semantic results by chunk id.
///
/// Each side is normalized on its own, a chunk missing from one side scores 0
/// there, and `final_score = bm25 * w_bm25 + semantic * w_semantic`. Lexical
/// hits come first in merge order, so the stable sort breaks ties in their
/// favour and then by original rank.
pub fn weighted_fusion(
    lexical: Vec<SearchResult>,
    semantic: Vec<SearchResult>,
    weights: HybridWeights,
    top_k: usize,
) -> Vec<SearchResult> {
    let bm25_normalized = normalize_bm25(&lexical);
    let semantic_normalized = normalize_distances(&semantic);

    let mut merged: Vec<SearchResult> = Vec::with_capacity(lexical.len() + semantic.len());
    let mut positions: HashMap<i64, usize> = HashMap::new();

    for (mut result, score) in lexical.into_iter().zip(bm25_normalized) {
        result.bm25_score = Some(score);
        result.semantic_score = Some(0.0);
        positions.insert(result.chunk.id, merged.len());
        merged.push(result);
    }

    for (result, score) in semantic.into_iter().zip(semantic_normalized) {
        match positions.get(&result.chunk.id) {
            Some(&index) => {
                let existing = &mut merged[index];
                existing.semantic_score = Some(score);
                existing.distance = result.distance;
            }
            None => {
                let mut result = result;
                result.bm25_score = Some(0.0);
                result.semantic_score = Some(score);
                positions.insert(result.chunk.id, merged.len());
                merged.push(result);
            }
        }
    }

    for result in &mut merged {
        result.final_score = weights.bm25 * result.bm25_score.unwrap_or(0.0)
            + weights.semantic * result.semantic_score.unwrap_or(0.0);
    }

    merged.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
    merged.truncate(top_k);

    merged
}

//! Search result type, cosine similarity, and reciprocal rank fusion.

use std::collections::HashMap;

/// A scored hit from the durable index.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub chunk_id: String,
    pub path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub score: f32,
    pub text: String,
}

/// Cosine similarity between two vectors. Mismatched or empty vectors score
/// zero rather than erroring.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 { 0.0 } else { dot / denom }
}

/// Fuse two ranked lists with weighted reciprocal rank fusion.
///
/// Each list contributes `weight / (k + rank + 1)` per document (rank is the
/// 0-based position in that list); a document in both lists sums both
/// contributions, so agreement between the lists outranks a solo placement.
/// Fusion is rank-based: the input scores only determine order, then are
/// replaced by the fused score.
pub fn rrf_fuse(
    keyword: &[SearchResult],
    vector: &[SearchResult],
    keyword_weight: f32,
    vector_weight: f32,
    k: f32,
) -> Vec<SearchResult> {
    let mut fused: HashMap<String, (f32, SearchResult)> = HashMap::new();

    for (list, weight) in [(keyword, keyword_weight), (vector, vector_weight)] {
        for (rank, result) in list.iter().enumerate() {
            let contribution = weight / (k + rank as f32 + 1.0);
            let entry = fused
                .entry(result.chunk_id.clone())
                .or_insert((0.0, result.clone()));
            entry.0 += contribution;
        }
    }

    let mut results: Vec<SearchResult> = fused
        .into_values()
        .map(|(score, mut result)| {
            result.score = score;
            result
        })
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, score: f32) -> SearchResult {
        SearchResult {
            chunk_id: id.into(),
            path: "test.md".into(),
            start_line: 1,
            end_line: 5,
            score,
            text: String::new(),
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_doc_in_both_lists_beats_single_list_leaders() {
        let keyword = vec![result("both", 0.9), result("kw_only", 0.8)];
        let vector = vec![result("both", 0.95), result("vec_only", 0.9)];

        let fused = rrf_fuse(&keyword, &vector, 0.7, 0.3, 60.0);
        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].chunk_id, "both");
    }

    #[test]
    fn test_fused_scores_sum_contributions() {
        let keyword = vec![result("a", 1.0)];
        let vector = vec![result("b", 1.0), result("a", 0.5)];

        let fused = rrf_fuse(&keyword, &vector, 0.7, 0.3, 60.0);
        let a = fused.iter().find(|r| r.chunk_id == "a").unwrap();
        let expected = 0.7 / 61.0 + 0.3 / 62.0;
        assert!((a.score - expected).abs() < 1e-6);

        let b = fused.iter().find(|r| r.chunk_id == "b").unwrap();
        assert!((b.score - 0.3 / 61.0).abs() < 1e-6);
    }

    #[test]
    fn test_keyword_weight_dominates_vector_at_equal_rank() {
        let keyword = vec![result("kw", 1.0)];
        let vector = vec![result("vec", 1.0)];

        let fused = rrf_fuse(&keyword, &vector, 0.7, 0.3, 60.0);
        assert_eq!(fused[0].chunk_id, "kw");
    }

    #[test]
    fn test_empty_inputs() {
        assert!(rrf_fuse(&[], &[], 0.7, 0.3, 60.0).is_empty());
    }
}

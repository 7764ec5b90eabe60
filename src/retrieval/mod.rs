//! Query-time retrieval: turn raw nearest-neighbour hits into relevance-ranked
//! tool results.
//!
//! Distances are converted to a similarity score immediately after the search
//! (`1 / (1 + d)`, higher is better); thresholding and ordering use only that
//! score, so they behave the same whatever metric the index uses.

use crate::embedding::Embedder;
use crate::error::{AppError, Result};
use crate::index::{similarity_from_distance, QueryResult, ToolIndex, ToolRecord};
use std::cmp::Ordering;
use std::sync::Arc;

pub struct Retriever {
    index: Arc<ToolIndex>,
    /// Minimum number of nearest-neighbour candidates fetched per query.
    candidates: usize,
}

impl Retriever {
    pub fn new(index: Arc<ToolIndex>, candidates: usize) -> Self {
        Self { index, candidates }
    }

    pub fn index(&self) -> &Arc<ToolIndex> {
        &self.index
    }

    /// Tools relevant to `query`, most relevant first.
    ///
    /// Keeps hits with `similarity_score >= score_threshold`, orders them by
    /// score descending then tool name and server name ascending, and returns at
    /// most `top_k`. No qualifying hit (including an empty index, a blank query
    /// or `top_k == 0`) yields an empty list rather than an error. Index and
    /// embedding failures propagate.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<QueryResult>> {
        let start = std::time::Instant::now();

        if top_k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let embedder: Arc<dyn Embedder> = Arc::clone(self.index.embedder());
        let text = query.to_string();
        let query_vector = tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| AppError::EmbeddingFailure(format!("Embedding task join error: {}", e)))??;

        let index = Arc::clone(&self.index);
        let k = top_k.max(self.candidates);
        let hits = tokio::task::spawn_blocking(move || index.search(&query_vector, k))
            .await
            .map_err(|e| AppError::IndexUnavailable(format!("Search task join error: {}", e)))??;

        let candidates = hits.len();
        let results = rank(hits, top_k, score_threshold);

        tracing::debug!(
            query = %query,
            top_k,
            score_threshold,
            candidates,
            returned = results.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Retrieval completed"
        );
        metrics::histogram!("retrieve_results").record(results.len() as f64);

        Ok(results)
    }
}

/// Convert `(record, distance)` hits into thresholded, ordered, truncated results.
pub fn rank(hits: Vec<(ToolRecord, f32)>, top_k: usize, score_threshold: f32) -> Vec<QueryResult> {
    let mut results: Vec<QueryResult> = hits
        .iter()
        .map(|(record, distance)| QueryResult::from_record(record, similarity_from_distance(*distance)))
        .filter(|result| result.similarity_score >= score_threshold)
        .collect();

    results.sort_by(compare_results);
    results.truncate(top_k);
    results
}

fn compare_results(a: &QueryResult, b: &QueryResult) -> Ordering {
    b.similarity_score
        .total_cmp(&a.similarity_score)
        .then_with(|| a.tool_name.cmp(&b.tool_name))
        .then_with(|| a.server_name.cmp(&b.server_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::index::IndexParams;

    fn hit(name: &str, distance: f32) -> (ToolRecord, f32) {
        (ToolRecord::new(name, "srv", ""), distance)
    }

    #[test]
    fn test_rank_orders_by_score_descending() {
        let results = rank(vec![hit("far", 3.0), hit("near", 0.5), hit("mid", 1.0)], 3, 0.0);
        let names: Vec<_> = results.iter().map(|r| r.tool_name.as_str()).collect();
        assert_eq!(names, vec!["near", "mid", "far"]);
        assert!((results[0].similarity_score - 1.0 / 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_rank_keeps_scores_at_or_above_threshold() {
        // distance 1.0 -> score exactly 0.5
        let results = rank(vec![hit("edge", 1.0), hit("below", 1.5)], 5, 0.5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].tool_name, "edge");
    }

    #[test]
    fn test_rank_ties_break_on_tool_name() {
        let results = rank(vec![hit("zeta", 1.0), hit("alpha", 1.0)], 2, 0.0);
        assert_eq!(results[0].tool_name, "alpha");
        assert_eq!(results[1].tool_name, "zeta");
    }

    #[test]
    fn test_rank_truncates_to_top_k() {
        let hits = (0..10).map(|i| hit(&format!("t{}", i), i as f32)).collect();
        assert_eq!(rank(hits, 4, 0.0).len(), 4);
    }

    #[test]
    fn test_rank_nothing_clears_threshold() {
        assert!(rank(vec![hit("a", 5.0)], 3, 0.9).is_empty());
    }

    #[tokio::test]
    async fn test_blank_query_and_zero_top_k_are_empty() {
        let embedder = Arc::new(HashingEmbedder::new(32).unwrap());
        let index = Arc::new(ToolIndex::in_memory(embedder, IndexParams::default()));
        index.insert(ToolRecord::new("add", "math", "Add numbers")).unwrap();
        index.load().unwrap();
        index.flush().unwrap();

        let retriever = Retriever::new(index, 10);
        assert!(retriever.retrieve("   ", 3, 0.0).await.unwrap().is_empty());
        assert!(retriever.retrieve("add", 0, 0.0).await.unwrap().is_empty());
        assert_eq!(retriever.retrieve("add", 3, 0.0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unloaded_index_error_propagates() {
        let embedder = Arc::new(HashingEmbedder::new(32).unwrap());
        let index = Arc::new(ToolIndex::in_memory(embedder, IndexParams::default()));
        let retriever = Retriever::new(index, 10);

        assert!(matches!(
            retriever.retrieve("add", 3, 0.0).await,
            Err(AppError::IndexNotReady(_))
        ));
    }
}

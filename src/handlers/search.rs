//! Semantic search over the tool index.
//!
//! The query is embedded once, the index returns its nearest candidates, and
//! the retriever thresholds and orders them by similarity score.

use crate::error::{AppError, Result};
use crate::index::QueryResult;
use crate::state::AppState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    /// The natural language query to match against tools
    pub query: String,
    /// Number of results to return (default: `TOP_K`)
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Minimum similarity score (default: `SCORE_THRESHOLD`)
    #[serde(default)]
    pub score_threshold: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<QueryResult>,
}

/// POST /search - Find indexed tools relevant to a natural language query.
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let start_time = std::time::Instant::now();

    if request.query.trim().is_empty() {
        return Err(AppError::ValidationError(
            "Query cannot be empty".to_string(),
        ));
    }

    let top_k = request.top_k.unwrap_or(state.config.top_k);
    if top_k == 0 {
        return Err(AppError::ValidationError(
            "top_k must be at least 1".to_string(),
        ));
    }

    let score_threshold = request
        .score_threshold
        .unwrap_or(state.config.score_threshold);
    if !score_threshold.is_finite() {
        return Err(AppError::ValidationError(
            "score_threshold must be a finite number".to_string(),
        ));
    }

    // 503 if the service stays overloaded past PERMIT_TIMEOUT_MS
    let _permit = state.acquire_permit().await?;

    let results = state
        .retriever
        .retrieve(&request.query, top_k, score_threshold)
        .await?;

    let total_time = start_time.elapsed();
    tracing::info!(
        query = %request.query,
        top_k,
        score_threshold,
        returned = results.len(),
        total_ms = total_time.as_millis() as u64,
        "Search completed"
    );

    metrics::counter!("search_requests_total").increment(1);
    metrics::histogram!("search_latency_ms").record(total_time.as_millis() as f64);

    Ok(Json(SearchResponse { results }))
}

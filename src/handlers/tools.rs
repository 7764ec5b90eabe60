//! Tool index maintenance and catalog filtering.

use crate::catalog::ToolHandle;
use crate::error::{AppError, Result};
use crate::index::{Metadata, ToolRecord};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct InsertToolRequest {
    pub tool_name: String,
    pub server_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Precomputed vector; embedded from `description` when absent
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Serialize)]
pub struct InsertToolResponse {
    pub id: String,
    /// Committed records after the flush
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct RemoveToolResponse {
    pub id: String,
    pub removed: bool,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct FilterRequest {
    pub query: String,
    /// Live catalog to filter; the configured provider is asked when absent
    #[serde(default)]
    pub catalog: Option<Vec<ToolHandle>>,
}

#[derive(Debug, Serialize)]
pub struct FilterResponse {
    pub tools: Vec<ToolHandle>,
}

/// POST /tools - Index (or overwrite) a tool and flush it.
pub async fn insert_tool_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InsertToolRequest>,
) -> Result<Json<InsertToolResponse>> {
    let mut record = ToolRecord::new(request.tool_name, request.server_name, request.description)
        .with_metadata(request.metadata);
    if let Some(embedding) = request.embedding {
        record = record.with_embedding(embedding);
    }
    record.validate()?;

    // Embedding a description uses the same sessions as search
    let _permit = state.acquire_permit().await?;

    // Embedding and snapshot I/O are blocking
    let index = Arc::clone(&state.index);
    let (id, total) = tokio::task::spawn_blocking(move || {
        let id = index.insert(record)?;
        let total = index.flush()?;
        Ok::<_, AppError>((id, total))
    })
    .await
    .map_err(|e| AppError::IndexUnavailable(format!("Insert task join error: {}", e)))??;

    tracing::info!(id = %id, total, "Tool indexed");
    Ok(Json(InsertToolResponse { id, total }))
}

/// DELETE /tools/:id - Remove a tool and flush.
pub async fn remove_tool_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RemoveToolResponse>> {
    let index = Arc::clone(&state.index);
    let target = id.clone();
    let (removed, total) = tokio::task::spawn_blocking(move || {
        let removed = index.remove(&target)?;
        let total = if removed { index.flush()? } else { index.len() };
        Ok::<_, AppError>((removed, total))
    })
    .await
    .map_err(|e| AppError::IndexUnavailable(format!("Remove task join error: {}", e)))??;

    if removed {
        tracing::info!(id = %id, total, "Tool removed");
    } else {
        tracing::debug!(id = %id, "Remove requested for unknown tool");
    }
    Ok(Json(RemoveToolResponse { id, removed, total }))
}

/// POST /tools/filter - Tools from the live catalog that are relevant to the query.
pub async fn filter_tools_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FilterRequest>,
) -> Result<Json<FilterResponse>> {
    if request.query.trim().is_empty() {
        return Err(AppError::ValidationError(
            "Query cannot be empty".to_string(),
        ));
    }

    let _permit = state.acquire_permit().await?;

    let tools = match &request.catalog {
        Some(catalog) => {
            state
                .manager
                .filter_available_tools(&request.query, catalog)
                .await?
        }
        None => state.manager.get_filtered_tools(&request.query).await?,
    };

    Ok(Json(FilterResponse { tools }))
}

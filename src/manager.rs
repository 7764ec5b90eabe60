//! Tool manager: reconciles semantically relevant tools with the tools that
//! are actually available right now.
//!
//! The result is always a subset of the live catalog. A tool that is relevant
//! but whose provider is gone is dropped silently; a tool that is live but not
//! indexed is never surfaced. No relevant tools means no tools (fail closed),
//! never the full catalog.

use crate::catalog::{CatalogProvider, LiveCatalog, ToolHandle};
use crate::error::{AppError, Result};
use crate::index::QueryResult;
use crate::retrieval::Retriever;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

pub struct ToolManager {
    retriever: Arc<Retriever>,
    provider: Arc<dyn CatalogProvider>,
    top_k: usize,
    score_threshold: f32,
    fetch_timeout: Duration,
}

impl ToolManager {
    pub fn new(
        retriever: Arc<Retriever>,
        provider: Arc<dyn CatalogProvider>,
        top_k: usize,
        score_threshold: f32,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            retriever,
            provider,
            top_k,
            score_threshold,
            fetch_timeout,
        }
    }

    pub fn retriever(&self) -> &Arc<Retriever> {
        &self.retriever
    }

    /// Ranked tools relevant to `query` under the manager's top-k and threshold.
    pub async fn get_relevant_tools(&self, query: &str) -> Result<Vec<QueryResult>> {
        let relevant = self
            .retriever
            .retrieve(query, self.top_k, self.score_threshold)
            .await?;

        if relevant.is_empty() {
            tracing::info!(query = %query, "No relevant tools found");
        } else {
            for (rank, tool) in relevant.iter().enumerate() {
                tracing::debug!(
                    rank = rank + 1,
                    tool = %tool.tool_name,
                    server = %tool.server_name,
                    score = tool.similarity_score,
                    "Relevant tool"
                );
            }
        }

        Ok(relevant)
    }

    /// The handles of `catalog` that are relevant to `query`, in catalog order.
    pub async fn filter_available_tools(
        &self,
        query: &str,
        catalog: &[ToolHandle],
    ) -> Result<Vec<ToolHandle>> {
        let relevant = self.get_relevant_tools(query).await?;
        if relevant.is_empty() {
            return Ok(Vec::new());
        }

        let catalog = LiveCatalog::new(catalog.to_vec());
        let filtered = reconcile(&relevant, catalog.handles());
        self.record_outcome(query, &catalog, &relevant, &filtered);
        Ok(filtered)
    }

    /// Fetch the live catalog from the provider and filter it for `query`.
    ///
    /// Retrieval runs first; when nothing is relevant the provider is not
    /// contacted. A provider failure or timeout fails the whole call.
    pub async fn get_filtered_tools(&self, query: &str) -> Result<Vec<ToolHandle>> {
        let relevant = self.get_relevant_tools(query).await?;
        if relevant.is_empty() {
            return Ok(Vec::new());
        }

        let catalog = self.fetch_catalog().await?;
        let filtered = reconcile(&relevant, catalog.handles());
        self.record_outcome(query, &catalog, &relevant, &filtered);
        Ok(filtered)
    }

    /// One complete snapshot of the live catalog, or an error.
    pub async fn fetch_catalog(&self) -> Result<LiveCatalog> {
        let fetched = tokio::time::timeout(self.fetch_timeout, self.provider.list_tools()).await;

        let handles = match fetched {
            Ok(Ok(handles)) => handles,
            Ok(Err(e)) => {
                metrics::counter!("catalog_fetch_failures_total").increment(1);
                return Err(e);
            }
            Err(_) => {
                metrics::counter!("catalog_fetch_failures_total").increment(1);
                return Err(AppError::ProviderUnreachable(format!(
                    "Catalog fetch timed out after {}ms",
                    self.fetch_timeout.as_millis()
                )));
            }
        };

        let catalog = LiveCatalog::new(handles);
        if catalog.is_empty() {
            tracing::warn!("Live catalog is empty; no tool can be selected");
        } else {
            tracing::debug!(tools = catalog.len(), "Live catalog fetched");
        }
        Ok(catalog)
    }

    fn record_outcome(
        &self,
        query: &str,
        catalog: &LiveCatalog,
        relevant: &[QueryResult],
        filtered: &[ToolHandle],
    ) {
        for handle in filtered {
            tracing::debug!(tool = %handle.name, server = %handle.server_name, "Tool selected");
        }
        let unavailable = unavailable_tools(relevant, catalog);
        for name in &unavailable {
            tracing::debug!(tool = %name, "Relevant tool not in live catalog");
        }
        tracing::info!(
            query = %query,
            catalog_size = catalog.len(),
            relevant = relevant.len(),
            unavailable = unavailable.len(),
            selected = filtered.len(),
            "Tools filtered"
        );
        metrics::counter!("tools_filtered_total").increment(filtered.len() as u64);
        metrics::counter!("tools_unavailable_total").increment(unavailable.len() as u64);
    }
}

/// Handles of `catalog` whose name appears in `relevant`, preserving catalog
/// order. Matching is by tool name only.
pub fn reconcile(relevant: &[QueryResult], catalog: &[ToolHandle]) -> Vec<ToolHandle> {
    let relevant_names: HashSet<&str> = relevant.iter().map(|r| r.tool_name.as_str()).collect();

    catalog
        .iter()
        .filter(|handle| relevant_names.contains(handle.name.as_str()))
        .cloned()
        .collect()
}

/// Names of relevant tools that no live provider currently exposes, in rank
/// order and without duplicates.
pub fn unavailable_tools<'a>(relevant: &'a [QueryResult], catalog: &LiveCatalog) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    relevant
        .iter()
        .map(|r| r.tool_name.as_str())
        .filter(|name| !catalog.in_catalog(name) && seen.insert(*name))
        .collect()
}

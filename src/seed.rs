//! Populating the index: the default tool set and provider onboarding.

use crate::catalog::{parameter_hints, tool_description, ToolHandle};
use crate::error::Result;
use crate::index::{Metadata, ToolIndex, ToolRecord};
use serde_json::{json, Value};

/// Outcome of a seeding run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub inserted: usize,
    pub skipped: usize,
}

/// The tools every fresh deployment starts with.
pub fn default_tools() -> Vec<ToolRecord> {
    vec![
        seed_tool(
            "add",
            "math",
            "Add two numbers together. Use this for mathematical addition operations.",
            json!({
                "category": "mathematics",
                "parameters": ["a: int", "b: int"],
                "examples": ["calculate 3 + 5", "add two numbers"]
            }),
        ),
        seed_tool(
            "multiply",
            "math",
            "Multiply two numbers. Use this for mathematical multiplication operations.",
            json!({
                "category": "mathematics",
                "parameters": ["a: int", "b: int"],
                "examples": ["calculate 3 * 5", "multiply two numbers"]
            }),
        ),
        seed_tool(
            "get_weather",
            "weather",
            "Get weather information for a specific location. Use this for weather queries and forecasts.",
            json!({
                "category": "weather",
                "parameters": ["location: str"],
                "examples": ["check weather in Beijing", "what's the weather like in Shanghai"]
            }),
        ),
    ]
}

fn seed_tool(tool_name: &str, server_name: &str, description: &str, metadata: Value) -> ToolRecord {
    let metadata = match metadata {
        Value::Object(map) => map,
        _ => Metadata::new(),
    };
    ToolRecord::new(tool_name, server_name, description).with_metadata(metadata)
}

/// Insert every tool whose id is not already known, then flush.
///
/// Running it again against a populated index inserts nothing.
pub fn seed_index(index: &ToolIndex, tools: Vec<ToolRecord>) -> Result<SeedReport> {
    let mut report = SeedReport::default();

    for tool in tools {
        if index.contains(&tool.id) {
            tracing::debug!(id = %tool.id, "Seed tool already indexed, skipping");
            report.skipped += 1;
            continue;
        }
        index.insert(tool)?;
        report.inserted += 1;
    }

    if report.inserted > 0 {
        index.flush()?;
    }

    tracing::info!(
        inserted = report.inserted,
        skipped = report.skipped,
        "Seed tools indexed"
    );
    Ok(report)
}

/// Index every tool a newly connected provider exposes, overwriting any
/// earlier record for the same tool, then flush. Returns the record ids.
pub fn onboard_provider(
    index: &ToolIndex,
    server_name: &str,
    handles: &[ToolHandle],
) -> Result<Vec<String>> {
    let mut ids = Vec::with_capacity(handles.len());

    for handle in handles {
        let mut metadata = Metadata::new();
        let hints = parameter_hints(&handle.invocation_spec);
        if !hints.is_empty() {
            metadata.insert("parameters".to_string(), json!(hints));
        }

        let record = ToolRecord::new(
            handle.name.as_str(),
            server_name,
            tool_description(&handle.invocation_spec),
        )
        .with_metadata(metadata);
        ids.push(index.insert(record)?);
    }

    index.flush()?;
    tracing::info!(server = server_name, tools = ids.len(), "Provider onboarded");
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::index::IndexParams;
    use std::sync::Arc;

    fn index() -> ToolIndex {
        let embedder = Arc::new(HashingEmbedder::new(64).unwrap());
        let index = ToolIndex::in_memory(embedder, IndexParams::default());
        index.load().unwrap();
        index
    }

    #[test]
    fn test_default_tools_ids() {
        let ids: Vec<_> = default_tools().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["math_add", "math_multiply", "weather_get_weather"]);
    }

    #[test]
    fn test_default_tools_carry_metadata() {
        let tools = default_tools();
        assert_eq!(tools[2].metadata["category"], "weather");
        assert_eq!(tools[0].metadata["parameters"], json!(["a: int", "b: int"]));
    }

    #[test]
    fn test_seeding_is_idempotent() {
        let index = index();

        let first = seed_index(&index, default_tools()).unwrap();
        assert_eq!(first, SeedReport { inserted: 3, skipped: 0 });
        assert_eq!(index.len(), 3);

        let second = seed_index(&index, default_tools()).unwrap();
        assert_eq!(second, SeedReport { inserted: 0, skipped: 3 });
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_onboard_provider_builds_records() {
        let index = index();
        let handles = vec![ToolHandle::new(
            "search_docs",
            "docs",
            json!({
                "name": "search_docs",
                "description": "Search the documentation.",
                "inputSchema": {
                    "properties": { "query": { "type": "string" } },
                    "required": ["query"]
                }
            }),
        )];

        let ids = onboard_provider(&index, "docs", &handles).unwrap();
        assert_eq!(ids, vec!["docs_search_docs"]);

        let record = index.get("docs_search_docs").unwrap();
        assert_eq!(record.description, "Search the documentation.");
        assert_eq!(record.metadata["parameters"], json!(["query*: string"]));
    }
}

//! Record types stored in and returned by the tool index.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form tool metadata (category, example queries, parameter hints).
/// Opaque to the index and round-tripped verbatim.
pub type Metadata = Map<String, Value>;

/// A tool as stored in the index.
///
/// `id` is the composite key `"{server_name}_{tool_name}"`, so identical tool
/// names on different servers never collide. An empty `embedding` on insert
/// means "not supplied": the index embeds `description` itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRecord {
    pub id: String,
    pub tool_name: String,
    #[serde(default)]
    pub description: String,
    pub server_name: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ToolRecord {
    pub fn new(
        tool_name: impl Into<String>,
        server_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let tool_name = tool_name.into();
        let server_name = server_name.into();
        Self {
            id: Self::compose_id(&server_name, &tool_name),
            tool_name,
            description: description.into(),
            server_name,
            embedding: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn compose_id(server_name: &str, tool_name: &str) -> String {
        format!("{}_{}", server_name, tool_name)
    }

    /// Checks required fields and that `id` matches the composite key.
    pub fn validate(&self) -> Result<()> {
        if self.tool_name.trim().is_empty() {
            return Err(AppError::ValidationError(
                "tool_name cannot be empty".to_string(),
            ));
        }
        if self.server_name.trim().is_empty() {
            return Err(AppError::ValidationError(
                "server_name cannot be empty".to_string(),
            ));
        }

        let expected = Self::compose_id(&self.server_name, &self.tool_name);
        if self.id != expected {
            return Err(AppError::ValidationError(format!(
                "Record id '{}' does not match '{}'",
                self.id, expected
            )));
        }

        Ok(())
    }
}

/// A ranked retrieval hit. Higher `similarity_score` means more relevant,
/// whatever distance metric the index uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub tool_name: String,
    pub server_name: String,
    pub metadata: Metadata,
    pub similarity_score: f32,
}

impl QueryResult {
    pub fn from_record(record: &ToolRecord, similarity_score: f32) -> Self {
        Self {
            tool_name: record.tool_name.clone(),
            server_name: record.server_name.clone(),
            metadata: record.metadata.clone(),
            similarity_score,
        }
    }
}

//! Live tool catalogs: what connected providers can invoke right now.
//!
//! The catalog is fetched from outside the index and is never assumed static.
//! A fetch returns a complete snapshot or fails as a whole.

pub mod mcp;

pub use mcp::{parameter_hints, parse_list_tools, tool_description};

use crate::error::{AppError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// An invocable tool exposed by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolHandle {
    pub name: String,
    pub server_name: String,
    /// Provider-specific definition needed to invoke the tool (e.g. an MCP tool
    /// definition with its `inputSchema`).
    #[serde(default)]
    pub invocation_spec: Value,
}

impl ToolHandle {
    pub fn new(name: impl Into<String>, server_name: impl Into<String>, invocation_spec: Value) -> Self {
        Self {
            name: name.into(),
            server_name: server_name.into(),
            invocation_spec,
        }
    }
}

/// Source of the live tool catalog.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Every tool currently exposed by connected providers. Failures surface as
    /// `ProviderUnreachable`.
    async fn list_tools(&self) -> Result<Vec<ToolHandle>>;
}

/// One complete catalog snapshot with name lookup.
#[derive(Debug, Clone, Default)]
pub struct LiveCatalog {
    handles: Vec<ToolHandle>,
    names: HashSet<String>,
}

impl LiveCatalog {
    pub fn new(handles: Vec<ToolHandle>) -> Self {
        let names = handles.iter().map(|h| h.name.clone()).collect();
        Self { handles, names }
    }

    /// Whether a tool with this name is currently invocable.
    pub fn in_catalog(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn handles(&self) -> &[ToolHandle] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// In-memory catalog keyed by server. Connecting or disconnecting a server
/// replaces that server's tools in one step, so readers never see a partial
/// update.
#[derive(Default)]
pub struct StaticCatalog {
    servers: RwLock<BTreeMap<String, Vec<ToolHandle>>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_handles(handles: Vec<ToolHandle>) -> Self {
        let mut servers: BTreeMap<String, Vec<ToolHandle>> = BTreeMap::new();
        for handle in handles {
            servers
                .entry(handle.server_name.clone())
                .or_default()
                .push(handle);
        }
        Self {
            servers: RwLock::new(servers),
        }
    }

    /// Register (or replace) the tools of `server_name`.
    pub fn connect(&self, server_name: &str, handles: Vec<ToolHandle>) {
        tracing::info!(server = server_name, tools = handles.len(), "Provider connected");
        self.servers.write().insert(server_name.to_string(), handles);
    }

    /// Drop every tool of `server_name`. Returns false if it was not connected.
    pub fn disconnect(&self, server_name: &str) -> bool {
        let removed = self.servers.write().remove(server_name).is_some();
        if removed {
            tracing::info!(server = server_name, "Provider disconnected");
        }
        removed
    }
}

#[async_trait]
impl CatalogProvider for StaticCatalog {
    async fn list_tools(&self) -> Result<Vec<ToolHandle>> {
        Ok(self.servers.read().values().flatten().cloned().collect())
    }
}

/// Catalog read from a JSON file mapping each server name to its MCP
/// `tools/list` response. The file is re-read on every fetch.
pub struct FileCatalog {
    path: PathBuf,
}

impl FileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CatalogProvider for FileCatalog {
    async fn list_tools(&self) -> Result<Vec<ToolHandle>> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            AppError::ProviderUnreachable(format!(
                "Failed to read catalog {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let document: BTreeMap<String, Value> = serde_json::from_slice(&bytes).map_err(|e| {
            AppError::ProviderUnreachable(format!(
                "Invalid catalog {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let mut handles = Vec::new();
        for (server_name, response) in &document {
            handles.extend(parse_list_tools(response, server_name)?);
        }

        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn handle(name: &str, server: &str) -> ToolHandle {
        ToolHandle::new(name, server, json!({ "name": name }))
    }

    #[test]
    fn test_in_catalog() {
        let catalog = LiveCatalog::new(vec![handle("add", "math")]);
        assert!(catalog.in_catalog("add"));
        assert!(!catalog.in_catalog("multiply"));
        assert_eq!(catalog.len(), 1);
    }

    #[tokio::test]
    async fn test_static_catalog_connect_disconnect() {
        let catalog = StaticCatalog::new();
        catalog.connect("math", vec![handle("add", "math"), handle("multiply", "math")]);
        catalog.connect("weather", vec![handle("get_weather", "weather")]);
        assert_eq!(catalog.list_tools().await.unwrap().len(), 3);

        assert!(catalog.disconnect("math"));
        let tools = catalog.list_tools().await.unwrap();
        assert_eq!(tools, vec![handle("get_weather", "weather")]);
        assert!(!catalog.disconnect("math"));
    }

    #[tokio::test]
    async fn test_file_catalog_reads_servers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let document = json!({
            "math": { "result": { "tools": [{ "name": "add" }, { "name": "multiply" }] } },
            "weather": { "tools": [{ "name": "get_weather" }] }
        });
        std::fs::write(&path, document.to_string()).unwrap();

        let tools = FileCatalog::new(&path).list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["add", "multiply", "get_weather"]);
        assert_eq!(tools[2].server_name, "weather");
    }

    #[tokio::test]
    async fn test_missing_catalog_file_is_unreachable() {
        let dir = tempdir().unwrap();
        let result = FileCatalog::new(dir.path().join("absent.json"))
            .list_tools()
            .await;
        assert!(matches!(result, Err(AppError::ProviderUnreachable(_))));
    }
}

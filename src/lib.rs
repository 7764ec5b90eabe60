//! Toolsift - semantic tool retrieval for agents
//!
//! Indexes tool descriptions as vectors, finds the tools relevant to a natural
//! language query, and reconciles them against the tools that connected
//! providers expose right now.

pub mod catalog;
pub mod config;
pub mod embedding;
pub mod error;
pub mod handlers;
pub mod index;
pub mod manager;
pub mod persistence;
pub mod retrieval;
pub mod seed;
pub mod server;
pub mod state;

// Re-export key types for convenience
pub use catalog::{CatalogProvider, LiveCatalog, StaticCatalog, ToolHandle};
pub use config::Config;
pub use embedding::{Embedder, HashingEmbedder};
pub use error::{AppError, Result};
pub use handlers::{
    filter_tools_handler, health_handler, insert_tool_handler, ready_handler,
    remove_tool_handler, search_handler,
};
pub use index::{DistanceMetric, QueryResult, ToolIndex, ToolRecord};
pub use manager::ToolManager;
pub use retrieval::Retriever;
pub use state::AppState;

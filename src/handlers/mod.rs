pub mod health;
pub mod search;
pub mod tools;

pub use health::{health_handler, ready_handler};
pub use search::search_handler;
pub use tools::{filter_tools_handler, insert_tool_handler, remove_tool_handler};

//! Parsing of MCP `tools/list` responses into tool handles.
//!
//! Individual malformed tool definitions are logged and skipped (partial
//! success); a response whose every definition is malformed is an error.

use super::ToolHandle;
use crate::error::{AppError, Result};
use serde_json::Value;
use std::collections::HashSet;

/// Maximum description length kept for onboarding
const MAX_DESCRIPTION_LENGTH: usize = 500;

/// Maximum parameter description length for the summary
const MAX_PARAM_DESC_LENGTH: usize = 50;

/// Parse an MCP `tools/list` response into handles owned by `server_name`.
///
/// Accepts either the full JSON-RPC envelope (`result.tools`) or a bare
/// `{"tools": [...]}` result object.
pub fn parse_list_tools(json: &Value, server_name: &str) -> Result<Vec<ToolHandle>> {
    let tools_array = extract_tools_array(json)?;

    let mut handles = Vec::with_capacity(tools_array.len());
    for (idx, tool_value) in tools_array.iter().enumerate() {
        match tool_value.get("name").and_then(|v| v.as_str()) {
            Some(name) if !name.trim().is_empty() => handles.push(ToolHandle::new(
                name,
                server_name,
                tool_value.clone(),
            )),
            _ => {
                tracing::warn!(
                    index = idx,
                    server = server_name,
                    "Skipping tool definition without a name"
                );
            }
        }
    }

    if handles.is_empty() && !tools_array.is_empty() {
        return Err(AppError::ProviderUnreachable(format!(
            "Every tool definition from '{}' was malformed",
            server_name
        )));
    }

    tracing::debug!(
        total = tools_array.len(),
        parsed = handles.len(),
        server = server_name,
        "Tool list parsed"
    );

    Ok(handles)
}

fn extract_tools_array(json: &Value) -> Result<&Vec<Value>> {
    json.get("result")
        .unwrap_or(json)
        .get("tools")
        .and_then(|t| t.as_array())
        .ok_or_else(|| {
            AppError::ProviderUnreachable("Expected 'result.tools' array in MCP response".into())
        })
}

/// Description text of a tool definition, truncated for embedding.
pub fn tool_description(spec: &Value) -> String {
    let description = spec
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    truncate_description(description)
}

/// Truncate description to MAX_DESCRIPTION_LENGTH with ellipsis.
///
/// Attempts to truncate at a word boundary when possible.
fn truncate_description(desc: &str) -> String {
    if desc.len() <= MAX_DESCRIPTION_LENGTH {
        return desc.to_string();
    }

    let mut cut = MAX_DESCRIPTION_LENGTH;
    while !desc.is_char_boundary(cut) {
        cut -= 1;
    }
    let truncated = &desc[..cut];

    match truncated.rfind(' ') {
        Some(pos) if pos > cut.saturating_sub(50) => format!("{}...", &truncated[..pos]),
        _ => format!("{}...", truncated),
    }
}

/// Parameter hints from `inputSchema.properties`, one entry per parameter:
/// `"name*: type (brief description)"`, with `*` marking required parameters.
pub fn parameter_hints(spec: &Value) -> Vec<String> {
    let Some(schema) = spec.get("inputSchema") else {
        return Vec::new();
    };

    let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
        return Vec::new();
    };

    let required: HashSet<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    properties
        .iter()
        .map(|(name, prop)| format_param(name, prop, required.contains(name.as_str())))
        .collect()
}

fn format_param(name: &str, prop: &Value, is_required: bool) -> String {
    let param_type = prop.get("type").and_then(|t| t.as_str()).unwrap_or("any");

    let brief_desc: String = prop
        .get("description")
        .and_then(|d| d.as_str())
        .map(|d| {
            // First sentence, capped at MAX_PARAM_DESC_LENGTH chars
            d.split('.')
                .next()
                .unwrap_or("")
                .chars()
                .take(MAX_PARAM_DESC_LENGTH)
                .collect()
        })
        .unwrap_or_default();

    let req_marker = if is_required { "*" } else { "" };

    if brief_desc.is_empty() {
        format!("{}{}: {}", name, req_marker, param_type)
    } else {
        format!("{}{}: {} ({})", name, req_marker, param_type, brief_desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_valid_response() {
        let response = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "tools": [{
                    "name": "add",
                    "description": "Add two numbers.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "a": { "type": "integer", "description": "First number" },
                            "b": { "type": "integer" }
                        },
                        "required": ["a", "b"]
                    }
                }]
            }
        });

        let handles = parse_list_tools(&response, "math").unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].name, "add");
        assert_eq!(handles[0].server_name, "math");
        assert_eq!(handles[0].invocation_spec["inputSchema"]["required"][0], "a");
    }

    #[test]
    fn test_parse_bare_result_object() {
        let response = json!({ "tools": [{ "name": "get_weather" }] });
        let handles = parse_list_tools(&response, "weather").unwrap();
        assert_eq!(handles[0].name, "get_weather");
    }

    #[test]
    fn test_missing_tools_is_error() {
        assert!(parse_list_tools(&json!({ "jsonrpc": "2.0" }), "server").is_err());
    }

    #[test]
    fn test_nameless_tool_skipped() {
        let response = json!({
            "result": {
                "tools": [
                    { "description": "No name here" },
                    { "name": "valid_tool", "description": "Has name" }
                ]
            }
        });

        let handles = parse_list_tools(&response, "server").unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].name, "valid_tool");
    }

    #[test]
    fn test_all_malformed_is_error() {
        let response = json!({ "result": { "tools": [{ "description": "x" }] } });
        assert!(parse_list_tools(&response, "server").is_err());
    }

    #[test]
    fn test_empty_tools_array_is_empty() {
        let response = json!({ "result": { "tools": [] } });
        assert!(parse_list_tools(&response, "server").unwrap().is_empty());
    }

    #[test]
    fn test_tool_description_null_is_empty() {
        assert_eq!(tool_description(&json!({ "name": "x", "description": null })), "");
    }

    #[test]
    fn test_truncate_long_description() {
        let truncated = truncate_description(&"A".repeat(600));
        assert!(truncated.len() <= MAX_DESCRIPTION_LENGTH + 3);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_truncate_multibyte_description() {
        let truncated = truncate_description(&"天气".repeat(200));
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_parameter_hints_mark_required() {
        let spec = json!({
            "inputSchema": {
                "properties": {
                    "location": { "type": "string", "description": "City name. Any format." },
                    "units": { "type": "string" }
                },
                "required": ["location"]
            }
        });

        let hints = parameter_hints(&spec);
        assert!(hints.contains(&"location*: string (City name)".to_string()));
        assert!(hints.contains(&"units: string".to_string()));
    }

    #[test]
    fn test_parameter_hints_without_schema() {
        assert!(parameter_hints(&json!({ "name": "x" })).is_empty());
    }
}

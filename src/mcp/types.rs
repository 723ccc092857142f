use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool descriptor as advertised by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<McpTool>,
    #[serde(rename = "nextCursor", default)]
    pub next_cursor: Option<String>,
}

/// The transport-agnostic result of a capability call.
///
/// `is_error` is set by the remote tool, never inferred locally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedResult {
    pub content: Vec<Value>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl NormalizedResult {
    /// Wrap an arbitrary payload as a single successful fragment.
    pub fn from_payload(payload: Value) -> Self {
        Self {
            content: vec![payload],
            is_error: false,
        }
    }

    /// Interpret a payload that may already be an MCP tool result.
    ///
    /// Objects with a `content` array are taken as tool results; anything else
    /// becomes one fragment.
    pub fn from_tool_payload(payload: Value) -> Self {
        if payload.get("content").is_some_and(Value::is_array) {
            if let Ok(result) = serde_json::from_value::<Self>(payload.clone()) {
                return result;
            }
        }
        Self::from_payload(payload)
    }

    /// Text of all `{"type":"text"}` fragments, in order.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|fragment| {
            match (fragment.get("type").and_then(Value::as_str), fragment.get("text")) {
                (Some("text"), Some(Value::String(text))) => Some(text.as_str()),
                _ => None,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_payload_keeps_remote_error_flag() {
        let result = NormalizedResult::from_tool_payload(json!({
            "content": [{"type": "text", "text": "quota exceeded"}],
            "isError": true
        }));
        assert!(result.is_error);
        assert_eq!(result.texts().collect::<Vec<_>>(), vec!["quota exceeded"]);
    }

    #[test]
    fn test_plain_payload_becomes_single_fragment() {
        let result = NormalizedResult::from_tool_payload(json!({"ok": true}));
        assert!(!result.is_error);
        assert_eq!(result.content, vec![json!({"ok": true})]);

        let result = NormalizedResult::from_tool_payload(json!("plain text"));
        assert_eq!(result.content, vec![json!("plain text")]);
    }

    #[test]
    fn test_list_tools_parses_without_schema() {
        let parsed: ListToolsResult = serde_json::from_value(json!({
            "tools": [{"name": "image_analysis", "description": "Describe an image"}],
            "nextCursor": "abc"
        }))
        .unwrap();
        assert_eq!(parsed.tools[0].name, "image_analysis");
        assert_eq!(parsed.tools[0].input_schema, Value::Null);
        assert_eq!(parsed.next_cursor.as_deref(), Some("abc"));
    }
}

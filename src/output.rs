//! Rendering of normalized results for the terminal.

use clap::ValueEnum;
use serde_json::{Value, json};

use crate::mcp::types::{McpTool, NormalizedResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Text fragments as-is, other fragments pretty-printed
    #[default]
    Text,
    /// `{"content": [...], "isError": bool}`
    Json,
}

pub fn render_result(result: &NormalizedResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => pretty(&json!({
            "content": result.content,
            "isError": result.is_error,
        })),
        OutputFormat::Text => result
            .content
            .iter()
            .map(|fragment| match fragment {
                Value::String(s) => s.clone(),
                Value::Object(obj) if obj.get("type").and_then(Value::as_str) == Some("text") => {
                    obj.get("text")
                        .and_then(Value::as_str)
                        .map_or_else(|| pretty(fragment), str::to_string)
                }
                other => pretty(other),
            })
            .collect::<Vec<_>>()
            .join("\n\n"),
    }
}

pub fn render_tools(tools: &[McpTool], format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => pretty(&json!(tools)),
        OutputFormat::Text => tools
            .iter()
            .map(|tool| match tool.description.as_deref() {
                Some(desc) if !desc.is_empty() => {
                    let first_line = desc.lines().next().unwrap_or_default();
                    format!("{}\t{first_line}", tool.name)
                }
                _ => tool.name.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

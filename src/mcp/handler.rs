//! Tool registry and argument helpers.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::mcp::progress::ProgressReporter;
use crate::mcp::protocol::{ContentBlock, Tool, ToolResult};

/// Per-call context handed to a tool.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Present when the client asked for progress notifications.
    pub progress: Option<ProgressReporter>,
}

/// Handler for MCP tool calls.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Get the tool definition.
    fn definition(&self) -> Tool;

    /// Whether a successful call changes budget data.
    fn mutates(&self) -> bool {
        false
    }

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: HashMap<String, Value>, ctx: &ToolContext)
        -> Result<ToolResult>;
}

/// Registry of tool handlers.
#[derive(Clone, Default)]
pub struct McpHandler {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
}

impl McpHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool handler.
    pub fn register<T: ToolHandler + 'static>(&mut self, handler: T) {
        self.register_arc(Arc::new(handler));
    }

    pub fn register_arc(&mut self, handler: Arc<dyn ToolHandler>) {
        let tool = handler.definition();
        self.tools.insert(tool.name, handler);
    }

    /// All registered tools, sorted by name.
    pub fn list_tools(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self.tools.values().map(|h| h.definition()).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }
}

/// Helper to create a text content block.
pub fn text_content(text: impl Into<String>) -> ContentBlock {
    ContentBlock::Text { text: text.into() }
}

/// Helper to create a successful tool result.
pub fn success_result(text: impl Into<String>) -> ToolResult {
    ToolResult {
        content: vec![text_content(text)],
        is_error: false,
    }
}

/// Helper to create an error tool result.
pub fn error_result(text: impl Into<String>) -> ToolResult {
    ToolResult {
        content: vec![text_content(text)],
        is_error: true,
    }
}

/// Successful result carrying pretty-printed JSON.
pub fn json_result<T: Serialize>(value: &T) -> Result<ToolResult> {
    Ok(success_result(serde_json::to_string_pretty(value)?))
}

fn missing(name: &str) -> Error {
    Error::InvalidToolArguments(format!("Missing required argument: {}", name))
}

/// Helper to extract a required, non-empty string argument.
pub fn get_string_arg(args: &HashMap<String, Value>, name: &str) -> Result<String> {
    args.get(name)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(String::from)
        .ok_or_else(|| missing(name))
}

pub fn get_optional_string_arg(args: &HashMap<String, Value>, name: &str) -> Option<String> {
    args.get(name).and_then(|v| v.as_str()).map(String::from)
}

/// Helper to extract a required integer argument.
pub fn get_int_arg(args: &HashMap<String, Value>, name: &str) -> Result<i64> {
    args.get(name).and_then(|v| v.as_i64()).ok_or_else(|| missing(name))
}

pub fn get_optional_int_arg(args: &HashMap<String, Value>, name: &str) -> Option<i64> {
    args.get(name).and_then(|v| v.as_i64())
}

pub fn get_bool_arg(args: &HashMap<String, Value>, name: &str, default: bool) -> bool {
    args.get(name).and_then(|v| v.as_bool()).unwrap_or(default)
}

pub fn get_optional_bool_arg(args: &HashMap<String, Value>, name: &str) -> Option<bool> {
    args.get(name).and_then(|v| v.as_bool())
}

/// Helper to extract an optional `YYYY-MM-DD` date argument.
pub fn get_optional_date_arg(
    args: &HashMap<String, Value>,
    name: &str,
) -> Result<Option<NaiveDate>> {
    match args.get(name).and_then(|v| v.as_str()) {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| {
                Error::InvalidToolArguments(format!(
                    "Argument {} must be a date formatted YYYY-MM-DD, got {:?}",
                    name, s
                ))
            }),
    }
}

pub fn get_date_arg(args: &HashMap<String, Value>, name: &str) -> Result<NaiveDate> {
    get_optional_date_arg(args, name)?.ok_or_else(|| missing(name))
}

/// Helper to extract an array argument.
pub fn get_array_arg(args: &HashMap<String, Value>, name: &str) -> Vec<Value> {
    args.get(name)
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
}

/// Input schema for a tool taking no arguments.
pub fn empty_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
        "required": []
    })
}

//! Model Context Protocol (MCP) implementation.
//!
//! # Architecture
//!
//! - `protocol` - JSON-RPC and MCP message types
//! - `handler` - Tool registry and argument helpers
//! - `server` - Per-session request dispatch
//! - `progress` - Progress notifications for long-running tools
//! - `resources` - `actual://` account resources
//! - `prompts` - Prompt templates
//! - `transport` - Stdio transport

pub mod handler;
pub mod progress;
pub mod prompts;
pub mod protocol;
pub mod resources;
pub mod server;
pub mod transport;

pub use handler::{McpHandler, ToolContext, ToolHandler};
pub use protocol::*;
pub use server::{McpServer, McpServerFactory, ServerNotifier};
pub use transport::{StdioTransport, Transport};

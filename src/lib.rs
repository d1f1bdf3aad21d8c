//! Budget MCP Gateway
//!
//! A Model Context Protocol (MCP) server that exposes a budget-sync server
//! as AI-callable tools, over stdio or streamable HTTP.
//!
//! # Architecture
//!
//! 1. **Backend Layer** (`backend`) - Budget server API and the shared
//!    connection lifecycle (init, ready, shutdown)
//! 2. **MCP Layer** (`mcp`) - Protocol types, per-session dispatch, stdio
//!    transport, resources and prompts
//! 3. **Tools Layer** (`tools`) - Account, transaction, category, payee,
//!    rule and report tools
//! 4. **HTTP Layer** (`http`) - Session registry, resumable SSE streams,
//!    request routing and bearer auth
//!
//! # Sessions
//!
//! Every HTTP client gets its own session, created by an `initialize`
//! request and named by the `Mcp-Session-Id` header. Sessions share one
//! backend connection. Each session keeps an event log so a dropped SSE
//! stream can be resumed with `Last-Event-ID`.

pub mod backend;
pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod metrics;
pub mod tools;

pub use error::{Error, Result};

/// Server version reported at initialize and on `/health`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Server name reported at initialize.
pub const SERVER_NAME: &str = "budget-mcp";

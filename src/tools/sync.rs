//! Budget sync tool.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tracing::info;

use crate::backend::BackendClient;
use crate::error::Result;
use crate::mcp::handler::{empty_schema, success_result, ToolContext, ToolHandler};
use crate::mcp::protocol::{Tool, ToolResult};

/// Flush local changes and download a fresh copy of the budget.
///
/// Implemented as a shutdown followed by a new initialization, so other
/// sessions waiting on the backend join the same reconnect.
pub struct SyncBudgetTool {
    backend: BackendClient,
}

impl SyncBudgetTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for SyncBudgetTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "sync-budget".to_string(),
            description: "Sync local changes to the budget server and download the latest data."
                .to_string(),
            input_schema: empty_schema(),
        }
    }

    /// Data may change underneath clients after a fresh download.
    fn mutates(&self) -> bool {
        true
    }

    async fn execute(&self, _args: HashMap<String, Value>, _ctx: &ToolContext) -> Result<ToolResult> {
        self.backend.shutdown().await?;
        self.backend.ensure_ready().await?;
        info!("Budget re-synced");
        Ok(success_result("Budget synced with the server"))
    }
}

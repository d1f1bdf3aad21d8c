//! Account tools.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::backend::{format_amount, AccountUpdate, BackendClient, NewAccount};
use crate::error::{Error, Result};
use crate::mcp::handler::{
    get_bool_arg, get_optional_bool_arg, get_optional_date_arg,
    get_optional_int_arg, get_optional_string_arg, get_string_arg, json_result, success_result,
    ToolContext, ToolHandler,
};
use crate::mcp::protocol::{Tool, ToolResult};
use crate::tools::resolve_account;

/// List accounts with balances.
pub struct GetAccountsTool {
    backend: BackendClient,
}

impl GetAccountsTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for GetAccountsTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "get-accounts".to_string(),
            description: "List all accounts with their current balances.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "includeClosed": {
                        "type": "boolean",
                        "description": "Include closed accounts (default: false)"
                    }
                },
                "required": []
            }),
        }
    }

    async fn execute(&self, args: HashMap<String, Value>, _ctx: &ToolContext) -> Result<ToolResult> {
        let include_closed = get_bool_arg(&args, "includeClosed", false);
        let accounts = self.backend.get_accounts().await?;

        let mut entries = Vec::new();
        for account in accounts.into_iter().filter(|a| include_closed || !a.closed) {
            let balance = self.backend.get_account_balance(&account.id, None).await?;
            entries.push(json!({
                "id": account.id,
                "name": account.name,
                "offbudget": account.offbudget,
                "closed": account.closed,
                "balance": balance,
                "formattedBalance": format_amount(balance),
            }));
        }

        json_result(&entries)
    }
}

/// Balance of one account, optionally as of a date.
pub struct GetAccountBalanceTool {
    backend: BackendClient,
}

impl GetAccountBalanceTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for GetAccountBalanceTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "get-account-balance".to_string(),
            description: "Get the balance of an account, optionally as of a given date.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "accountId": {
                        "type": "string",
                        "description": "Account id or name"
                    },
                    "date": {
                        "type": "string",
                        "description": "Only count transactions on or before this date (YYYY-MM-DD)"
                    }
                },
                "required": ["accountId"]
            }),
        }
    }

    async fn execute(&self, args: HashMap<String, Value>, _ctx: &ToolContext) -> Result<ToolResult> {
        let account = resolve_account(&self.backend, &get_string_arg(&args, "accountId")?).await?;
        let cutoff = get_optional_date_arg(&args, "date")?;
        let balance = self.backend.get_account_balance(&account.id, cutoff).await?;

        json_result(&json!({
            "accountId": account.id,
            "name": account.name,
            "date": cutoff.map(|d| d.to_string()),
            "balance": balance,
            "formattedBalance": format_amount(balance),
        }))
    }
}

/// Create an account.
pub struct CreateAccountTool {
    backend: BackendClient,
}

impl CreateAccountTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for CreateAccountTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "create-account".to_string(),
            description: "Create a new account with an optional starting balance.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Account name" },
                    "offbudget": {
                        "type": "boolean",
                        "description": "Track the account off budget (default: false)"
                    },
                    "initialBalance": {
                        "type": "integer",
                        "description": "Starting balance in cents (default: 0)"
                    }
                },
                "required": ["name"]
            }),
        }
    }

    fn mutates(&self) -> bool {
        true
    }

    async fn execute(&self, args: HashMap<String, Value>, _ctx: &ToolContext) -> Result<ToolResult> {
        let account = NewAccount {
            name: get_string_arg(&args, "name")?,
            offbudget: get_bool_arg(&args, "offbudget", false),
        };
        let initial_balance = get_optional_int_arg(&args, "initialBalance").unwrap_or(0);
        let name = account.name.clone();
        let id = self.backend.create_account(account, initial_balance).await?;

        Ok(success_result(format!("Created account {} ({})", name, id)))
    }
}

/// Rename an account or move it on/off budget.
pub struct UpdateAccountTool {
    backend: BackendClient,
}

impl UpdateAccountTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for UpdateAccountTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "update-account".to_string(),
            description: "Update an account's name or on/off budget status.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Account id or name" },
                    "name": { "type": "string", "description": "New name" },
                    "offbudget": { "type": "boolean", "description": "New off-budget flag" }
                },
                "required": ["id"]
            }),
        }
    }

    fn mutates(&self) -> bool {
        true
    }

    async fn execute(&self, args: HashMap<String, Value>, _ctx: &ToolContext) -> Result<ToolResult> {
        let account = resolve_account(&self.backend, &get_string_arg(&args, "id")?).await?;
        let update = AccountUpdate {
            name: get_optional_string_arg(&args, "name"),
            offbudget: get_optional_bool_arg(&args, "offbudget"),
        };
        if update.name.is_none() && update.offbudget.is_none() {
            return Err(Error::InvalidToolArguments(
                "Nothing to update: provide name or offbudget".to_string(),
            ));
        }

        self.backend.update_account(&account.id, update).await?;
        Ok(success_result(format!("Updated account {}", account.id)))
    }
}

/// Close an account.
pub struct CloseAccountTool {
    backend: BackendClient,
}

impl CloseAccountTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for CloseAccountTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "close-account".to_string(),
            description: "Close an account. Its history is kept.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Account id or name" }
                },
                "required": ["id"]
            }),
        }
    }

    fn mutates(&self) -> bool {
        true
    }

    async fn execute(&self, args: HashMap<String, Value>, _ctx: &ToolContext) -> Result<ToolResult> {
        let account = resolve_account(&self.backend, &get_string_arg(&args, "id")?).await?;
        if account.closed {
            return Ok(success_result(format!("Account {} is already closed", account.name)));
        }
        self.backend.close_account(&account.id).await?;
        Ok(success_result(format!("Closed account {}", account.name)))
    }
}

/// Reopen a closed account.
pub struct ReopenAccountTool {
    backend: BackendClient,
}

impl ReopenAccountTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for ReopenAccountTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "reopen-account".to_string(),
            description: "Reopen a closed account.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Account id or name" }
                },
                "required": ["id"]
            }),
        }
    }

    fn mutates(&self) -> bool {
        true
    }

    async fn execute(&self, args: HashMap<String, Value>, _ctx: &ToolContext) -> Result<ToolResult> {
        let account = resolve_account(&self.backend, &get_string_arg(&args, "id")?).await?;
        self.backend.reopen_account(&account.id).await?;
        Ok(success_result(format!("Reopened account {}", account.name)))
    }
}

/// Delete an account and its transactions.
pub struct DeleteAccountTool {
    backend: BackendClient,
}

impl DeleteAccountTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for DeleteAccountTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "delete-account".to_string(),
            description: "Permanently delete an account and all of its transactions.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Account id (names are not accepted)" }
                },
                "required": ["id"]
            }),
        }
    }

    fn mutates(&self) -> bool {
        true
    }

    async fn execute(&self, args: HashMap<String, Value>, _ctx: &ToolContext) -> Result<ToolResult> {
        let id = get_string_arg(&args, "id")?;
        self.backend.delete_account(&id).await?;
        Ok(success_result(format!("Deleted account {}", id)))
    }
}

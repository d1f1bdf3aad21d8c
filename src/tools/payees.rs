//! Payee tools.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::backend::BackendClient;
use crate::error::Result;
use crate::mcp::handler::{
    empty_schema, get_string_arg, json_result, success_result, ToolContext, ToolHandler,
};
use crate::mcp::protocol::{Tool, ToolResult};

/// List payees.
pub struct GetPayeesTool {
    backend: BackendClient,
}

impl GetPayeesTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for GetPayeesTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "get-payees".to_string(),
            description: "List all payees. Transfer payees carry the account they transfer to."
                .to_string(),
            input_schema: empty_schema(),
        }
    }

    async fn execute(&self, _args: HashMap<String, Value>, _ctx: &ToolContext) -> Result<ToolResult> {
        let mut payees = self.backend.get_payees().await?;
        payees.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        json_result(&payees)
    }
}

pub struct CreatePayeeTool {
    backend: BackendClient,
}

impl CreatePayeeTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for CreatePayeeTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "create-payee".to_string(),
            description: "Create a payee.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Payee name" }
                },
                "required": ["name"]
            }),
        }
    }

    fn mutates(&self) -> bool {
        true
    }

    async fn execute(&self, args: HashMap<String, Value>, _ctx: &ToolContext) -> Result<ToolResult> {
        let name = get_string_arg(&args, "name")?;
        let id = self.backend.create_payee(&name).await?;
        Ok(success_result(format!("Created payee {} ({})", name, id)))
    }
}

pub struct UpdatePayeeTool {
    backend: BackendClient,
}

impl UpdatePayeeTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for UpdatePayeeTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "update-payee".to_string(),
            description: "Rename a payee.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Payee id" },
                    "name": { "type": "string", "description": "New name" }
                },
                "required": ["id", "name"]
            }),
        }
    }

    fn mutates(&self) -> bool {
        true
    }

    async fn execute(&self, args: HashMap<String, Value>, _ctx: &ToolContext) -> Result<ToolResult> {
        let id = get_string_arg(&args, "id")?;
        let name = get_string_arg(&args, "name")?;
        self.backend.update_payee(&id, &name).await?;
        Ok(success_result(format!("Renamed payee {} to {}", id, name)))
    }
}

pub struct DeletePayeeTool {
    backend: BackendClient,
}

impl DeletePayeeTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for DeletePayeeTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "delete-payee".to_string(),
            description: "Delete a payee.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Payee id" }
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
        self.backend.delete_payee(&id).await?;
        Ok(success_result(format!("Deleted payee {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::tools::test_support::*;

    #[tokio::test]
    async fn test_payee_crud() {
        let (backend, _api) = backend();
        let ctx = ToolContext::default();

        CreatePayeeTool::new(backend.clone())
            .execute(args(json!({"name": "grocer"})), &ctx)
            .await
            .unwrap();
        CreatePayeeTool::new(backend.clone())
            .execute(args(json!({"name": "Bakery"})), &ctx)
            .await
            .unwrap();

        let listed = json(
            &GetPayeesTool::new(backend.clone())
                .execute(args(json!({})), &ctx)
                .await
                .unwrap(),
        );
        assert_eq!(listed[0]["name"], "Bakery");
        assert_eq!(listed[1]["name"], "grocer");

        let id = listed[1]["id"].as_str().unwrap().to_string();
        UpdatePayeeTool::new(backend.clone())
            .execute(args(json!({"id": &id, "name": "Grocer"})), &ctx)
            .await
            .unwrap();
        DeletePayeeTool::new(backend.clone())
            .execute(args(json!({"id": &id})), &ctx)
            .await
            .unwrap();

        let payees = backend.get_payees().await.unwrap();
        assert_eq!(payees.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_payee() {
        let (backend, _api) = backend();
        let err = DeletePayeeTool::new(backend)
            .execute(args(json!({"id": "nope"})), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}

//! Rule tools.
//!
//! Conditions and actions are opaque JSON objects; the budget server
//! validates them.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::backend::{BackendClient, NewRule};
use crate::error::{Error, Result};
use crate::mcp::handler::{
    empty_schema, get_array_arg, get_optional_string_arg, get_string_arg, json_result,
    success_result, ToolContext, ToolHandler,
};
use crate::mcp::protocol::{Tool, ToolResult};

fn conditions_op(args: &HashMap<String, Value>) -> Result<Option<String>> {
    match get_optional_string_arg(args, "conditionsOp") {
        None => Ok(None),
        Some(op) if op == "and" || op == "or" => Ok(Some(op)),
        Some(op) => Err(Error::InvalidToolArguments(format!(
            "conditionsOp must be \"and\" or \"or\", got {:?}",
            op
        ))),
    }
}

fn rule_schema(with_id: bool) -> Value {
    let mut properties = json!({
        "stage": {
            "type": "string",
            "enum": ["pre", "post"],
            "description": "Rule stage; omit for the default stage"
        },
        "conditionsOp": {
            "type": "string",
            "enum": ["and", "or"],
            "description": "How conditions combine (default: and)"
        },
        "conditions": {
            "type": "array",
            "items": { "type": "object" },
            "description": "Conditions, e.g. {\"field\": \"payee\", \"op\": \"is\", \"value\": \"<id>\"}"
        },
        "actions": {
            "type": "array",
            "items": { "type": "object" },
            "description": "Actions, e.g. {\"field\": \"category\", \"op\": \"set\", \"value\": \"<id>\"}"
        }
    });
    let required = if with_id {
        properties["id"] = json!({ "type": "string", "description": "Rule id" });
        json!(["id"])
    } else {
        json!(["actions"])
    };
    json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

/// List rules.
pub struct GetRulesTool {
    backend: BackendClient,
}

impl GetRulesTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for GetRulesTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "get-rules".to_string(),
            description: "List transaction rules with their conditions and actions.".to_string(),
            input_schema: empty_schema(),
        }
    }

    async fn execute(&self, _args: HashMap<String, Value>, _ctx: &ToolContext) -> Result<ToolResult> {
        json_result(&self.backend.get_rules().await?)
    }
}

pub struct CreateRuleTool {
    backend: BackendClient,
}

impl CreateRuleTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for CreateRuleTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "create-rule".to_string(),
            description: "Create a transaction rule.".to_string(),
            input_schema: rule_schema(false),
        }
    }

    fn mutates(&self) -> bool {
        true
    }

    async fn execute(&self, args: HashMap<String, Value>, _ctx: &ToolContext) -> Result<ToolResult> {
        let actions = get_array_arg(&args, "actions");
        if actions.is_empty() {
            return Err(Error::InvalidToolArguments(
                "A rule needs at least one action".to_string(),
            ));
        }

        let rule = NewRule {
            stage: get_optional_string_arg(&args, "stage"),
            conditions_op: conditions_op(&args)?.unwrap_or_else(|| "and".to_string()),
            conditions: get_array_arg(&args, "conditions"),
            actions,
        };
        let created = self.backend.create_rule(rule).await?;
        json_result(&created)
    }
}

/// Update a rule. Fields not given keep their current value.
pub struct UpdateRuleTool {
    backend: BackendClient,
}

impl UpdateRuleTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for UpdateRuleTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "update-rule".to_string(),
            description: "Update a transaction rule. Omitted fields are left unchanged."
                .to_string(),
            input_schema: rule_schema(true),
        }
    }

    fn mutates(&self) -> bool {
        true
    }

    async fn execute(&self, args: HashMap<String, Value>, _ctx: &ToolContext) -> Result<ToolResult> {
        let id = get_string_arg(&args, "id")?;
        let mut rule = self
            .backend
            .get_rules()
            .await?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::NotFound(format!("rule {}", id)))?;

        if let Some(stage) = get_optional_string_arg(&args, "stage") {
            rule.stage = Some(stage);
        }
        if let Some(op) = conditions_op(&args)? {
            rule.conditions_op = op;
        }
        if args.contains_key("conditions") {
            rule.conditions = get_array_arg(&args, "conditions");
        }
        if args.contains_key("actions") {
            rule.actions = get_array_arg(&args, "actions");
        }

        let updated = self.backend.update_rule(rule).await?;
        json_result(&updated)
    }
}

pub struct DeleteRuleTool {
    backend: BackendClient,
}

impl DeleteRuleTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for DeleteRuleTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "delete-rule".to_string(),
            description: "Delete a transaction rule.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Rule id" }
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
        self.backend.delete_rule(&id).await?;
        Ok(success_result(format!("Deleted rule {}", id)))
    }
}

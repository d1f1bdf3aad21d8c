//! Category and category group tools.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::backend::{BackendClient, CategoryUpdate, NewCategory, NewCategoryGroup};
use crate::error::{Error, Result};
use crate::mcp::handler::{
    get_bool_arg, get_optional_bool_arg, get_optional_string_arg, get_string_arg, json_result,
    success_result, ToolContext, ToolHandler,
};
use crate::mcp::protocol::{Tool, ToolResult};

fn category_update(args: &HashMap<String, Value>, allow_group: bool) -> Result<CategoryUpdate> {
    let update = CategoryUpdate {
        name: get_optional_string_arg(args, "name"),
        group_id: if allow_group {
            get_optional_string_arg(args, "groupId")
        } else {
            None
        },
        hidden: get_optional_bool_arg(args, "hidden"),
    };
    if update.name.is_none() && update.group_id.is_none() && update.hidden.is_none() {
        return Err(Error::InvalidToolArguments("Nothing to update".to_string()));
    }
    Ok(update)
}

/// Category groups with their categories.
pub struct GetGroupedCategoriesTool {
    backend: BackendClient,
}

impl GetGroupedCategoriesTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for GetGroupedCategoriesTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "get-grouped-categories".to_string(),
            description: "List category groups together with the categories in each.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "includeHidden": {
                        "type": "boolean",
                        "description": "Include hidden groups and categories (default: false)"
                    }
                },
                "required": []
            }),
        }
    }

    async fn execute(&self, args: HashMap<String, Value>, _ctx: &ToolContext) -> Result<ToolResult> {
        let include_hidden = get_bool_arg(&args, "includeHidden", false);
        let mut groups = self.backend.get_category_groups().await?;

        if !include_hidden {
            groups.retain(|g| !g.hidden);
            for group in &mut groups {
                group.categories.retain(|c| !c.hidden);
            }
        }

        json_result(&groups)
    }
}

/// Create a category.
pub struct CreateCategoryTool {
    backend: BackendClient,
}

impl CreateCategoryTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for CreateCategoryTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "create-category".to_string(),
            description: "Create a category inside a category group.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Category name" },
                    "groupId": { "type": "string", "description": "Category group id" }
                },
                "required": ["name", "groupId"]
            }),
        }
    }

    fn mutates(&self) -> bool {
        true
    }

    async fn execute(&self, args: HashMap<String, Value>, _ctx: &ToolContext) -> Result<ToolResult> {
        let category = NewCategory {
            name: get_string_arg(&args, "name")?,
            group_id: get_string_arg(&args, "groupId")?,
        };
        let name = category.name.clone();
        let id = self.backend.create_category(category).await?;
        Ok(success_result(format!("Created category {} ({})", name, id)))
    }
}

/// Rename, move or hide a category.
pub struct UpdateCategoryTool {
    backend: BackendClient,
}

impl UpdateCategoryTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for UpdateCategoryTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "update-category".to_string(),
            description: "Rename a category, move it to another group, or hide it.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Category id" },
                    "name": { "type": "string", "description": "New name" },
                    "groupId": { "type": "string", "description": "New category group id" },
                    "hidden": { "type": "boolean", "description": "Hide the category" }
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
        self.backend
            .update_category(&id, category_update(&args, true)?)
            .await?;
        Ok(success_result(format!("Updated category {}", id)))
    }
}

/// Delete a category.
pub struct DeleteCategoryTool {
    backend: BackendClient,
}

impl DeleteCategoryTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for DeleteCategoryTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "delete-category".to_string(),
            description: "Delete a category. Its transactions become uncategorized.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Category id" }
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
        self.backend.delete_category(&id).await?;
        Ok(success_result(format!("Deleted category {}", id)))
    }
}

/// Create a category group.
pub struct CreateCategoryGroupTool {
    backend: BackendClient,
}

impl CreateCategoryGroupTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for CreateCategoryGroupTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "create-category-group".to_string(),
            description: "Create a category group.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Group name" },
                    "isIncome": {
                        "type": "boolean",
                        "description": "Group holds income categories (default: false)"
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
        let group = NewCategoryGroup {
            name: get_string_arg(&args, "name")?,
            is_income: get_bool_arg(&args, "isIncome", false),
        };
        let name = group.name.clone();
        let id = self.backend.create_category_group(group).await?;
        Ok(success_result(format!("Created category group {} ({})", name, id)))
    }
}

/// Rename or hide a category group.
pub struct UpdateCategoryGroupTool {
    backend: BackendClient,
}

impl UpdateCategoryGroupTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for UpdateCategoryGroupTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "update-category-group".to_string(),
            description: "Rename or hide a category group.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Category group id" },
                    "name": { "type": "string", "description": "New name" },
                    "hidden": { "type": "boolean", "description": "Hide the group" }
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
        self.backend
            .update_category_group(&id, category_update(&args, false)?)
            .await?;
        Ok(success_result(format!("Updated category group {}", id)))
    }
}

/// Delete a category group.
pub struct DeleteCategoryGroupTool {
    backend: BackendClient,
}

impl DeleteCategoryGroupTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for DeleteCategoryGroupTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "delete-category-group".to_string(),
            description: "Delete a category group and its categories.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Category group id" }
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
        self.backend.delete_category_group(&id).await?;
        Ok(success_result(format!("Deleted category group {}", id)))
    }
}

//! Transaction tools.

use async_trait::async_trait;
use chrono::{Duration, Local};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::backend::{format_amount, BackendClient, NewTransaction, Transaction, TransactionUpdate};
use crate::error::{Error, Result};
use crate::mcp::handler::{
    get_bool_arg, get_date_arg, get_int_arg, get_optional_bool_arg, get_optional_date_arg,
    get_optional_int_arg, get_optional_string_arg, get_string_arg, json_result, success_result,
    ToolContext, ToolHandler,
};
use crate::mcp::protocol::{Tool, ToolResult};
use crate::tools::resolve_account;

const DEFAULT_WINDOW_DAYS: i64 = 30;
const DEFAULT_LIMIT: i64 = 100;

/// Filters applied after fetching an account's transactions.
#[derive(Debug, Default)]
struct TransactionFilter {
    min_amount: Option<i64>,
    max_amount: Option<i64>,
    category: Option<String>,
    payee: Option<String>,
}

impl TransactionFilter {
    fn matches(&self, tx: &Transaction, category_names: &HashMap<String, String>) -> bool {
        if self.min_amount.is_some_and(|min| tx.amount < min) {
            return false;
        }
        if self.max_amount.is_some_and(|max| tx.amount > max) {
            return false;
        }
        if let Some(wanted) = &self.category {
            let id = tx.category.as_deref().unwrap_or_default();
            let name = category_names.get(id).map(String::as_str).unwrap_or_default();
            if id != wanted && !name.eq_ignore_ascii_case(wanted) {
                return false;
            }
        }
        if let Some(wanted) = &self.payee {
            let name = tx.payee_name.as_deref().unwrap_or_default().to_lowercase();
            if !name.contains(&wanted.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

/// Query an account's transactions.
pub struct GetTransactionsTool {
    backend: BackendClient,
}

impl GetTransactionsTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for GetTransactionsTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "get-transactions".to_string(),
            description: "Get transactions for an account within a date range, with optional amount, category and payee filters.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "accountId": { "type": "string", "description": "Account id or name" },
                    "startDate": {
                        "type": "string",
                        "description": "Start date YYYY-MM-DD (default: 30 days ago)"
                    },
                    "endDate": {
                        "type": "string",
                        "description": "End date YYYY-MM-DD (default: today)"
                    },
                    "minAmount": { "type": "integer", "description": "Minimum amount in cents" },
                    "maxAmount": { "type": "integer", "description": "Maximum amount in cents" },
                    "category": { "type": "string", "description": "Category id or name" },
                    "payee": { "type": "string", "description": "Payee name substring" },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum transactions to return (default: 100)"
                    }
                },
                "required": ["accountId"]
            }),
        }
    }

    async fn execute(&self, args: HashMap<String, Value>, _ctx: &ToolContext) -> Result<ToolResult> {
        let account = resolve_account(&self.backend, &get_string_arg(&args, "accountId")?).await?;
        let end = get_optional_date_arg(&args, "endDate")?.unwrap_or_else(|| Local::now().date_naive());
        let start = get_optional_date_arg(&args, "startDate")?
            .unwrap_or_else(|| end - Duration::days(DEFAULT_WINDOW_DAYS));
        if start > end {
            return Err(Error::InvalidToolArguments(
                "startDate must not be after endDate".to_string(),
            ));
        }
        let limit = get_optional_int_arg(&args, "limit").unwrap_or(DEFAULT_LIMIT).max(1) as usize;

        let filter = TransactionFilter {
            min_amount: get_optional_int_arg(&args, "minAmount"),
            max_amount: get_optional_int_arg(&args, "maxAmount"),
            category: get_optional_string_arg(&args, "category"),
            payee: get_optional_string_arg(&args, "payee"),
        };

        let category_names: HashMap<String, String> = if filter.category.is_some() {
            self.backend
                .get_categories()
                .await?
                .into_iter()
                .map(|c| (c.id, c.name))
                .collect()
        } else {
            HashMap::new()
        };

        let transactions = self.backend.get_transactions(&account.id, start, end).await?;
        let matched: Vec<&Transaction> = transactions
            .iter()
            .filter(|tx| filter.matches(tx, &category_names))
            .collect();
        let total: i64 = matched.iter().map(|tx| tx.amount).sum();

        json_result(&json!({
            "account": account.name,
            "startDate": start.to_string(),
            "endDate": end.to_string(),
            "count": matched.len(),
            "total": total,
            "formattedTotal": format_amount(total),
            "truncated": matched.len() > limit,
            "transactions": matched.into_iter().take(limit).collect::<Vec<_>>(),
        }))
    }
}

/// Add a transaction to an account.
pub struct CreateTransactionTool {
    backend: BackendClient,
}

impl CreateTransactionTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for CreateTransactionTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "create-transaction".to_string(),
            description: "Create a transaction. Negative amounts are outflows.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "accountId": { "type": "string", "description": "Account id or name" },
                    "date": { "type": "string", "description": "Date YYYY-MM-DD" },
                    "amount": { "type": "integer", "description": "Amount in cents" },
                    "payee": { "type": "string", "description": "Existing payee id" },
                    "payeeName": {
                        "type": "string",
                        "description": "Payee name; created if it does not exist"
                    },
                    "category": { "type": "string", "description": "Category id" },
                    "notes": { "type": "string", "description": "Notes" },
                    "cleared": { "type": "boolean", "description": "Cleared flag (default: false)" }
                },
                "required": ["accountId", "date", "amount"]
            }),
        }
    }

    fn mutates(&self) -> bool {
        true
    }

    async fn execute(&self, args: HashMap<String, Value>, _ctx: &ToolContext) -> Result<ToolResult> {
        let account = resolve_account(&self.backend, &get_string_arg(&args, "accountId")?).await?;
        let tx = NewTransaction {
            date: get_date_arg(&args, "date")?,
            amount: get_int_arg(&args, "amount")?,
            payee: get_optional_string_arg(&args, "payee"),
            payee_name: get_optional_string_arg(&args, "payeeName"),
            category: get_optional_string_arg(&args, "category"),
            notes: get_optional_string_arg(&args, "notes"),
            cleared: get_bool_arg(&args, "cleared", false),
        };
        let amount = tx.amount;
        let id = self.backend.create_transaction(&account.id, tx).await?;

        Ok(success_result(format!(
            "Created transaction {} of {} in {}",
            id,
            format_amount(amount),
            account.name
        )))
    }
}

/// Edit a transaction.
pub struct UpdateTransactionTool {
    backend: BackendClient,
}

impl UpdateTransactionTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for UpdateTransactionTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "update-transaction".to_string(),
            description: "Update fields of an existing transaction.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Transaction id" },
                    "date": { "type": "string", "description": "Date YYYY-MM-DD" },
                    "amount": { "type": "integer", "description": "Amount in cents" },
                    "payee": { "type": "string", "description": "Payee id" },
                    "category": { "type": "string", "description": "Category id" },
                    "notes": { "type": "string", "description": "Notes" },
                    "cleared": { "type": "boolean", "description": "Cleared flag" }
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
        let update = TransactionUpdate {
            date: get_optional_date_arg(&args, "date")?,
            amount: get_optional_int_arg(&args, "amount"),
            payee: get_optional_string_arg(&args, "payee"),
            category: get_optional_string_arg(&args, "category"),
            notes: get_optional_string_arg(&args, "notes"),
            cleared: get_optional_bool_arg(&args, "cleared"),
        };

        self.backend.update_transaction(&id, update).await?;
        Ok(success_result(format!("Updated transaction {}", id)))
    }
}

/// Delete a transaction.
pub struct DeleteTransactionTool {
    backend: BackendClient,
}

impl DeleteTransactionTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for DeleteTransactionTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "delete-transaction".to_string(),
            description: "Delete a transaction.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Transaction id" }
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
        self.backend.delete_transaction(&id).await?;
        Ok(success_result(format!("Deleted transaction {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[tokio::test]
    async fn test_filters_and_totals() {
        let (backend, api) = backend();
        let account = api.seed_account("Checking", false).await;
        let group = api.seed_group("Everyday", false).await;
        let food = api.seed_category("Food", &group).await;
        api.seed_transaction(&account, day(1), -2_500, Some(food.as_str()), Some("Grocer"))
            .await;
        api.seed_transaction(&account, day(2), -9_000, None, Some("Landlord"))
            .await;
        api.seed_transaction(&account, day(3), 100_000, None, Some("Employer"))
            .await;

        let tool = GetTransactionsTool::new(backend);
        let result = json(
            &tool
                .execute(
                    args(json!({
                        "accountId": "Checking",
                        "startDate": "2024-03-01",
                        "endDate": "2024-03-31",
                        "category": "food"
                    })),
                    &ToolContext::default(),
                )
                .await
                .unwrap(),
        );
        assert_eq!(result["count"], 1);
        assert_eq!(result["formattedTotal"], "-25.00");

        let outflows = json(
            &tool
                .execute(
                    args(json!({
                        "accountId": "Checking",
                        "startDate": "2024-03-01",
                        "endDate": "2024-03-31",
                        "maxAmount": 0,
                        "limit": 1
                    })),
                    &ToolContext::default(),
                )
                .await
                .unwrap(),
        );
        assert_eq!(outflows["count"], 2);
        assert_eq!(outflows["truncated"], true);
        assert_eq!(outflows["transactions"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_inverted_range() {
        let (backend, api) = backend();
        api.seed_account("Checking", false).await;

        let err = GetTransactionsTool::new(backend)
            .execute(
                args(json!({
                    "accountId": "Checking",
                    "startDate": "2024-03-10",
                    "endDate": "2024-03-01"
                })),
                &ToolContext::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidToolArguments(_)));
    }

    #[tokio::test]
    async fn test_create_update_delete() {
        let (backend, api) = backend();
        let account = api.seed_account("Checking", false).await;

        CreateTransactionTool::new(backend.clone())
            .execute(
                args(json!({"accountId": &account, "date": "2024-03-05", "amount": -1234})),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        let txs = backend.get_transactions(&account, day(1), day(31)).await.unwrap();
        assert_eq!(txs.len(), 1);
        let id = txs[0].id.clone();

        UpdateTransactionTool::new(backend.clone())
            .execute(args(json!({"id": id, "amount": -2000})), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(backend.get_account_balance(&account, None).await.unwrap(), -2000);

        DeleteTransactionTool::new(backend.clone())
            .execute(args(json!({"id": id})), &ToolContext::default())
            .await
            .unwrap();
        assert!(backend.get_transactions(&account, day(1), day(31)).await.unwrap().is_empty());
    }
}

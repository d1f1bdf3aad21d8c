//! Budget month and derived reports.
//!
//! Reports are computed from raw transactions of on-budget, open accounts.
//! Split parents are replaced by their subtransactions and transfers between
//! accounts are ignored.

use async_trait::async_trait;
use chrono::{Datelike, Local, Months, NaiveDate};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};

use crate::backend::{format_amount, Account, BackendClient, Category, Transaction};
use crate::error::{Error, Result};
use crate::mcp::handler::{
    get_bool_arg, get_optional_date_arg, get_optional_int_arg, get_optional_string_arg,
    get_string_arg, json_result, ToolContext, ToolHandler,
};
use crate::mcp::progress::ProgressReporter;
use crate::mcp::protocol::{Tool, ToolResult};
use crate::tools::{flatten_splits, resolve_account};

const MAX_MONTHS: i64 = 24;

fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn month_end(start: NaiveDate) -> Result<NaiveDate> {
    start
        .checked_add_months(Months::new(1))
        .and_then(|d| d.pred_opt())
        .ok_or_else(|| Error::Internal(format!("no month end for {}", start)))
}

fn month_key(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

/// First days of the last `months` months, oldest first, ending with the
/// month containing `today`.
fn month_starts(today: NaiveDate, months: u32) -> Result<Vec<NaiveDate>> {
    let current = month_start(today);
    (0..months)
        .rev()
        .map(|back| {
            current
                .checked_sub_months(Months::new(back))
                .ok_or_else(|| Error::Internal(format!("date out of range: {} - {}m", current, back)))
        })
        .collect()
}

fn months_arg(args: &HashMap<String, Value>, default: i64) -> Result<u32> {
    let months = get_optional_int_arg(args, "months").unwrap_or(default);
    if !(1..=MAX_MONTHS).contains(&months) {
        return Err(Error::InvalidToolArguments(format!(
            "months must be between 1 and {}, got {}",
            MAX_MONTHS, months
        )));
    }
    Ok(months as u32)
}

/// On-budget open accounts, which are the ones that count toward the budget.
async fn budget_accounts(backend: &BackendClient) -> Result<Vec<Account>> {
    Ok(backend
        .get_accounts()
        .await?
        .into_iter()
        .filter(|a| !a.offbudget && !a.closed)
        .collect())
}

/// Transactions of every budget account in `[start, end]`, flattened and
/// without transfers. Reports one progress step per account.
async fn budget_transactions(
    backend: &BackendClient,
    start: NaiveDate,
    end: NaiveDate,
    progress: Option<&ProgressReporter>,
) -> Result<Vec<Transaction>> {
    let accounts = budget_accounts(backend).await?;
    let progress = progress.map(|p| p.with_total(accounts.len() as u64));

    let mut all = Vec::new();
    for (i, account) in accounts.iter().enumerate() {
        let transactions = backend.get_transactions(&account.id, start, end).await?;
        all.extend(
            flatten_splits(transactions)
                .into_iter()
                .filter(|tx| !tx.is_transfer()),
        );
        if let Some(p) = &progress {
            p.report(i as u64 + 1, Some(&format!("Loaded {}", account.name)));
        }
    }
    Ok(all)
}

/// Budgeted and spent amounts for a month.
pub struct GetBudgetMonthTool {
    backend: BackendClient,
}

impl GetBudgetMonthTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for GetBudgetMonthTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "get-budget-month".to_string(),
            description: "Get budgeted, spent and remaining amounts per category for a month."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "month": {
                        "type": "string",
                        "description": "Month formatted YYYY-MM (default: current month)"
                    }
                },
                "required": []
            }),
        }
    }

    async fn execute(&self, args: HashMap<String, Value>, _ctx: &ToolContext) -> Result<ToolResult> {
        let month = match get_optional_string_arg(&args, "month") {
            Some(m) => {
                NaiveDate::parse_from_str(&format!("{}-01", m), "%Y-%m-%d").map_err(|_| {
                    Error::InvalidToolArguments(format!(
                        "month must be formatted YYYY-MM, got {:?}",
                        m
                    ))
                })?;
                m
            }
            None => month_key(Local::now().date_naive()),
        };

        json_result(&self.backend.get_budget_month(&month).await?)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CategorySpending {
    id: Option<String>,
    name: String,
    amount: i64,
    formatted_amount: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GroupSpending {
    name: String,
    total: i64,
    formatted_total: String,
    categories: Vec<CategorySpending>,
}

/// Spending grouped by category group over a date range.
pub struct SpendingByCategoryTool {
    backend: BackendClient,
}

impl SpendingByCategoryTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for SpendingByCategoryTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "spending-by-category".to_string(),
            description: "Total spending per category, grouped by category group, over a date \
                range. Transfers are excluded."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "startDate": {
                        "type": "string",
                        "description": "Start date YYYY-MM-DD (default: first day of this month)"
                    },
                    "endDate": {
                        "type": "string",
                        "description": "End date YYYY-MM-DD (default: today)"
                    },
                    "includeIncome": {
                        "type": "boolean",
                        "description": "Include income categories (default: false)"
                    }
                },
                "required": []
            }),
        }
    }

    async fn execute(&self, args: HashMap<String, Value>, ctx: &ToolContext) -> Result<ToolResult> {
        let today = Local::now().date_naive();
        let start = get_optional_date_arg(&args, "startDate")?.unwrap_or_else(|| month_start(today));
        let end = get_optional_date_arg(&args, "endDate")?.unwrap_or(today);
        if start > end {
            return Err(Error::InvalidToolArguments(
                "startDate must not be after endDate".to_string(),
            ));
        }
        let include_income = get_bool_arg(&args, "includeIncome", false);

        let categories: HashMap<String, Category> = self
            .backend
            .get_categories()
            .await?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        let group_names: HashMap<String, String> = self
            .backend
            .get_category_groups()
            .await?
            .into_iter()
            .map(|g| (g.id, g.name))
            .collect();

        let transactions =
            budget_transactions(&self.backend, start, end, ctx.progress.as_ref()).await?;

        // group name -> (category id, category name) -> amount
        let mut grouped: BTreeMap<String, BTreeMap<(Option<String>, String), i64>> = BTreeMap::new();
        for tx in &transactions {
            let category = tx.category.as_ref().and_then(|id| categories.get(id));
            if category.is_some_and(|c| c.is_income) && !include_income {
                continue;
            }
            let (group, key) = match category {
                Some(c) => (
                    group_names
                        .get(&c.group_id)
                        .cloned()
                        .unwrap_or_else(|| "Unknown group".to_string()),
                    (Some(c.id.clone()), c.name.clone()),
                ),
                None => ("Uncategorized".to_string(), (None, "Uncategorized".to_string())),
            };
            *grouped.entry(group).or_default().entry(key).or_default() += tx.amount;
        }

        let mut groups: Vec<GroupSpending> = grouped
            .into_iter()
            .map(|(name, cats)| {
                let mut categories: Vec<CategorySpending> = cats
                    .into_iter()
                    .map(|((id, name), amount)| CategorySpending {
                        id,
                        name,
                        amount,
                        formatted_amount: format_amount(amount),
                    })
                    .collect();
                categories.sort_by_key(|c| c.amount);
                let total = categories.iter().map(|c| c.amount).sum();
                GroupSpending {
                    name,
                    total,
                    formatted_total: format_amount(total),
                    categories,
                }
            })
            .collect();
        groups.sort_by_key(|g| g.total);

        let total: i64 = groups.iter().map(|g| g.total).sum();
        json_result(&json!({
            "startDate": start.to_string(),
            "endDate": end.to_string(),
            "total": total,
            "formattedTotal": format_amount(total),
            "groups": groups,
        }))
    }
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct MonthTotals {
    month: String,
    income: i64,
    expenses: i64,
    net: i64,
}

/// Income, expenses and net per month.
pub struct MonthlySummaryTool {
    backend: BackendClient,
}

impl MonthlySummaryTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for MonthlySummaryTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "monthly-summary".to_string(),
            description: "Income, expenses and net cash flow per month for recent months."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "months": {
                        "type": "integer",
                        "description": "Number of months including the current one (default: 3, max: 24)"
                    }
                },
                "required": []
            }),
        }
    }

    async fn execute(&self, args: HashMap<String, Value>, ctx: &ToolContext) -> Result<ToolResult> {
        let months = months_arg(&args, 3)?;
        let today = Local::now().date_naive();
        let starts = month_starts(today, months)?;
        let first = starts.first().copied().unwrap_or_else(|| month_start(today));

        let income_categories: Vec<String> = self
            .backend
            .get_categories()
            .await?
            .into_iter()
            .filter(|c| c.is_income)
            .map(|c| c.id)
            .collect();

        let mut totals: BTreeMap<String, MonthTotals> = starts
            .iter()
            .map(|s| {
                let key = month_key(*s);
                (
                    key.clone(),
                    MonthTotals {
                        month: key,
                        ..Default::default()
                    },
                )
            })
            .collect();

        for tx in budget_transactions(&self.backend, first, today, ctx.progress.as_ref()).await? {
            let Some(entry) = totals.get_mut(&month_key(tx.date)) else {
                continue;
            };
            let is_income = tx
                .category
                .as_ref()
                .is_some_and(|c| income_categories.contains(c));
            if is_income {
                entry.income += tx.amount;
            } else {
                entry.expenses += tx.amount;
            }
            entry.net += tx.amount;
        }

        let months: Vec<MonthTotals> = totals.into_values().collect();
        let income: i64 = months.iter().map(|m| m.income).sum();
        let expenses: i64 = months.iter().map(|m| m.expenses).sum();
        json_result(&json!({
            "months": months,
            "totalIncome": income,
            "totalExpenses": expenses,
            "totalNet": income + expenses,
            "averageNet": (income + expenses) / months.len().max(1) as i64,
        }))
    }
}

/// Month-end balances for one account.
pub struct BalanceHistoryTool {
    backend: BackendClient,
}

impl BalanceHistoryTool {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for BalanceHistoryTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "balance-history".to_string(),
            description: "Balance of an account at the end of each recent month.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "accountId": { "type": "string", "description": "Account id or name" },
                    "months": {
                        "type": "integer",
                        "description": "Number of months including the current one (default: 6, max: 24)"
                    }
                },
                "required": ["accountId"]
            }),
        }
    }

    async fn execute(&self, args: HashMap<String, Value>, _ctx: &ToolContext) -> Result<ToolResult> {
        let account = resolve_account(&self.backend, &get_string_arg(&args, "accountId")?).await?;
        let months = months_arg(&args, 6)?;
        let today = Local::now().date_naive();
        let starts = month_starts(today, months)?;
        let first = starts.first().copied().unwrap_or_else(|| month_start(today));

        let current = self.backend.get_account_balance(&account.id, None).await?;
        let transactions = self
            .backend
            .get_transactions(&account.id, first, today)
            .await?;

        // Walk back from the current balance: a month-end balance is the
        // current balance minus everything dated after that month end.
        let mut history = Vec::with_capacity(starts.len());
        for start in &starts {
            let end = month_end(*start)?.min(today);
            let later: i64 = transactions
                .iter()
                .filter(|tx| tx.date > end)
                .map(|tx| tx.amount)
                .sum();
            let balance = current - later;
            history.push(json!({
                "month": month_key(*start),
                "date": end.to_string(),
                "balance": balance,
                "formattedBalance": format_amount(balance),
            }));
        }

        json_result(&json!({
            "accountId": account.id,
            "name": account.name,
            "history": history,
        }))
    }
}

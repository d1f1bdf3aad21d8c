//! Budget tools.
//!
//! - `accounts` - Account listing, balances and account management
//! - `transactions` - Transaction queries and edits
//! - `categories` - Categories and category groups
//! - `payees` - Payee management
//! - `rules` - Transaction rules
//! - `reports` - Budget month and derived spending reports
//! - `sync` - Re-download the budget from the server
//!
//! Read tools are always registered. Tools that change budget data are
//! registered only when writes are enabled.

pub mod accounts;
pub mod categories;
pub mod payees;
pub mod reports;
pub mod rules;
pub mod sync;
pub mod transactions;

use crate::backend::{Account, BackendClient, Transaction};
use crate::error::{Error, Result};
use crate::mcp::handler::McpHandler;

/// Register all tools with the handler.
pub fn register_all_tools(handler: &mut McpHandler, backend: &BackendClient, enable_write: bool) {
    // Read tools (11)
    handler.register(accounts::GetAccountsTool::new(backend.clone()));
    handler.register(accounts::GetAccountBalanceTool::new(backend.clone()));
    handler.register(transactions::GetTransactionsTool::new(backend.clone()));
    handler.register(categories::GetGroupedCategoriesTool::new(backend.clone()));
    handler.register(payees::GetPayeesTool::new(backend.clone()));
    handler.register(rules::GetRulesTool::new(backend.clone()));
    handler.register(reports::GetBudgetMonthTool::new(backend.clone()));
    handler.register(reports::SpendingByCategoryTool::new(backend.clone()));
    handler.register(reports::MonthlySummaryTool::new(backend.clone()));
    handler.register(reports::BalanceHistoryTool::new(backend.clone()));
    handler.register(sync::SyncBudgetTool::new(backend.clone()));

    if !enable_write {
        return;
    }

    // Account writes (5)
    handler.register(accounts::CreateAccountTool::new(backend.clone()));
    handler.register(accounts::UpdateAccountTool::new(backend.clone()));
    handler.register(accounts::CloseAccountTool::new(backend.clone()));
    handler.register(accounts::ReopenAccountTool::new(backend.clone()));
    handler.register(accounts::DeleteAccountTool::new(backend.clone()));

    // Transaction writes (3)
    handler.register(transactions::CreateTransactionTool::new(backend.clone()));
    handler.register(transactions::UpdateTransactionTool::new(backend.clone()));
    handler.register(transactions::DeleteTransactionTool::new(backend.clone()));

    // Category writes (6)
    handler.register(categories::CreateCategoryTool::new(backend.clone()));
    handler.register(categories::UpdateCategoryTool::new(backend.clone()));
    handler.register(categories::DeleteCategoryTool::new(backend.clone()));
    handler.register(categories::CreateCategoryGroupTool::new(backend.clone()));
    handler.register(categories::UpdateCategoryGroupTool::new(backend.clone()));
    handler.register(categories::DeleteCategoryGroupTool::new(backend.clone()));

    // Payee writes (3)
    handler.register(payees::CreatePayeeTool::new(backend.clone()));
    handler.register(payees::UpdatePayeeTool::new(backend.clone()));
    handler.register(payees::DeletePayeeTool::new(backend.clone()));

    // Rule writes (3)
    handler.register(rules::CreateRuleTool::new(backend.clone()));
    handler.register(rules::UpdateRuleTool::new(backend.clone()));
    handler.register(rules::DeleteRuleTool::new(backend.clone()));
}

/// Find an account by id, or failing that by case-insensitive name.
pub(crate) async fn resolve_account(backend: &BackendClient, id_or_name: &str) -> Result<Account> {
    let accounts = backend.get_accounts().await?;
    if let Some(account) = accounts.iter().find(|a| a.id == id_or_name) {
        return Ok(account.clone());
    }
    accounts
        .into_iter()
        .find(|a| a.name.eq_ignore_ascii_case(id_or_name))
        .ok_or_else(|| Error::NotFound(format!("account {}", id_or_name)))
}

/// Replace split parents by their subtransactions.
pub(crate) fn flatten_splits(transactions: Vec<Transaction>) -> Vec<Transaction> {
    transactions
        .into_iter()
        .flat_map(|tx| {
            if tx.subtransactions.is_empty() {
                vec![tx]
            } else {
                tx.subtransactions
            }
        })
        .collect()
}

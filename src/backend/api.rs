//! The budget server boundary.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::backend::types::*;
use crate::config::ValidatedBackendConfig;
use crate::error::Result;

/// Flat method surface of a remote budget server.
///
/// Implementations do not manage their own lifecycle; [`BackendClient`]
/// decides when `init`, `download_budget` and `shutdown` run.
///
/// [`BackendClient`]: crate::backend::BackendClient
#[async_trait]
pub trait BudgetApi: Send + Sync {
    /// Open a connection to the server and authenticate.
    async fn init(&self, config: &ValidatedBackendConfig) -> Result<()>;

    /// Fetch the budget identified by `config.sync_id`.
    async fn download_budget(&self, config: &ValidatedBackendConfig) -> Result<()>;

    /// Flush pending changes and close the connection.
    async fn shutdown(&self) -> Result<()>;

    // ===== Accounts =====

    async fn get_accounts(&self) -> Result<Vec<Account>>;
    async fn create_account(&self, account: NewAccount, initial_balance: i64) -> Result<String>;
    async fn update_account(&self, id: &str, update: AccountUpdate) -> Result<()>;
    async fn close_account(&self, id: &str) -> Result<()>;
    async fn reopen_account(&self, id: &str) -> Result<()>;
    async fn delete_account(&self, id: &str) -> Result<()>;
    async fn get_account_balance(&self, id: &str, cutoff: Option<NaiveDate>) -> Result<i64>;

    // ===== Transactions =====

    async fn get_transactions(
        &self,
        account_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Transaction>>;
    async fn create_transaction(&self, account_id: &str, tx: NewTransaction) -> Result<String>;
    async fn update_transaction(&self, id: &str, update: TransactionUpdate) -> Result<()>;
    async fn delete_transaction(&self, id: &str) -> Result<()>;

    // ===== Categories =====

    async fn get_categories(&self) -> Result<Vec<Category>>;
    async fn get_category_groups(&self) -> Result<Vec<CategoryGroup>>;
    async fn create_category(&self, category: NewCategory) -> Result<String>;
    async fn update_category(&self, id: &str, update: CategoryUpdate) -> Result<()>;
    async fn delete_category(&self, id: &str) -> Result<()>;
    async fn create_category_group(&self, group: NewCategoryGroup) -> Result<String>;
    async fn update_category_group(&self, id: &str, update: CategoryUpdate) -> Result<()>;
    async fn delete_category_group(&self, id: &str) -> Result<()>;

    // ===== Payees =====

    async fn get_payees(&self) -> Result<Vec<Payee>>;
    async fn create_payee(&self, name: &str) -> Result<String>;
    async fn update_payee(&self, id: &str, name: &str) -> Result<()>;
    async fn delete_payee(&self, id: &str) -> Result<()>;

    // ===== Rules =====

    async fn get_rules(&self) -> Result<Vec<Rule>>;
    async fn create_rule(&self, rule: NewRule) -> Result<Rule>;
    async fn update_rule(&self, rule: Rule) -> Result<Rule>;
    async fn delete_rule(&self, id: &str) -> Result<()>;

    // ===== Budget =====

    /// Budget figures for a month formatted `YYYY-MM`.
    async fn get_budget_month(&self, month: &str) -> Result<BudgetMonth>;
}

//! In-process budget implementation.
//!
//! Holds a whole budget in memory behind the same [`BudgetApi`] surface as
//! the HTTP client. Lifecycle calls are counted so callers can observe how
//! often the connection was opened and closed.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::backend::api::BudgetApi;
use crate::backend::types::*;
use crate::config::ValidatedBackendConfig;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct Budget {
    accounts: BTreeMap<String, Account>,
    transactions: BTreeMap<String, Transaction>,
    groups: BTreeMap<String, CategoryGroup>,
    categories: BTreeMap<String, Category>,
    payees: BTreeMap<String, Payee>,
    rules: BTreeMap<String, Rule>,
}

/// Budget API backed by in-memory maps.
#[derive(Debug, Default)]
pub struct InMemoryBudgetApi {
    budget: RwLock<Budget>,
    init_calls: AtomicUsize,
    download_calls: AtomicUsize,
    shutdown_calls: AtomicUsize,
    fail_init: AtomicBool,
    fail_shutdown: AtomicBool,
    lifecycle_delay: RwLock<Option<Duration>>,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn not_found(kind: &str, id: &str) -> Error {
    Error::NotFound(format!("{} {}", kind, id))
}

impl InMemoryBudgetApi {
    /// Create an empty budget.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `init` calls so far.
    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    /// Number of `download_budget` calls so far.
    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    /// Number of `shutdown` calls so far.
    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }

    /// Make subsequent `init` calls fail with a backend error.
    pub fn set_fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `shutdown` calls fail with a backend error.
    pub fn set_fail_shutdown(&self, fail: bool) {
        self.fail_shutdown.store(fail, Ordering::SeqCst);
    }

    /// Delay every lifecycle call, widening windows for concurrent callers.
    pub async fn set_lifecycle_delay(&self, delay: Option<Duration>) {
        *self.lifecycle_delay.write().await = delay;
    }

    async fn pause(&self) {
        let delay = *self.lifecycle_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Seed an account directly, bypassing the lifecycle.
    pub async fn seed_account(&self, name: &str, offbudget: bool) -> String {
        let id = new_id();
        self.budget.write().await.accounts.insert(
            id.clone(),
            Account {
                id: id.clone(),
                name: name.to_string(),
                offbudget,
                closed: false,
            },
        );
        id
    }

    /// Seed a category group directly.
    pub async fn seed_group(&self, name: &str, is_income: bool) -> String {
        let id = new_id();
        self.budget.write().await.groups.insert(
            id.clone(),
            CategoryGroup {
                id: id.clone(),
                name: name.to_string(),
                is_income,
                hidden: false,
                categories: Vec::new(),
            },
        );
        id
    }

    /// Seed a category directly.
    pub async fn seed_category(&self, name: &str, group_id: &str) -> String {
        let id = new_id();
        let mut budget = self.budget.write().await;
        let is_income = budget
            .groups
            .get(group_id)
            .map(|g| g.is_income)
            .unwrap_or(false);
        budget.categories.insert(
            id.clone(),
            Category {
                id: id.clone(),
                name: name.to_string(),
                group_id: group_id.to_string(),
                is_income,
                hidden: false,
            },
        );
        id
    }

    /// Seed a transaction directly.
    pub async fn seed_transaction(
        &self,
        account_id: &str,
        date: NaiveDate,
        amount: i64,
        category: Option<&str>,
        payee_name: Option<&str>,
    ) -> String {
        let id = new_id();
        self.budget.write().await.transactions.insert(
            id.clone(),
            Transaction {
                id: id.clone(),
                account: account_id.to_string(),
                date,
                amount,
                payee: None,
                payee_name: payee_name.map(String::from),
                category: category.map(String::from),
                notes: None,
                cleared: true,
                transfer_id: None,
                subtransactions: Vec::new(),
            },
        );
        id
    }
}

#[async_trait]
impl BudgetApi for InMemoryBudgetApi {
    async fn init(&self, _config: &ValidatedBackendConfig) -> Result<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(Error::Backend("connection refused".to_string()));
        }
        Ok(())
    }

    async fn download_budget(&self, _config: &ValidatedBackendConfig) -> Result<()> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_shutdown.load(Ordering::SeqCst) {
            return Err(Error::Backend("sync failed".to_string()));
        }
        Ok(())
    }

    // ===== Accounts =====

    async fn get_accounts(&self) -> Result<Vec<Account>> {
        Ok(self.budget.read().await.accounts.values().cloned().collect())
    }

    async fn create_account(&self, account: NewAccount, initial_balance: i64) -> Result<String> {
        let id = new_id();
        let mut budget = self.budget.write().await;
        budget.accounts.insert(
            id.clone(),
            Account {
                id: id.clone(),
                name: account.name,
                offbudget: account.offbudget,
                closed: false,
            },
        );
        if initial_balance != 0 {
            let tx_id = new_id();
            budget.transactions.insert(
                tx_id.clone(),
                Transaction {
                    id: tx_id,
                    account: id.clone(),
                    date: chrono::Local::now().date_naive(),
                    amount: initial_balance,
                    payee: None,
                    payee_name: Some("Starting Balance".to_string()),
                    category: None,
                    notes: None,
                    cleared: true,
                    transfer_id: None,
                    subtransactions: Vec::new(),
                },
            );
        }
        Ok(id)
    }

    async fn update_account(&self, id: &str, update: AccountUpdate) -> Result<()> {
        let mut budget = self.budget.write().await;
        let account = budget
            .accounts
            .get_mut(id)
            .ok_or_else(|| not_found("account", id))?;
        if let Some(name) = update.name {
            account.name = name;
        }
        if let Some(offbudget) = update.offbudget {
            account.offbudget = offbudget;
        }
        Ok(())
    }

    async fn close_account(&self, id: &str) -> Result<()> {
        let mut budget = self.budget.write().await;
        let account = budget
            .accounts
            .get_mut(id)
            .ok_or_else(|| not_found("account", id))?;
        account.closed = true;
        Ok(())
    }

    async fn reopen_account(&self, id: &str) -> Result<()> {
        let mut budget = self.budget.write().await;
        let account = budget
            .accounts
            .get_mut(id)
            .ok_or_else(|| not_found("account", id))?;
        account.closed = false;
        Ok(())
    }

    async fn delete_account(&self, id: &str) -> Result<()> {
        let mut budget = self.budget.write().await;
        budget
            .accounts
            .remove(id)
            .ok_or_else(|| not_found("account", id))?;
        budget.transactions.retain(|_, tx| tx.account != id);
        Ok(())
    }

    async fn get_account_balance(&self, id: &str, cutoff: Option<NaiveDate>) -> Result<i64> {
        let budget = self.budget.read().await;
        if !budget.accounts.contains_key(id) {
            return Err(not_found("account", id));
        }
        Ok(budget
            .transactions
            .values()
            .filter(|tx| tx.account == id)
            .filter(|tx| cutoff.is_none_or(|c| tx.date <= c))
            .map(|tx| tx.amount)
            .sum())
    }

    // ===== Transactions =====

    async fn get_transactions(
        &self,
        account_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Transaction>> {
        let budget = self.budget.read().await;
        if !budget.accounts.contains_key(account_id) {
            return Err(not_found("account", account_id));
        }
        let mut transactions: Vec<Transaction> = budget
            .transactions
            .values()
            .filter(|tx| tx.account == account_id && tx.date >= start && tx.date <= end)
            .cloned()
            .collect();
        transactions.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(transactions)
    }

    async fn create_transaction(&self, account_id: &str, tx: NewTransaction) -> Result<String> {
        let mut budget = self.budget.write().await;
        if !budget.accounts.contains_key(account_id) {
            return Err(not_found("account", account_id));
        }
        let id = new_id();
        budget.transactions.insert(
            id.clone(),
            Transaction {
                id: id.clone(),
                account: account_id.to_string(),
                date: tx.date,
                amount: tx.amount,
                payee: tx.payee,
                payee_name: tx.payee_name,
                category: tx.category,
                notes: tx.notes,
                cleared: tx.cleared,
                transfer_id: None,
                subtransactions: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn update_transaction(&self, id: &str, update: TransactionUpdate) -> Result<()> {
        let mut budget = self.budget.write().await;
        let tx = budget
            .transactions
            .get_mut(id)
            .ok_or_else(|| not_found("transaction", id))?;
        if let Some(date) = update.date {
            tx.date = date;
        }
        if let Some(amount) = update.amount {
            tx.amount = amount;
        }
        if update.payee.is_some() {
            tx.payee = update.payee;
        }
        if update.category.is_some() {
            tx.category = update.category;
        }
        if update.notes.is_some() {
            tx.notes = update.notes;
        }
        if let Some(cleared) = update.cleared {
            tx.cleared = cleared;
        }
        Ok(())
    }

    async fn delete_transaction(&self, id: &str) -> Result<()> {
        self.budget
            .write()
            .await
            .transactions
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| not_found("transaction", id))
    }

    // ===== Categories =====

    async fn get_categories(&self) -> Result<Vec<Category>> {
        Ok(self.budget.read().await.categories.values().cloned().collect())
    }

    async fn get_category_groups(&self) -> Result<Vec<CategoryGroup>> {
        let budget = self.budget.read().await;
        Ok(budget
            .groups
            .values()
            .map(|group| CategoryGroup {
                categories: budget
                    .categories
                    .values()
                    .filter(|c| c.group_id == group.id)
                    .cloned()
                    .collect(),
                ..group.clone()
            })
            .collect())
    }

    async fn create_category(&self, category: NewCategory) -> Result<String> {
        let mut budget = self.budget.write().await;
        let is_income = budget
            .groups
            .get(&category.group_id)
            .map(|g| g.is_income)
            .ok_or_else(|| not_found("category group", &category.group_id))?;
        let id = new_id();
        budget.categories.insert(
            id.clone(),
            Category {
                id: id.clone(),
                name: category.name,
                group_id: category.group_id,
                is_income,
                hidden: false,
            },
        );
        Ok(id)
    }

    async fn update_category(&self, id: &str, update: CategoryUpdate) -> Result<()> {
        let mut budget = self.budget.write().await;
        if let Some(group_id) = &update.group_id {
            if !budget.groups.contains_key(group_id) {
                return Err(not_found("category group", group_id));
            }
        }
        let category = budget
            .categories
            .get_mut(id)
            .ok_or_else(|| not_found("category", id))?;
        if let Some(name) = update.name {
            category.name = name;
        }
        if let Some(group_id) = update.group_id {
            category.group_id = group_id;
        }
        if let Some(hidden) = update.hidden {
            category.hidden = hidden;
        }
        Ok(())
    }

    async fn delete_category(&self, id: &str) -> Result<()> {
        let mut budget = self.budget.write().await;
        budget
            .categories
            .remove(id)
            .ok_or_else(|| not_found("category", id))?;
        for tx in budget.transactions.values_mut() {
            if tx.category.as_deref() == Some(id) {
                tx.category = None;
            }
        }
        Ok(())
    }

    async fn create_category_group(&self, group: NewCategoryGroup) -> Result<String> {
        let id = new_id();
        self.budget.write().await.groups.insert(
            id.clone(),
            CategoryGroup {
                id: id.clone(),
                name: group.name,
                is_income: group.is_income,
                hidden: false,
                categories: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn update_category_group(&self, id: &str, update: CategoryUpdate) -> Result<()> {
        let mut budget = self.budget.write().await;
        let group = budget
            .groups
            .get_mut(id)
            .ok_or_else(|| not_found("category group", id))?;
        if let Some(name) = update.name {
            group.name = name;
        }
        if let Some(hidden) = update.hidden {
            group.hidden = hidden;
        }
        Ok(())
    }

    async fn delete_category_group(&self, id: &str) -> Result<()> {
        let mut budget = self.budget.write().await;
        budget
            .groups
            .remove(id)
            .ok_or_else(|| not_found("category group", id))?;
        budget.categories.retain(|_, c| c.group_id != id);
        Ok(())
    }

    // ===== Payees =====

    async fn get_payees(&self) -> Result<Vec<Payee>> {
        Ok(self.budget.read().await.payees.values().cloned().collect())
    }

    async fn create_payee(&self, name: &str) -> Result<String> {
        let id = new_id();
        self.budget.write().await.payees.insert(
            id.clone(),
            Payee {
                id: id.clone(),
                name: name.to_string(),
                transfer_acct: None,
            },
        );
        Ok(id)
    }

    async fn update_payee(&self, id: &str, name: &str) -> Result<()> {
        let mut budget = self.budget.write().await;
        let payee = budget
            .payees
            .get_mut(id)
            .ok_or_else(|| not_found("payee", id))?;
        payee.name = name.to_string();
        Ok(())
    }

    async fn delete_payee(&self, id: &str) -> Result<()> {
        self.budget
            .write()
            .await
            .payees
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| not_found("payee", id))
    }

    // ===== Rules =====

    async fn get_rules(&self) -> Result<Vec<Rule>> {
        Ok(self.budget.read().await.rules.values().cloned().collect())
    }

    async fn create_rule(&self, rule: NewRule) -> Result<Rule> {
        let rule = Rule {
            id: new_id(),
            stage: rule.stage,
            conditions_op: rule.conditions_op,
            conditions: rule.conditions,
            actions: rule.actions,
        };
        self.budget
            .write()
            .await
            .rules
            .insert(rule.id.clone(), rule.clone());
        Ok(rule)
    }

    async fn update_rule(&self, rule: Rule) -> Result<Rule> {
        let mut budget = self.budget.write().await;
        let existing = budget
            .rules
            .get_mut(&rule.id)
            .ok_or_else(|| not_found("rule", &rule.id))?;
        *existing = rule.clone();
        Ok(rule)
    }

    async fn delete_rule(&self, id: &str) -> Result<()> {
        self.budget
            .write()
            .await
            .rules
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| not_found("rule", id))
    }

    // ===== Budget =====

    async fn get_budget_month(&self, month: &str) -> Result<BudgetMonth> {
        let budget = self.budget.read().await;
        let in_month = |tx: &&Transaction| tx.date.format("%Y-%m").to_string() == month;

        let categories: Vec<BudgetCategoryAmounts> = budget
            .categories
            .values()
            .filter(|c| !c.is_income)
            .map(|c| {
                let spent: i64 = budget
                    .transactions
                    .values()
                    .filter(in_month)
                    .filter(|tx| tx.category.as_deref() == Some(c.id.as_str()))
                    .map(|tx| tx.amount)
                    .sum();
                BudgetCategoryAmounts {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    budgeted: 0,
                    spent,
                    balance: spent,
                }
            })
            .collect();

        let income_available: i64 = budget
            .transactions
            .values()
            .filter(in_month)
            .filter(|tx| {
                tx.category
                    .as_ref()
                    .and_then(|id| budget.categories.get(id))
                    .is_some_and(|c| c.is_income)
            })
            .map(|tx| tx.amount)
            .sum();
        let total_spent = categories.iter().map(|c| c.spent).sum();

        Ok(BudgetMonth {
            month: month.to_string(),
            income_available,
            total_budgeted: 0,
            total_spent,
            to_budget: income_available,
            categories,
        })
    }
}

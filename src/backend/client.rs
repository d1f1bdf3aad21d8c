//! Shared handle to the budget server.
//!
//! One `BackendClient` serves every session. It owns the connection state
//! machine:
//!
//! ```text
//! Uninitialized --ensure_ready--> Initializing --ok--> Ready
//!       ^                              |                 |
//!       +------------ err -------------+             shutdown
//!       |                                                v
//!       +------------------------------------------ ShuttingDown
//! ```
//!
//! At most one initialization and one shutdown run at a time. Both run as
//! spawned tasks wrapped in [`Shared`] futures, so every concurrent caller
//! awaits the same attempt and dropping a waiter never cancels it.

use chrono::NaiveDate;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::backend::api::BudgetApi;
use crate::backend::types::*;
use crate::config::BackendConfig;
use crate::error::{Error, Result};

type InitAttempt = Shared<BoxFuture<'static, std::result::Result<(), Arc<Error>>>>;
type ShutdownAttempt = Shared<BoxFuture<'static, ()>>;

enum ConnectionState {
    Uninitialized,
    Initializing(InitAttempt),
    Ready,
    ShuttingDown(ShutdownAttempt),
}

/// Observable connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Uninitialized,
    Initializing,
    Ready,
    ShuttingDown,
}

struct Inner {
    api: Arc<dyn BudgetApi>,
    config: BackendConfig,
    state: Mutex<ConnectionState>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Leave `Initializing` once the attempt settles. A shutdown that
    /// started meanwhile owns the state and is left alone.
    fn finish_init(&self, ok: bool) {
        let mut state = self.state();
        if matches!(*state, ConnectionState::Initializing(_)) {
            *state = if ok {
                ConnectionState::Ready
            } else {
                ConnectionState::Uninitialized
            };
        }
    }
}

/// Gateway to the remote budget server.
#[derive(Clone)]
pub struct BackendClient {
    inner: Arc<Inner>,
}

enum Wait {
    Init(InitAttempt),
    Shutdown(ShutdownAttempt),
}

impl BackendClient {
    /// Create a client; nothing is contacted until the first call.
    pub fn new(api: Arc<dyn BudgetApi>, config: BackendConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                config,
                state: Mutex::new(ConnectionState::Uninitialized),
            }),
        }
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        match *self.inner.state() {
            ConnectionState::Uninitialized => ConnectionStatus::Uninitialized,
            ConnectionState::Initializing(_) => ConnectionStatus::Initializing,
            ConnectionState::Ready => ConnectionStatus::Ready,
            ConnectionState::ShuttingDown(_) => ConnectionStatus::ShuttingDown,
        }
    }

    /// Wait until the budget is open, starting initialization if needed.
    ///
    /// Missing configuration fails fast with [`Error::Config`] before any
    /// network call. Every caller joined to a failing attempt receives that
    /// attempt's error; the state then returns to `Uninitialized`, so the
    /// next call starts a fresh attempt. A caller whose attempt succeeded but
    /// was overtaken by a shutdown waits for it and connects again.
    pub async fn ensure_ready(&self) -> Result<()> {
        loop {
            let wait = {
                let mut state = self.inner.state();
                match &*state {
                    ConnectionState::Ready => return Ok(()),
                    ConnectionState::Initializing(attempt) => Wait::Init(attempt.clone()),
                    ConnectionState::ShuttingDown(attempt) => Wait::Shutdown(attempt.clone()),
                    ConnectionState::Uninitialized => {
                        let attempt = self.start_init()?;
                        *state = ConnectionState::Initializing(attempt.clone());
                        Wait::Init(attempt)
                    }
                }
            };

            match wait {
                // A shutdown may take over while the attempt runs, so the
                // state is checked again rather than trusting its result.
                Wait::Init(attempt) => attempt.await.map_err(Error::Shared)?,
                Wait::Shutdown(attempt) => {
                    debug!("Waiting for backend shutdown before reconnecting");
                    attempt.await;
                }
            }
        }
    }

    fn start_init(&self) -> Result<InitAttempt> {
        let config = self.inner.config.validate()?;
        let inner = self.inner.clone();

        let task = tokio::spawn(async move {
            info!(sync_id = %config.sync_id, "Connecting to budget server");
            let result = async {
                inner.api.init(&config).await?;
                inner.api.download_budget(&config).await
            }
            .await;

            match &result {
                Ok(()) => info!("Budget downloaded, backend ready"),
                Err(e) => warn!("Backend initialization failed: {}", e),
            }
            inner.finish_init(result.is_ok());
            result.map_err(Arc::new)
        });

        let inner = self.inner.clone();
        Ok(async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    inner.finish_init(false);
                    Err(Arc::new(Error::Internal(format!(
                        "backend initialization task failed: {}",
                        e
                    ))))
                }
            }
        }
        .boxed()
        .shared())
    }

    /// Flush and close the connection.
    ///
    /// Concurrent calls share one attempt and the remote close runs at most
    /// once. Close failures are logged, never returned. Afterwards the
    /// client is `Uninitialized` and the next call reconnects, downloading
    /// the budget again.
    pub async fn shutdown(&self) -> Result<()> {
        let attempt = {
            let mut state = self.inner.state();
            let pending_init = match &*state {
                ConnectionState::ShuttingDown(attempt) => Some(attempt.clone()),
                ConnectionState::Uninitialized => {
                    debug!("Backend shutdown requested but not connected");
                    return Ok(());
                }
                ConnectionState::Initializing(init) => {
                    let attempt = self.start_shutdown(Some(init.clone()));
                    *state = ConnectionState::ShuttingDown(attempt.clone());
                    Some(attempt)
                }
                ConnectionState::Ready => None,
            };
            match pending_init {
                Some(attempt) => attempt,
                None => {
                    let attempt = self.start_shutdown(None);
                    *state = ConnectionState::ShuttingDown(attempt.clone());
                    attempt
                }
            }
        };

        attempt.await;
        Ok(())
    }

    fn start_shutdown(&self, pending_init: Option<InitAttempt>) -> ShutdownAttempt {
        let inner = self.inner.clone();

        let task = tokio::spawn(async move {
            let connected = match pending_init {
                Some(init) => init.await.is_ok(),
                None => true,
            };

            if connected {
                info!("Closing budget server connection");
                if let Err(e) = inner.api.shutdown().await {
                    warn!("Error while closing budget connection: {}", e);
                }
            }

            *inner.state() = ConnectionState::Uninitialized;
        });

        let inner = self.inner.clone();
        async move {
            if let Err(e) = task.await {
                warn!("Backend shutdown task failed: {}", e);
                *inner.state() = ConnectionState::Uninitialized;
            }
        }
        .boxed()
        .shared()
    }

    // ===== Accounts =====

    pub async fn get_accounts(&self) -> Result<Vec<Account>> {
        self.ensure_ready().await?;
        self.inner.api.get_accounts().await
    }

    pub async fn create_account(&self, account: NewAccount, initial_balance: i64) -> Result<String> {
        self.ensure_ready().await?;
        self.inner.api.create_account(account, initial_balance).await
    }

    pub async fn update_account(&self, id: &str, update: AccountUpdate) -> Result<()> {
        self.ensure_ready().await?;
        self.inner.api.update_account(id, update).await
    }

    pub async fn close_account(&self, id: &str) -> Result<()> {
        self.ensure_ready().await?;
        self.inner.api.close_account(id).await
    }

    pub async fn reopen_account(&self, id: &str) -> Result<()> {
        self.ensure_ready().await?;
        self.inner.api.reopen_account(id).await
    }

    pub async fn delete_account(&self, id: &str) -> Result<()> {
        self.ensure_ready().await?;
        self.inner.api.delete_account(id).await
    }

    pub async fn get_account_balance(&self, id: &str, cutoff: Option<NaiveDate>) -> Result<i64> {
        self.ensure_ready().await?;
        self.inner.api.get_account_balance(id, cutoff).await
    }

    // ===== Transactions =====

    pub async fn get_transactions(
        &self,
        account_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Transaction>> {
        self.ensure_ready().await?;
        self.inner.api.get_transactions(account_id, start, end).await
    }

    pub async fn create_transaction(&self, account_id: &str, tx: NewTransaction) -> Result<String> {
        self.ensure_ready().await?;
        self.inner.api.create_transaction(account_id, tx).await
    }

    pub async fn update_transaction(&self, id: &str, update: TransactionUpdate) -> Result<()> {
        self.ensure_ready().await?;
        self.inner.api.update_transaction(id, update).await
    }

    pub async fn delete_transaction(&self, id: &str) -> Result<()> {
        self.ensure_ready().await?;
        self.inner.api.delete_transaction(id).await
    }

    // ===== Categories =====

    pub async fn get_categories(&self) -> Result<Vec<Category>> {
        self.ensure_ready().await?;
        self.inner.api.get_categories().await
    }

    pub async fn get_category_groups(&self) -> Result<Vec<CategoryGroup>> {
        self.ensure_ready().await?;
        self.inner.api.get_category_groups().await
    }

    pub async fn create_category(&self, category: NewCategory) -> Result<String> {
        self.ensure_ready().await?;
        self.inner.api.create_category(category).await
    }

    pub async fn update_category(&self, id: &str, update: CategoryUpdate) -> Result<()> {
        self.ensure_ready().await?;
        self.inner.api.update_category(id, update).await
    }

    pub async fn delete_category(&self, id: &str) -> Result<()> {
        self.ensure_ready().await?;
        self.inner.api.delete_category(id).await
    }

    pub async fn create_category_group(&self, group: NewCategoryGroup) -> Result<String> {
        self.ensure_ready().await?;
        self.inner.api.create_category_group(group).await
    }

    pub async fn update_category_group(&self, id: &str, update: CategoryUpdate) -> Result<()> {
        self.ensure_ready().await?;
        self.inner.api.update_category_group(id, update).await
    }

    pub async fn delete_category_group(&self, id: &str) -> Result<()> {
        self.ensure_ready().await?;
        self.inner.api.delete_category_group(id).await
    }

    // ===== Payees =====

    pub async fn get_payees(&self) -> Result<Vec<Payee>> {
        self.ensure_ready().await?;
        self.inner.api.get_payees().await
    }

    pub async fn create_payee(&self, name: &str) -> Result<String> {
        self.ensure_ready().await?;
        self.inner.api.create_payee(name).await
    }

    pub async fn update_payee(&self, id: &str, name: &str) -> Result<()> {
        self.ensure_ready().await?;
        self.inner.api.update_payee(id, name).await
    }

    pub async fn delete_payee(&self, id: &str) -> Result<()> {
        self.ensure_ready().await?;
        self.inner.api.delete_payee(id).await
    }

    // ===== Rules =====

    pub async fn get_rules(&self) -> Result<Vec<Rule>> {
        self.ensure_ready().await?;
        self.inner.api.get_rules().await
    }

    pub async fn create_rule(&self, rule: NewRule) -> Result<Rule> {
        self.ensure_ready().await?;
        self.inner.api.create_rule(rule).await
    }

    pub async fn update_rule(&self, rule: Rule) -> Result<Rule> {
        self.ensure_ready().await?;
        self.inner.api.update_rule(rule).await
    }

    pub async fn delete_rule(&self, id: &str) -> Result<()> {
        self.ensure_ready().await?;
        self.inner.api.delete_rule(id).await
    }

    // ===== Budget =====

    pub async fn get_budget_month(&self, month: &str) -> Result<BudgetMonth> {
        self.ensure_ready().await?;
        self.inner.api.get_budget_month(month).await
    }
}

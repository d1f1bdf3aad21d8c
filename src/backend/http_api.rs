//! HTTP client for a REST budget gateway.
//!
//! Every budget endpoint lives under `{server_url}/v1/budgets/{sync_id}`.
//! Requests authenticate with `x-api-key`; successful responses wrap their
//! payload as `{"data": ...}` and failures carry `{"error": "..."}`.

use async_trait::async_trait;
use chrono::NaiveDate;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::backend::api::BudgetApi;
use crate::backend::types::*;
use crate::config::ValidatedBackendConfig;
use crate::error::{Error, Result};
use crate::VERSION;

/// Characters escaped inside a single URL path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// User agent string for API requests.
fn user_agent() -> String {
    format!("budget-mcp/{} (rust)", VERSION)
}

/// Percent-encode one URL path segment.
pub(crate) fn segment(value: &str) -> String {
    utf8_percent_encode(value, PATH_SEGMENT).to_string()
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Settings captured by `init`.
#[derive(Debug, Clone)]
struct Connection {
    server_url: String,
    budget_url: String,
    api_key: String,
    encryption_password: Option<String>,
}

/// Budget API backed by HTTP.
#[derive(Debug)]
pub struct HttpBudgetApi {
    client: Client,
    connection: RwLock<Option<Connection>>,
}

impl HttpBudgetApi {
    /// Create a new HTTP budget client.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent())
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            connection: RwLock::new(None),
        })
    }

    async fn connection(&self) -> Result<Connection> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Backend("budget server connection is not open".to_string()))
    }

    fn authorize(&self, builder: RequestBuilder, conn: &Connection) -> RequestBuilder {
        let builder = builder
            .header("x-api-key", &conn.api_key)
            .header("X-Request-Id", Uuid::new_v4().to_string());
        match &conn.encryption_password {
            Some(password) => builder.header("budget-encryption-password", password),
            None => builder,
        }
    }

    /// Send a request relative to the budget URL and unwrap the `data` field.
    async fn call<B: Serialize, R: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<R> {
        let conn = self.connection().await?;
        let url = format!("{}{}", conn.budget_url, path);
        trace!("{} {}", method, url);

        let mut builder = self.authorize(self.client.request(method, &url), &conn);
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let envelope: Envelope<R> = Self::handle_response(response).await?;
        Ok(envelope.data)
    }

    /// Like [`call`](Self::call) for endpoints whose payload is ignored.
    async fn call_unit<B: Serialize>(&self, method: Method, path: &str, body: Option<&B>) -> Result<()> {
        let conn = self.connection().await?;
        let url = format!("{}{}", conn.budget_url, path);
        trace!("{} {}", method, url);

        let mut builder = self.authorize(self.client.request(method, &url), &conn);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        Self::check_status(response).await.map(|_| ())
    }

    async fn check_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let status_text = status.canonical_reason().unwrap_or("Unknown");
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|e| e.error)
            .unwrap_or(body);
        Err(Error::api(status.as_u16(), status_text, message))
    }

    /// Handle API response, extracting errors.
    async fn handle_response<R: DeserializeOwned>(response: Response) -> Result<R> {
        Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Backend(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl BudgetApi for HttpBudgetApi {
    async fn init(&self, config: &ValidatedBackendConfig) -> Result<()> {
        let server_url = config.server_url.trim_end_matches('/').to_string();
        let conn = Connection {
            budget_url: format!("{}/v1/budgets/{}", server_url, segment(&config.sync_id)),
            server_url,
            api_key: config.password.clone(),
            encryption_password: config.encryption_password.clone(),
        };

        // Listing budgets proves both reachability and the credential.
        let url = format!("{}/v1/budgets", conn.server_url);
        let response = self
            .authorize(self.client.get(&url), &conn)
            .send()
            .await?;
        let budgets: Envelope<Vec<Value>> = Self::handle_response(response).await?;
        debug!("Budget server reachable, {} budgets visible", budgets.data.len());

        *self.connection.write().await = Some(conn);
        Ok(())
    }

    async fn download_budget(&self, config: &ValidatedBackendConfig) -> Result<()> {
        let budget: Value = self
            .call::<(), _>(Method::GET, "", &[], None)
            .await?;
        let name = budget.get("name").and_then(|v| v.as_str()).unwrap_or("<unnamed>");
        debug!(sync_id = %config.sync_id, "Downloaded budget {}", name);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let result = self.call_unit::<()>(Method::POST, "/sync", None).await;
        *self.connection.write().await = None;
        result
    }

    // ===== Accounts =====

    async fn get_accounts(&self) -> Result<Vec<Account>> {
        self.call::<(), _>(Method::GET, "/accounts", &[], None).await
    }

    async fn create_account(&self, account: NewAccount, initial_balance: i64) -> Result<String> {
        let body = json!({ "account": account, "initialBalance": initial_balance });
        self.call(Method::POST, "/accounts", &[], Some(&body)).await
    }

    async fn update_account(&self, id: &str, update: AccountUpdate) -> Result<()> {
        let body = json!({ "account": update });
        self.call_unit(Method::PATCH, &format!("/accounts/{}", segment(id)), Some(&body))
            .await
    }

    async fn close_account(&self, id: &str) -> Result<()> {
        self.call_unit::<()>(Method::PUT, &format!("/accounts/{}/close", segment(id)), None)
            .await
    }

    async fn reopen_account(&self, id: &str) -> Result<()> {
        self.call_unit::<()>(Method::PUT, &format!("/accounts/{}/reopen", segment(id)), None)
            .await
    }

    async fn delete_account(&self, id: &str) -> Result<()> {
        self.call_unit::<()>(Method::DELETE, &format!("/accounts/{}", segment(id)), None)
            .await
    }

    async fn get_account_balance(&self, id: &str, cutoff: Option<NaiveDate>) -> Result<i64> {
        let query: Vec<(&str, String)> = cutoff
            .map(|d| vec![("cutoff_date", d.to_string())])
            .unwrap_or_default();
        self.call::<(), _>(
            Method::GET,
            &format!("/accounts/{}/balance", segment(id)),
            &query,
            None,
        )
        .await
    }

    // ===== Transactions =====

    async fn get_transactions(
        &self,
        account_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Transaction>> {
        let query = [("since_date", start.to_string()), ("until_date", end.to_string())];
        self.call::<(), _>(
            Method::GET,
            &format!("/accounts/{}/transactions", segment(account_id)),
            &query,
            None,
        )
        .await
    }

    async fn create_transaction(&self, account_id: &str, tx: NewTransaction) -> Result<String> {
        let body = json!({ "transaction": tx });
        self.call(
            Method::POST,
            &format!("/accounts/{}/transactions", segment(account_id)),
            &[],
            Some(&body),
        )
        .await
    }

    async fn update_transaction(&self, id: &str, update: TransactionUpdate) -> Result<()> {
        let body = json!({ "transaction": update });
        self.call_unit(Method::PATCH, &format!("/transactions/{}", segment(id)), Some(&body))
            .await
    }

    async fn delete_transaction(&self, id: &str) -> Result<()> {
        self.call_unit::<()>(Method::DELETE, &format!("/transactions/{}", segment(id)), None)
            .await
    }

    // ===== Categories =====

    async fn get_categories(&self) -> Result<Vec<Category>> {
        self.call::<(), _>(Method::GET, "/categories", &[], None).await
    }

    async fn get_category_groups(&self) -> Result<Vec<CategoryGroup>> {
        self.call::<(), _>(Method::GET, "/categorygroups", &[], None).await
    }

    async fn create_category(&self, category: NewCategory) -> Result<String> {
        let body = json!({ "category": category });
        self.call(Method::POST, "/categories", &[], Some(&body)).await
    }

    async fn update_category(&self, id: &str, update: CategoryUpdate) -> Result<()> {
        let body = json!({ "category": update });
        self.call_unit(Method::PATCH, &format!("/categories/{}", segment(id)), Some(&body))
            .await
    }

    async fn delete_category(&self, id: &str) -> Result<()> {
        self.call_unit::<()>(Method::DELETE, &format!("/categories/{}", segment(id)), None)
            .await
    }

    async fn create_category_group(&self, group: NewCategoryGroup) -> Result<String> {
        let body = json!({ "category_group": group });
        self.call(Method::POST, "/categorygroups", &[], Some(&body)).await
    }

    async fn update_category_group(&self, id: &str, update: CategoryUpdate) -> Result<()> {
        let body = json!({ "category_group": update });
        self.call_unit(
            Method::PATCH,
            &format!("/categorygroups/{}", segment(id)),
            Some(&body),
        )
        .await
    }

    async fn delete_category_group(&self, id: &str) -> Result<()> {
        self.call_unit::<()>(
            Method::DELETE,
            &format!("/categorygroups/{}", segment(id)),
            None,
        )
        .await
    }

    // ===== Payees =====

    async fn get_payees(&self) -> Result<Vec<Payee>> {
        self.call::<(), _>(Method::GET, "/payees", &[], None).await
    }

    async fn create_payee(&self, name: &str) -> Result<String> {
        let body = json!({ "payee": { "name": name } });
        self.call(Method::POST, "/payees", &[], Some(&body)).await
    }

    async fn update_payee(&self, id: &str, name: &str) -> Result<()> {
        let body = json!({ "payee": { "name": name } });
        self.call_unit(Method::PATCH, &format!("/payees/{}", segment(id)), Some(&body))
            .await
    }

    async fn delete_payee(&self, id: &str) -> Result<()> {
        self.call_unit::<()>(Method::DELETE, &format!("/payees/{}", segment(id)), None)
            .await
    }

    // ===== Rules =====

    async fn get_rules(&self) -> Result<Vec<Rule>> {
        self.call::<(), _>(Method::GET, "/rules", &[], None).await
    }

    async fn create_rule(&self, rule: NewRule) -> Result<Rule> {
        let body = json!({ "rule": rule });
        self.call(Method::POST, "/rules", &[], Some(&body)).await
    }

    async fn update_rule(&self, rule: Rule) -> Result<Rule> {
        let path = format!("/rules/{}", segment(&rule.id));
        let body = json!({ "rule": rule });
        self.call(Method::PATCH, &path, &[], Some(&body)).await
    }

    async fn delete_rule(&self, id: &str) -> Result<()> {
        self.call_unit::<()>(Method::DELETE, &format!("/rules/{}", segment(id)), None)
            .await
    }

    // ===== Budget =====

    async fn get_budget_month(&self, month: &str) -> Result<BudgetMonth> {
        self.call::<(), _>(Method::GET, &format!("/months/{}", segment(month)), &[], None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_escapes_reserved_characters() {
        assert_eq!(segment("abc-123"), "abc-123");
        assert_eq!(segment("a/b"), "a%2Fb");
        assert_eq!(segment("a b?c"), "a%20b%3Fc");
    }

    #[test]
    fn test_user_agent() {
        assert!(user_agent().starts_with("budget-mcp/"));
    }

    #[tokio::test]
    async fn test_calls_fail_before_init() {
        let api = HttpBudgetApi::new().unwrap();
        let err = api.get_accounts().await.unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
    }

    #[test]
    fn test_envelope_parsing() {
        let envelope: Envelope<Vec<Account>> = serde_json::from_str(
            r#"{"data":[{"id":"a1","name":"Checking","offbudget":false,"closed":false}]}"#,
        )
        .unwrap();
        assert_eq!(envelope.data[0].name, "Checking");

        let err: ErrorBody = serde_json::from_str(r#"{"error":"not found"}"#).unwrap();
        assert_eq!(err.error, "not found");
    }
}

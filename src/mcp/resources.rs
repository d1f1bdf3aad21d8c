//! MCP resources.
//!
//! Budget accounts exposed as browsable `actual://` resources:
//!
//! - `actual://accounts` - every account with its current balance
//! - `actual://accounts/{id}` - one account with its balance
//! - `actual://accounts/{id}/transactions` - the last 30 days of transactions

use chrono::{Duration, Local};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::backend::http_api::segment;
use crate::backend::{format_amount, Account, BackendClient};
use crate::error::{Error, Result};

const SCHEME: &str = "actual://";
const JSON_MIME: &str = "application/json";
const TRANSACTION_WINDOW_DAYS: i64 = 30;

/// A resource exposed by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub uri: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Resource contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Result of resources/list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResourcesResult {
    pub resources: Vec<Resource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Result of resources/read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceResult {
    pub contents: Vec<ResourceContents>,
}

/// A parsed `actual://` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ResourceUri {
    Accounts,
    Account(String),
    AccountTransactions(String),
}

impl ResourceUri {
    fn parse(uri: &str) -> Result<Self> {
        let invalid = || Error::InvalidToolArguments(format!("Unknown resource: {}", uri));
        let path = uri.strip_prefix(SCHEME).ok_or_else(invalid)?;
        let parts: Vec<&str> = path.split('/').collect();

        let decode = |raw: &str| -> Result<String> {
            let id = percent_decode_str(raw).decode_utf8_lossy().to_string();
            if id.is_empty() {
                Err(invalid())
            } else {
                Ok(id)
            }
        };

        match parts.as_slice() {
            ["accounts"] => Ok(ResourceUri::Accounts),
            ["accounts", id] => Ok(ResourceUri::Account(decode(id)?)),
            ["accounts", id, "transactions"] => {
                Ok(ResourceUri::AccountTransactions(decode(id)?))
            }
            _ => Err(invalid()),
        }
    }
}

fn account_uri(id: &str) -> String {
    format!("{}accounts/{}", SCHEME, segment(id))
}

fn json_contents(uri: &str, value: &serde_json::Value) -> Result<ReadResourceResult> {
    Ok(ReadResourceResult {
        contents: vec![ResourceContents {
            uri: uri.to_string(),
            mime_type: Some(JSON_MIME.to_string()),
            text: Some(serde_json::to_string_pretty(value)?),
        }],
    })
}

/// Resolves `actual://` URIs against the shared backend.
#[derive(Clone)]
pub struct ResourceRegistry {
    backend: BackendClient,
}

impl ResourceRegistry {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }

    /// The account list plus one entry and one transactions entry per open
    /// account.
    pub async fn list(&self) -> Result<ListResourcesResult> {
        let accounts = self.backend.get_accounts().await?;

        let mut resources = vec![Resource {
            uri: format!("{}accounts", SCHEME),
            name: "Accounts".to_string(),
            description: Some("All budget accounts with current balances".to_string()),
            mime_type: Some(JSON_MIME.to_string()),
        }];

        for account in accounts.iter().filter(|a| !a.closed) {
            let uri = account_uri(&account.id);
            resources.push(Resource {
                uri: uri.clone(),
                name: account.name.clone(),
                description: Some(format!("Account details for {}", account.name)),
                mime_type: Some(JSON_MIME.to_string()),
            });
            resources.push(Resource {
                uri: format!("{}/transactions", uri),
                name: format!("{} transactions", account.name),
                description: Some(format!(
                    "Transactions in {} over the last {} days",
                    account.name, TRANSACTION_WINDOW_DAYS
                )),
                mime_type: Some(JSON_MIME.to_string()),
            });
        }

        Ok(ListResourcesResult {
            resources,
            next_cursor: None,
        })
    }

    pub async fn read(&self, uri: &str) -> Result<ReadResourceResult> {
        match ResourceUri::parse(uri)? {
            ResourceUri::Accounts => {
                let accounts = self.backend.get_accounts().await?;
                let mut entries = Vec::with_capacity(accounts.len());
                for account in &accounts {
                    entries.push(self.account_entry(account).await?);
                }
                json_contents(uri, &json!(entries))
            }
            ResourceUri::Account(id) => {
                let account = self.find_account(&id).await?;
                json_contents(uri, &self.account_entry(&account).await?)
            }
            ResourceUri::AccountTransactions(id) => {
                let account = self.find_account(&id).await?;
                let end = Local::now().date_naive();
                let start = end - Duration::days(TRANSACTION_WINDOW_DAYS);
                let transactions = self.backend.get_transactions(&account.id, start, end).await?;
                json_contents(
                    uri,
                    &json!({
                        "account": account.name,
                        "startDate": start.to_string(),
                        "endDate": end.to_string(),
                        "transactions": transactions,
                    }),
                )
            }
        }
    }

    async fn find_account(&self, id: &str) -> Result<Account> {
        self.backend
            .get_accounts()
            .await?
            .into_iter()
            .find(|a| a.id == id)
            .ok_or_else(|| Error::NotFound(format!("account {}", id)))
    }

    async fn account_entry(&self, account: &Account) -> Result<serde_json::Value> {
        let balance = self.backend.get_account_balance(&account.id, None).await?;
        Ok(json!({
            "id": account.id,
            "name": account.name,
            "offbudget": account.offbudget,
            "closed": account.closed,
            "balance": balance,
            "formattedBalance": format_amount(balance),
        }))
    }
}

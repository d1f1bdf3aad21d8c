//! Configuration management for the budget MCP gateway.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Command-line arguments for the gateway.
#[derive(Parser, Debug, Clone)]
#[command(name = "budget-mcp")]
#[command(author = "Budget MCP Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "MCP server exposing a budget-sync server as AI-callable tools")]
pub struct Args {
    /// Transport mode: stdio or http
    #[arg(short, long, default_value = "stdio", env = "BUDGET_MCP_TRANSPORT")]
    pub transport: Transport,

    /// HTTP bind address (only for http transport)
    #[arg(long, default_value = "127.0.0.1", env = "BUDGET_MCP_HOST")]
    pub host: String,

    /// HTTP port (only for http transport)
    #[arg(short, long, default_value = "3000", env = "BUDGET_MCP_PORT")]
    pub port: u16,

    /// Path of the MCP endpoint
    #[arg(long, default_value = "/mcp", env = "BUDGET_MCP_PATH")]
    pub path: String,

    /// Enable debug logging
    #[arg(short, long, env = "BUDGET_MCP_DEBUG")]
    pub debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "BUDGET_MCP_LOG_JSON")]
    pub log_json: bool,

    /// Budget server URL
    #[arg(long, env = "ACTUAL_SERVER_URL")]
    pub server_url: Option<String>,

    /// Budget server password / API key
    #[arg(long, env = "ACTUAL_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Sync ID of the budget to open
    #[arg(long, env = "ACTUAL_BUDGET_SYNC_ID")]
    pub sync_id: Option<String>,

    /// Password for end-to-end encrypted budgets
    #[arg(long, env = "ACTUAL_BUDGET_ENCRYPTION_PASSWORD", hide_env_values = true)]
    pub encryption_password: Option<String>,

    /// Register tools that modify the budget
    #[arg(long, env = "BUDGET_MCP_ENABLE_WRITE")]
    pub enable_write: bool,

    /// Always answer POST requests with JSON instead of an SSE stream
    #[arg(long, env = "BUDGET_MCP_JSON_RESPONSE")]
    pub json_response: bool,

    /// Events retained per stream for resumption (0 = unbounded)
    #[arg(long, default_value = "1000", env = "BUDGET_MCP_EVENT_RETENTION")]
    pub event_retention: usize,

    /// Close sessions idle for this many seconds (0 = never)
    #[arg(long, default_value = "0", env = "BUDGET_MCP_SESSION_IDLE_TIMEOUT")]
    pub session_idle_timeout: u64,

    /// Bearer tokens accepted on the MCP endpoint (comma separated)
    #[arg(
        long = "bearer-token",
        env = "BUDGET_MCP_BEARER_TOKENS",
        value_delimiter = ',',
        hide_env_values = true
    )]
    pub bearer_tokens: Vec<String>,
}

/// Transport mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Stdio,
    Http,
}

/// Connection settings for the budget server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    pub server_url: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub sync_id: Option<String>,
    #[serde(skip_serializing)]
    pub encryption_password: Option<String>,
}

/// A `BackendConfig` whose required values are known to be present.
#[derive(Debug, Clone)]
pub struct ValidatedBackendConfig {
    pub server_url: String,
    pub password: String,
    pub sync_id: String,
    pub encryption_password: Option<String>,
}

impl BackendConfig {
    /// Check that every required value is present and non-empty.
    pub fn validate(&self) -> Result<ValidatedBackendConfig> {
        fn required(value: &Option<String>, name: &str, missing: &mut Vec<String>) -> String {
            match value.as_deref().map(str::trim) {
                Some(v) if !v.is_empty() => v.to_string(),
                _ => {
                    missing.push(name.to_string());
                    String::new()
                }
            }
        }

        let mut missing = Vec::new();
        let server_url = required(&self.server_url, "ACTUAL_SERVER_URL", &mut missing);
        let password = required(&self.password, "ACTUAL_PASSWORD", &mut missing);
        let sync_id = required(&self.sync_id, "ACTUAL_BUDGET_SYNC_ID", &mut missing);

        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "missing required budget server settings: {}",
                missing.join(", ")
            )));
        }

        Ok(ValidatedBackendConfig {
            server_url,
            password,
            sync_id,
            encryption_password: self
                .encryption_password
                .clone()
                .filter(|p| !p.is_empty()),
        })
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Transport mode
    pub transport: Transport,
    /// HTTP bind address
    pub host: String,
    /// HTTP port
    pub port: u16,
    /// MCP endpoint path
    pub path: String,
    /// Debug mode
    pub debug: bool,
    /// JSON log output
    pub log_json: bool,
    /// Budget server connection
    pub backend: BackendConfig,
    /// Write tools enabled
    pub enable_write: bool,
    /// Force JSON responses
    pub json_response: bool,
    /// Events kept per stream
    pub event_retention: usize,
    /// Idle timeout in seconds
    pub session_idle_timeout: u64,
    /// Accepted bearer tokens
    #[serde(skip_serializing, default)]
    pub bearer_tokens: Vec<String>,
}

impl Config {
    /// Idle timeout as a duration, `None` when reaping is disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.session_idle_timeout > 0).then(|| Duration::from_secs(self.session_idle_timeout))
    }

    /// Socket address string for the HTTP listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            transport: args.transport,
            host: args.host,
            port: args.port,
            path: args.path,
            debug: args.debug,
            log_json: args.log_json,
            backend: BackendConfig {
                server_url: args.server_url,
                password: args.password,
                sync_id: args.sync_id,
                encryption_password: args.encryption_password,
            },
            enable_write: args.enable_write,
            json_response: args.json_response,
            event_retention: args.event_retention,
            session_idle_timeout: args.session_idle_timeout,
            bearer_tokens: args
                .bearer_tokens
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: Transport::Stdio,
            host: "127.0.0.1".to_string(),
            port: 3000,
            path: "/mcp".to_string(),
            debug: false,
            log_json: false,
            backend: BackendConfig::default(),
            enable_write: false,
            json_response: false,
            event_retention: 1000,
            session_idle_timeout: 0,
            bearer_tokens: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_backend() -> BackendConfig {
        BackendConfig {
            server_url: Some("http://localhost:5006".to_string()),
            password: Some("secret".to_string()),
            sync_id: Some("budget-1".to_string()),
            encryption_password: None,
        }
    }

    #[test]
    fn test_transport_default() {
        assert_eq!(Transport::default(), Transport::Stdio);
    }

    #[test]
    fn test_transport_serialization() {
        assert_eq!(serde_json::to_string(&Transport::Http).unwrap(), "\"http\"");
        let stdio: Transport = serde_json::from_str("\"stdio\"").unwrap();
        assert_eq!(stdio, Transport::Stdio);
    }

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.transport, Transport::Stdio);
        assert_eq!(config.port, 3000);
        assert_eq!(config.path, "/mcp");
        assert!(!config.enable_write);
        assert_eq!(config.event_retention, 1000);
        assert!(config.idle_timeout().is_none());
        assert_eq!(config.bind_addr(), "127.0.0.1:3000");
    }

    #[test]
    fn test_backend_validate_ok() {
        let validated = full_backend().validate().unwrap();
        assert_eq!(validated.server_url, "http://localhost:5006");
        assert_eq!(validated.sync_id, "budget-1");
        assert!(validated.encryption_password.is_none());
    }

    #[test]
    fn test_backend_validate_reports_every_missing_value() {
        let config = BackendConfig {
            server_url: Some("   ".to_string()),
            password: None,
            ..full_backend()
        };

        let err = config.validate().unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, Error::Config(_)));
        assert!(message.contains("ACTUAL_SERVER_URL"));
        assert!(message.contains("ACTUAL_PASSWORD"));
        assert!(!message.contains("ACTUAL_BUDGET_SYNC_ID"));
    }

    #[test]
    fn test_config_serialization_hides_secrets() {
        let config = Config {
            backend: full_backend(),
            bearer_tokens: vec!["tok".to_string()],
            ..Config::default()
        };

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"server_url\":\"http://localhost:5006\""));
        assert!(!json.contains("secret"));
        assert!(!json.contains("tok"));
    }

    #[test]
    fn test_args_to_config() {
        let args = Args::parse_from([
            "budget-mcp",
            "--transport",
            "http",
            "--port",
            "4000",
            "--server-url",
            "http://budget.local",
            "--password",
            "pw",
            "--sync-id",
            "sync",
            "--enable-write",
            "--session-idle-timeout",
            "60",
            "--bearer-token",
            "a, b",
        ]);

        let config: Config = args.into();

        assert_eq!(config.transport, Transport::Http);
        assert_eq!(config.port, 4000);
        assert!(config.enable_write);
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.bearer_tokens, vec!["a".to_string(), "b".to_string()]);
        assert!(config.backend.validate().is_ok());
    }
}

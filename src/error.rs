//! Error types for the budget MCP gateway.

use axum::http::StatusCode;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the gateway.
#[derive(Error, Debug)]
pub enum Error {
    // ===== Backend Errors =====
    #[error("API error: {status} {status_text} - {message}")]
    Api {
        status: u16,
        status_text: String,
        message: String,
    },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// An error produced once by a shared init/shutdown attempt and handed
    /// to every caller that joined it.
    #[error(transparent)]
    Shared(Arc<Error>),

    // ===== MCP Errors =====
    #[error("MCP protocol error: {0}")]
    McpProtocol(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidToolArguments(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    // ===== Session Errors =====
    #[error("Bad Request: No valid session ID provided")]
    NotInitializeRequest,

    #[error("Bad Request: Mcp-Session-Id header is required")]
    MissingSessionId,

    #[error("Bad Request: Transport not initialized")]
    SessionNotFound(String),

    #[error("Invalid Request: Server already initialized")]
    AlreadyInitialized,

    #[error("Bad Request: Server not initialized")]
    NotInitialized,

    #[error("Invalid Request: Only one initialization request is allowed")]
    BatchedInitialize,

    #[error("Bad Request: Transport is closed")]
    TransportClosed,

    #[error("Conflict: Only one SSE stream is allowed per session")]
    StreamConflict,

    #[error("Not Acceptable: Client must accept application/json or text/event-stream")]
    NotAcceptable,

    #[error("Unsupported Media Type: Content-Type must be application/json")]
    UnsupportedMediaType,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // ===== I/O Errors =====
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // ===== HTTP Errors =====
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP server error: {0}")]
    HttpServer(String),

    // ===== Internal Errors =====
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create an API error from HTTP response details.
    pub fn api(status: u16, status_text: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            status_text: status_text.into(),
            message: message.into(),
        }
    }

    /// Follow `Shared` wrappers down to the error that was actually raised.
    pub fn root(&self) -> &Error {
        match self {
            Self::Shared(inner) => inner.root(),
            other => other,
        }
    }

    /// Whether this is a configuration error, looking through shared wrappers.
    pub fn is_config(&self) -> bool {
        matches!(self.root(), Self::Config(_))
    }

    /// HTTP status the router answers with when this error ends a request.
    pub fn status_code(&self) -> StatusCode {
        match self.root() {
            Self::NotInitializeRequest
            | Self::MissingSessionId
            | Self::SessionNotFound(_)
            | Self::AlreadyInitialized
            | Self::NotInitialized
            | Self::BatchedInitialize
            | Self::TransportClosed
            | Self::McpProtocol(_)
            | Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotAcceptable => StatusCode::NOT_ACCEPTABLE,
            Self::StreamConflict => StatusCode::CONFLICT,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller, not the server, caused this error.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

//! Bearer token authentication for the MCP endpoint.

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::{debug, warn};

const REALM: &str = "budget-mcp";

/// Decides whether a bearer token grants access.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> bool;
}

/// Accepts a fixed set of tokens.
pub struct StaticTokenVerifier {
    tokens: Vec<String>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: Vec<String>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> bool {
        // Compare against every token so timing does not reveal which one matched.
        self.tokens
            .iter()
            .fold(false, |found, known| constant_time_eq(known.as_bytes(), token.as_bytes()) | found)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Middleware rejecting requests without a valid `Authorization: Bearer` token.
pub async fn require_bearer(
    State(verifier): State<Arc<dyn TokenVerifier>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    // CORS preflight carries no credentials.
    if request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match auth_header {
        Some(auth) if auth.starts_with("Bearer ") => {
            let token = auth[7..].trim();
            if verifier.verify(token).await {
                debug!("[Auth] Bearer token accepted");
                next.run(request).await
            } else {
                warn!("[Auth] Invalid bearer token");
                unauthorized_response("invalid_token", "Token is invalid")
            }
        }
        Some(_) => {
            warn!("[Auth] Invalid Authorization header format");
            unauthorized_response("invalid_request", "Invalid Authorization header format")
        }
        None => {
            debug!("[Auth] No Authorization header");
            unauthorized_response("invalid_token", "Missing access token")
        }
    }
}

/// 401 with a `WWW-Authenticate` challenge.
fn unauthorized_response(error: &str, description: &str) -> Response {
    let www_authenticate = format!(
        r#"Bearer realm="{}", error="{}", error_description="{}""#,
        REALM, error, description
    );

    let body = serde_json::json!({
        "error": error,
        "error_description": description,
    });

    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, www_authenticate)],
        axum::Json(body),
    )
        .into_response()
}

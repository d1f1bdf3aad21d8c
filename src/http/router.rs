//! Request dispatch for the MCP endpoint.
//!
//! Decides per request whether to create a session, forward to an existing
//! one, or reject. Holds no state of its own between calls; everything lives
//! in [`AppState`].

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::backend::BackendClient;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::http::event_store::InMemoryEventStore;
use crate::http::session::SessionRegistry;
use crate::http::transport::{
    Accepts, StreamableHttpTransport, TransportOptions, LAST_EVENT_ID, MCP_SESSION_ID,
};
use crate::mcp::protocol::{error_code_for, MessageBatch};
use crate::mcp::server::McpServerFactory;
use crate::metrics::Metrics;

/// Shared state of the HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub factory: McpServerFactory,
    pub options: TransportOptions,
    /// Events kept per stream in each new session's store.
    pub event_retention: usize,
    pub metrics: Arc<Metrics>,
    pub backend: BackendClient,
}

impl AppState {
    pub fn new(
        config: &Config,
        factory: McpServerFactory,
        backend: BackendClient,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry: SessionRegistry::default(),
            factory,
            options: TransportOptions {
                json_response: config.json_response,
            },
            event_retention: config.event_retention,
            metrics,
            backend,
        }
    }

    fn new_transport(&self) -> Arc<StreamableHttpTransport> {
        StreamableHttpTransport::new(
            &self.factory,
            Arc::new(InMemoryEventStore::new(self.event_retention)),
            self.options.clone(),
            Some(self.metrics.clone()),
        )
    }

    /// Transport named by the session header.
    ///
    /// A header that is present but not visible ASCII names no session.
    fn session(&self, headers: &HeaderMap) -> Result<Arc<StreamableHttpTransport>> {
        let value = headers.get(MCP_SESSION_ID).ok_or(Error::MissingSessionId)?;
        let session_id = value.to_str().map_err(|_| {
            Error::SessionNotFound(String::from_utf8_lossy(value.as_bytes()).into_owned())
        })?;
        self.registry
            .get(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }
}

/// `POST` on the MCP path.
pub async fn handle_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.metrics.inc_requests();
    match post(&state, &headers, &body).await {
        Ok(response) => response,
        Err(e) => reject(&state, e),
    }
}

/// `GET` on the MCP path: open or resume the standalone stream.
pub async fn handle_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    state.metrics.inc_requests();
    match get(&state, &headers).await {
        Ok(response) => response,
        Err(e) => reject(&state, e),
    }
}

/// `DELETE` on the MCP path: end the session.
pub async fn handle_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    state.metrics.inc_requests();
    match state.session(&headers) {
        Ok(transport) => {
            transport.close();
            StatusCode::OK.into_response()
        }
        Err(e) => reject(&state, e),
    }
}

async fn post(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<Response> {
    if !is_json_content(headers) {
        return Err(Error::UnsupportedMediaType);
    }
    let accepts = Accepts::from_header(header_str(headers, header::ACCEPT.as_str()));
    if !accepts.any() {
        return Err(Error::NotAcceptable);
    }

    let value: Value = serde_json::from_slice(body)?;
    let batch = MessageBatch::from_value(value)?;

    if headers.contains_key(MCP_SESSION_ID) {
        let transport = state.session(headers)?;
        return transport.handle_post(batch, accepts).await;
    }

    if !batch.contains_initialize() {
        return Err(Error::NotInitializeRequest);
    }

    let transport = state.new_transport();
    let (session_id, mut response) = transport.handle_initialize(batch, accepts).await?;
    let value = HeaderValue::from_str(&session_id)
        .map_err(|e| Error::Internal(format!("invalid session id header: {}", e)))?;

    state.registry.insert(session_id.clone(), transport);
    state.metrics.inc_sessions_created();
    info!(session_id = %session_id, "Session initialized");

    response
        .headers_mut()
        .insert(HeaderName::from_static(MCP_SESSION_ID), value);
    Ok(response)
}

async fn get(state: &AppState, headers: &HeaderMap) -> Result<Response> {
    let accepts = Accepts::from_header(header_str(headers, header::ACCEPT.as_str()));
    if !accepts.sse {
        return Err(Error::NotAcceptable);
    }
    let transport = state.session(headers)?;
    transport.handle_get(header_str(headers, LAST_EVENT_ID)).await
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn is_json_content(headers: &HeaderMap) -> bool {
    header_str(headers, header::CONTENT_TYPE.as_str())
        .and_then(|v| v.split(';').next())
        .is_some_and(|media| media.trim().eq_ignore_ascii_case("application/json"))
}

/// JSON-RPC error body with no id, at the error's HTTP status.
fn reject(state: &AppState, e: Error) -> Response {
    state.metrics.inc_rejected();
    let status = e.status_code();
    if status.is_server_error() {
        error!("Request failed: {}", e);
    } else {
        debug!(status = status.as_u16(), "Request rejected: {}", e);
    }

    let body = json!({
        "jsonrpc": "2.0",
        "error": {
            "code": error_code_for(&e),
            "message": e.to_string(),
        },
        "id": null,
    });
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(*value));
        }
        map
    }

    #[test]
    fn test_json_content_type() {
        assert!(is_json_content(&headers(&[("content-type", "application/json")])));
        assert!(is_json_content(&headers(&[(
            "content-type",
            "Application/JSON; charset=utf-8"
        )])));
        assert!(!is_json_content(&headers(&[("content-type", "text/plain")])));
        assert!(!is_json_content(&HeaderMap::new()));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let map = headers(&[("mcp-session-id", "abc")]);
        assert_eq!(header_str(&map, "Mcp-Session-Id"), Some("abc"));
    }
}

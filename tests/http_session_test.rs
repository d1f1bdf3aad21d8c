//! Streamable HTTP session tests.
//!
//! Drive the full axum router in-process against the in-memory budget
//! backend.

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use futures::future::join_all;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use budget_mcp::backend::{BackendClient, InMemoryBudgetApi};
use budget_mcp::config::{BackendConfig, Config};
use budget_mcp::http::auth::{StaticTokenVerifier, TokenVerifier};
use budget_mcp::http::build_router;
use budget_mcp::http::router::AppState;
use budget_mcp::mcp::handler::McpHandler;
use budget_mcp::mcp::server::McpServerFactory;
use budget_mcp::metrics::Metrics;
use budget_mcp::tools;

const SESSION: &str = "mcp-session-id";

struct Harness {
    app: Router,
    state: AppState,
    api: Arc<InMemoryBudgetApi>,
}

impl Harness {
    fn new(json_response: bool) -> Self {
        Self::with_verifier(json_response, None)
    }

    fn with_verifier(json_response: bool, verifier: Option<Arc<dyn TokenVerifier>>) -> Self {
        let api = Arc::new(InMemoryBudgetApi::new());
        let backend = BackendClient::new(
            api.clone(),
            BackendConfig {
                server_url: Some("http://budget.test".to_string()),
                password: Some("pw".to_string()),
                sync_id: Some("sync".to_string()),
                encryption_password: None,
            },
        );
        let config = Config {
            json_response,
            enable_write: true,
            ..Config::default()
        };

        let mut handler = McpHandler::new();
        tools::register_all_tools(&mut handler, &backend, config.enable_write);
        let metrics = Metrics::new();
        let factory = McpServerFactory::new(handler).with_metrics(metrics.clone());
        let state = AppState::new(&config, factory, backend, metrics);
        let app = build_router(state.clone(), "/mcp", verifier);

        Self { app, state, api }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn post(&self, session: Option<&str>, body: Value) -> Response {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json, text/event-stream");
        if let Some(id) = session {
            builder = builder.header(SESSION, id);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn get(&self, session: Option<&str>, last_event_id: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method("GET")
            .uri("/mcp")
            .header(header::ACCEPT, "text/event-stream");
        if let Some(id) = session {
            builder = builder.header(SESSION, id);
        }
        if let Some(id) = last_event_id {
            builder = builder.header("last-event-id", id);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn delete(&self, session: &str) -> Response {
        let request = Request::builder()
            .method("DELETE")
            .uri("/mcp")
            .header(SESSION, session)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    /// Initialize a session and return its id.
    async fn initialize(&self) -> String {
        let response = self.post(None, initialize_request()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let session_id = response
            .headers()
            .get(SESSION)
            .expect("initialize must return a session id")
            .to_str()
            .unwrap()
            .to_string();

        let ack = self
            .post(
                Some(&session_id),
                json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            )
            .await;
        assert_eq!(ack.status(), StatusCode::ACCEPTED);
        session_id
    }
}

fn initialize_request() -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 0,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": {"name": "test-client", "version": "1.0.0"}
        }
    })
}

fn tool_call(id: i64, name: &str, arguments: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": {"name": name, "arguments": arguments}
    })
}

async fn json_body(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Parse one SSE block into its id and JSON data.
fn parse_block(block: &str) -> Option<(Option<String>, Value)> {
    let mut id = None;
    let mut data = None;
    for line in block.lines() {
        if let Some(rest) = line.strip_prefix("id:") {
            id = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data = Some(serde_json::from_str(rest.trim()).unwrap());
        }
    }
    data.map(|data| (id, data))
}

/// All events of a finite SSE response.
async fn sse_events(response: Response) -> Vec<(Option<String>, Value)> {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    text.split("\n\n").filter_map(parse_block).collect()
}

/// First event of an open SSE stream, or `None` if nothing arrives in time.
async fn first_event(response: Response, wait: Duration) -> Option<(Option<String>, Value)> {
    let mut body = response.into_body();
    let mut buffer = String::new();
    loop {
        if let Some(end) = buffer.find("\n\n") {
            let block: String = buffer.drain(..end + 2).collect();
            match parse_block(&block) {
                Some(event) => return Some(event),
                None => continue,
            }
        }
        let frame = tokio::time::timeout(wait, body.frame()).await.ok()??.ok()?;
        if let Ok(data) = frame.into_data() {
            buffer.push_str(&String::from_utf8_lossy(&data));
        }
    }
}

#[tokio::test]
async fn test_end_to_end_session_lifecycle() {
    let h = Harness::new(true);
    h.api.seed_account("Checking", false).await;

    let session = h.initialize().await;
    assert_eq!(h.state.registry.len(), 1);

    let response = h
        .post(Some(&session), tool_call(1, "get-accounts", json!({})))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["id"], 1);
    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("Checking"));

    let stream = h.get(Some(&session), None).await;
    assert_eq!(stream.status(), StatusCode::OK);
    assert!(stream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .starts_with("text/event-stream"));
    drop(stream);

    assert_eq!(h.delete(&session).await.status(), StatusCode::OK);
    assert!(h.state.registry.is_empty());

    let response = h
        .post(Some(&session), tool_call(2, "get-accounts", json!({})))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["message"], "Bad Request: Transport not initialized");
    assert_eq!(body["error"]["code"], -32000);
    assert_eq!(body["id"], Value::Null);
}

#[tokio::test]
async fn test_concurrent_initializes_get_distinct_sessions() {
    let h = Harness::new(true);

    let ids = join_all((0..10).map(|_| h.initialize())).await;

    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), 10);
    assert_eq!(h.state.registry.len(), 10);
    for id in &ids {
        assert!(h.state.registry.get(id).is_some());
    }
}

#[tokio::test]
async fn test_unknown_session_is_rejected_without_creating_one() {
    let h = Harness::new(true);

    let response = h
        .post(Some("no-such-session"), tool_call(1, "get-accounts", json!({})))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(h.state.registry.is_empty());
    assert_eq!(h.api.init_calls(), 0);
}

#[tokio::test]
async fn test_undecodable_session_header_never_initializes() {
    let h = Harness::new(true);

    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT, "application/json, text/event-stream")
        .header(SESSION, HeaderValue::from_bytes(b"caf\xe9").unwrap())
        .body(Body::from(initialize_request().to_string()))
        .unwrap();
    let response = h.send(request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.headers().get(SESSION).is_none());
    assert!(h.state.registry.is_empty());
}

#[tokio::test]
async fn test_missing_session_on_non_initialize() {
    let h = Harness::new(true);

    let response = h.post(None, tool_call(1, "get-accounts", json!({}))).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["message"], "Bad Request: No valid session ID provided");
    assert!(h.state.registry.is_empty());
}

#[tokio::test]
async fn test_get_and_delete_never_create_sessions() {
    let h = Harness::new(true);

    assert_eq!(h.get(None, None).await.status(), StatusCode::BAD_REQUEST);
    assert_eq!(h.get(Some("ghost"), None).await.status(), StatusCode::BAD_REQUEST);
    assert_eq!(h.delete("ghost").await.status(), StatusCode::BAD_REQUEST);
    assert!(h.state.registry.is_empty());
}

#[tokio::test]
async fn test_delete_twice_is_a_client_error() {
    let h = Harness::new(true);
    let session = h.initialize().await;

    assert_eq!(h.delete(&session).await.status(), StatusCode::OK);
    assert_eq!(h.delete(&session).await.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_second_initialize_on_session_is_rejected() {
    let h = Harness::new(true);
    let session = h.initialize().await;

    let response = h.post(Some(&session), initialize_request()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(h.state.registry.len(), 1);
}

#[tokio::test]
async fn test_http_level_validation() {
    let h = Harness::new(true);

    let wrong_type = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(initialize_request().to_string()))
        .unwrap();
    assert_eq!(
        h.send(wrong_type).await.status(),
        StatusCode::UNSUPPORTED_MEDIA_TYPE
    );

    let wrong_accept = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT, "text/html")
        .body(Body::from(initialize_request().to_string()))
        .unwrap();
    assert_eq!(h.send(wrong_accept).await.status(), StatusCode::NOT_ACCEPTABLE);

    let garbage = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = h.send(garbage).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["code"], -32700);

    assert!(h.state.registry.is_empty());
}

#[tokio::test]
async fn test_sse_responses_carry_event_ids() {
    let h = Harness::new(false);

    let response = h.post(None, initialize_request()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(SESSION));
    let events = sse_events(response).await;
    assert_eq!(events.len(), 1);
    assert!(events[0].0.is_some());
    assert!(events[0].1["result"]["serverInfo"].is_object());
}

#[tokio::test]
async fn test_resume_replays_own_stream_only() {
    let h = Harness::new(false);
    let x = h.initialize().await;
    let y = h.initialize().await;

    let batch = json!([
        {"jsonrpc": "2.0", "id": 1, "method": "ping"},
        {"jsonrpc": "2.0", "id": 2, "method": "tools/list"}
    ]);
    let mut events = sse_events(h.post(Some(&x), batch).await).await;
    assert_eq!(events.len(), 2);
    // The two requests run concurrently; ids give the stored order.
    events.sort_by(|a, b| a.0.cmp(&b.0));
    let first_id = events[0].0.clone().unwrap();
    let second_id = events[1].0.clone().unwrap();

    // X resumes after the first frame and gets the second.
    let resumed = h.get(Some(&x), Some(&first_id)).await;
    assert_eq!(resumed.status(), StatusCode::OK);
    let (id, data) = first_event(resumed, Duration::from_secs(2)).await.unwrap();
    assert_eq!(id.as_deref(), Some(second_id.as_str()));
    assert_eq!(data, events[1].1);

    // Y does not know X's event ids.
    let other = h.get(Some(&y), Some(&first_id)).await;
    assert_eq!(other.status(), StatusCode::OK);
    assert!(first_event(other, Duration::from_millis(200)).await.is_none());
}

#[tokio::test]
async fn test_resume_with_unknown_event_id() {
    let h = Harness::new(false);
    let session = h.initialize().await;

    let response = h.get(Some(&session), Some("standalone_00000000000000000042")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(first_event(response, Duration::from_millis(200)).await.is_none());
}

#[tokio::test]
async fn test_write_tool_notifies_standalone_stream() {
    let h = Harness::new(true);
    let session = h.initialize().await;

    let stream = h.get(Some(&session), None).await;
    assert_eq!(stream.status(), StatusCode::OK);

    let response = h
        .post(
            Some(&session),
            tool_call(1, "create-payee", json!({"name": "Bakery"})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let (id, data) = first_event(stream, Duration::from_secs(2)).await.unwrap();
    assert!(id.unwrap().starts_with("standalone_"));
    assert_eq!(data["method"], "notifications/resources/list_changed");
}

#[tokio::test]
async fn test_only_one_standalone_stream() {
    let h = Harness::new(true);
    let session = h.initialize().await;

    let first = h.get(Some(&session), None).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(h.get(Some(&session), None).await.status(), StatusCode::CONFLICT);

    drop(first);
    assert_eq!(h.get(Some(&session), None).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_and_metrics() {
    let h = Harness::new(true);
    h.initialize().await;

    let health = h
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(health.status(), StatusCode::OK);
    let body = json_body(health).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sessions"], 1);

    let metrics = h
        .send(Request::get("/metrics").body(Body::empty()).unwrap())
        .await;
    assert_eq!(metrics.status(), StatusCode::OK);
    let bytes = metrics.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("budget_mcp_sessions_created 1\n"));
    assert!(text.contains("budget_mcp_active_sessions 1\n"));
}

#[tokio::test]
async fn test_bearer_gate_covers_mcp_only() {
    let verifier: Arc<dyn TokenVerifier> =
        Arc::new(StaticTokenVerifier::new(vec!["letmein".to_string()]));
    let h = Harness::with_verifier(true, Some(verifier));

    let denied = h.post(None, initialize_request()).await;
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
    assert!(denied.headers().contains_key(header::WWW_AUTHENTICATE));

    let allowed = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, "Bearer letmein")
        .body(Body::from(initialize_request().to_string()))
        .unwrap();
    assert_eq!(h.send(allowed).await.status(), StatusCode::OK);

    let health = h
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(health.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_shutdown_closes_sessions_and_backend() {
    let h = Harness::new(true);
    let session = h.initialize().await;
    h.post(Some(&session), tool_call(1, "get-accounts", json!({})))
        .await;
    assert_eq!(h.api.init_calls(), 1);

    h.state.registry.close_all();
    h.state.backend.shutdown().await.unwrap();

    assert!(h.state.registry.is_empty());
    assert_eq!(h.api.shutdown_calls(), 1);
    let response = h
        .post(Some(&session), tool_call(2, "get-accounts", json!({})))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

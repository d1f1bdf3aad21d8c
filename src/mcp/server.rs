//! MCP server implementation.
//!
//! One [`McpServer`] serves one session: it holds that session's
//! negotiated protocol state and in-flight requests, and dispatches each
//! JSON-RPC request to the shared tool, resource and prompt registries.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::mcp::handler::{error_result, McpHandler, ToolContext};
use crate::mcp::progress::ProgressReporter;
use crate::mcp::prompts::{ListPromptsResult, PromptRegistry};
use crate::mcp::protocol::*;
use crate::mcp::resources::ResourceRegistry;
use crate::mcp::transport::{Message, Transport};
use crate::metrics::Metrics;
use crate::{SERVER_NAME, VERSION};

/// Receives messages the server initiates outside any request.
#[async_trait]
pub trait ServerNotifier: Send + Sync {
    async fn notify(&self, notification: JsonRpcNotification);
}

#[async_trait]
impl ServerNotifier for mpsc::Sender<Message> {
    async fn notify(&self, notification: JsonRpcNotification) {
        if self.send(Message::Notification(notification)).await.is_err() {
            debug!("Dropping notification, output closed");
        }
    }
}

/// Shared registries from which per-session servers are built.
#[derive(Clone)]
pub struct McpServerFactory {
    handler: Arc<McpHandler>,
    prompts: Arc<PromptRegistry>,
    resources: Option<ResourceRegistry>,
    metrics: Option<Arc<Metrics>>,
}

impl McpServerFactory {
    pub fn new(handler: McpHandler) -> Self {
        Self {
            handler: Arc::new(handler),
            prompts: Arc::new(PromptRegistry::new()),
            resources: None,
            metrics: None,
        }
    }

    pub fn with_resources(mut self, resources: ResourceRegistry) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn tool_count(&self) -> usize {
        self.handler.tool_count()
    }

    /// A fresh server with no session state.
    pub fn create(&self) -> McpServer {
        McpServer {
            handler: self.handler.clone(),
            prompts: self.prompts.clone(),
            resources: self.resources.clone(),
            metrics: self.metrics.clone(),
            name: SERVER_NAME.to_string(),
            version: VERSION.to_string(),
            notifier: None,
            initialized: AtomicBool::new(false),
            protocol_version: Mutex::new(None),
            active_requests: Mutex::new(HashMap::new()),
        }
    }
}

/// MCP server for one session.
pub struct McpServer {
    handler: Arc<McpHandler>,
    prompts: Arc<PromptRegistry>,
    resources: Option<ResourceRegistry>,
    metrics: Option<Arc<Metrics>>,
    name: String,
    version: String,
    notifier: Option<Arc<dyn ServerNotifier>>,
    initialized: AtomicBool,
    protocol_version: Mutex<Option<String>>,
    /// In-flight requests, cancellable via `notifications/cancelled`.
    active_requests: Mutex<HashMap<RequestId, CancellationToken>>,
}

impl McpServer {
    /// Route server-initiated notifications to `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn ServerNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Protocol version agreed at initialize.
    pub fn protocol_version(&self) -> Option<String> {
        self.protocol_version
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run the server over a message transport until its input ends.
    pub async fn run<T: Transport>(self, mut transport: T) -> Result<()> {
        info!("Starting MCP server: {} v{}", self.name, self.version);

        let (mut incoming, outgoing) = transport.start().await?;
        let server = Arc::new(self.with_notifier(Arc::new(outgoing.clone())));

        while let Some(msg) = incoming.recv().await {
            match msg {
                Message::Request(req) => {
                    // Requests run concurrently so a cancellation can reach
                    // one that is still in flight.
                    let server = server.clone();
                    let outgoing = outgoing.clone();
                    tokio::spawn(async move {
                        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
                        let forward = {
                            let outgoing = outgoing.clone();
                            tokio::spawn(async move {
                                while let Some(n) = progress_rx.recv().await {
                                    if outgoing.send(Message::Notification(n)).await.is_err() {
                                        break;
                                    }
                                }
                            })
                        };

                        let response = server.handle_request(req, Some(progress_tx)).await;
                        let _ = forward.await;
                        if outgoing.send(Message::Response(response)).await.is_err() {
                            error!("Failed to send response");
                        }
                    });
                }
                Message::Notification(notif) => {
                    server.handle_notification(notif).await;
                }
                Message::Response(_) => {
                    warn!("Received unexpected response");
                }
            }
        }

        transport.stop().await?;
        info!("MCP server stopped");
        Ok(())
    }

    /// Handle one JSON-RPC request.
    ///
    /// `progress` receives progress notifications emitted while the request
    /// runs; it is dropped before this returns.
    pub async fn handle_request(
        &self,
        req: JsonRpcRequest,
        progress: Option<mpsc::UnboundedSender<JsonRpcNotification>>,
    ) -> JsonRpcResponse {
        debug!("Handling request: {} (id: {:?})", req.method, req.id);

        let token = CancellationToken::new();
        self.requests().insert(req.id.clone(), token.clone());

        let dispatch = self.dispatch(&req.method, req.params, progress);
        let result = tokio::select! {
            result = dispatch => result,
            _ = token.cancelled() => Err(Error::McpProtocol("Request cancelled".to_string())),
        };

        self.requests().remove(&req.id);

        match result {
            Ok(value) => JsonRpcResponse::success(req.id, value),
            Err(e) => {
                debug!("Request {} failed: {}", req.method, e);
                JsonRpcResponse::failure(req.id, error_code_for(&e), e.to_string())
            }
        }
    }

    fn requests(&self) -> std::sync::MutexGuard<'_, HashMap<RequestId, CancellationToken>> {
        self.active_requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn dispatch(
        &self,
        method: &str,
        params: Option<Value>,
        progress: Option<mpsc::UnboundedSender<JsonRpcNotification>>,
    ) -> Result<Value> {
        if method != "initialize" && method != "ping" && !self.is_initialized() {
            return Err(Error::NotInitialized);
        }

        match method {
            // Core
            "initialize" => self.handle_initialize(params).await,
            "ping" => Ok(serde_json::json!({})),
            // Tools
            "tools/list" => self.handle_list_tools().await,
            "tools/call" => self.handle_call_tool(params, progress).await,
            // Prompts
            "prompts/list" => self.handle_list_prompts().await,
            "prompts/get" => self.handle_get_prompt(params).await,
            // Resources
            "resources/list" => self.handle_list_resources().await,
            "resources/read" => self.handle_read_resource(params).await,
            _ => Err(Error::MethodNotFound(method.to_string())),
        }
    }

    /// Handle a notification.
    pub async fn handle_notification(&self, notif: JsonRpcNotification) {
        debug!("Handling notification: {}", notif.method);

        match notif.method.as_str() {
            "notifications/initialized" => {
                info!("Client initialized");
            }
            "notifications/cancelled" => {
                #[derive(Deserialize)]
                struct CancelledParams {
                    #[serde(rename = "requestId")]
                    request_id: RequestId,
                }
                if let Some(cancel) = notif
                    .params
                    .and_then(|p| serde_json::from_value::<CancelledParams>(p).ok())
                {
                    if let Some(token) = self.requests().remove(&cancel.request_id) {
                        info!("Cancelling request: {:?}", cancel.request_id);
                        token.cancel();
                    }
                }
            }
            _ => {
                debug!("Unknown notification: {}", notif.method);
            }
        }
    }

    async fn notify(&self, notification: JsonRpcNotification) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(notification).await;
        }
    }

    async fn handle_initialize(&self, params: Option<Value>) -> Result<Value> {
        #[derive(Deserialize, Default)]
        #[serde(rename_all = "camelCase")]
        struct InitParams {
            #[serde(default)]
            protocol_version: Option<String>,
            #[serde(default)]
            client_info: Option<ServerInfo>,
        }

        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyInitialized);
        }

        let init: InitParams = params
            .and_then(|p| serde_json::from_value(p).ok())
            .unwrap_or_default();
        let version = negotiate_protocol_version(init.protocol_version.as_deref());
        *self
            .protocol_version
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(version.to_string());

        if let Some(client) = &init.client_info {
            info!(
                client = %client.name,
                client_version = %client.version,
                protocol = version,
                "Client connected"
            );
        }

        let result = InitializeResult {
            protocol_version: version.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
                resources: self.resources.as_ref().map(|_| ResourcesCapability {
                    subscribe: false,
                    list_changed: true,
                }),
                prompts: Some(PromptsCapability {
                    list_changed: false,
                }),
                logging: None,
            },
            server_info: ServerInfo {
                name: self.name.clone(),
                version: self.version.clone(),
            },
            instructions: None,
        };

        Ok(serde_json::to_value(result)?)
    }

    async fn handle_list_tools(&self) -> Result<Value> {
        let tools = self.handler.list_tools();
        Ok(serde_json::to_value(ListToolsResult { tools })?)
    }

    /// Unknown tools and malformed arguments fail the request; any other
    /// tool failure becomes an `isError` result so the session carries on.
    async fn handle_call_tool(
        &self,
        params: Option<Value>,
        progress: Option<mpsc::UnboundedSender<JsonRpcNotification>>,
    ) -> Result<Value> {
        let params: CallToolParams = parse_params(params)?;

        let handler = self
            .handler
            .get_tool(&params.name)
            .ok_or_else(|| Error::ToolNotFound(params.name.clone()))?;

        let ctx = ToolContext {
            progress: params
                .meta
                .and_then(|m| m.progress_token)
                .zip(progress)
                .map(|(token, sender)| ProgressReporter::new(token, sender, None)),
        };

        if let Some(metrics) = &self.metrics {
            metrics.inc_tool_calls();
        }

        let result = match handler.execute(params.arguments, &ctx).await {
            Ok(result) => result,
            Err(e @ Error::InvalidToolArguments(_)) => return Err(e),
            Err(e) => {
                warn!(tool = %params.name, "Tool execution failed: {}", e);
                if let Some(metrics) = &self.metrics {
                    metrics.inc_tool_errors();
                }
                error_result(format!("Error: {}", e))
            }
        };
        drop(ctx);

        if handler.mutates() && !result.is_error {
            self.notify(JsonRpcNotification::new(
                "notifications/resources/list_changed",
                None,
            ))
            .await;
        }

        Ok(serde_json::to_value(result)?)
    }

    async fn handle_list_prompts(&self) -> Result<Value> {
        let result = ListPromptsResult {
            prompts: self.prompts.list(),
            next_cursor: None,
        };
        Ok(serde_json::to_value(result)?)
    }

    async fn handle_get_prompt(&self, params: Option<Value>) -> Result<Value> {
        #[derive(Deserialize)]
        struct GetPromptParams {
            name: String,
            #[serde(default)]
            arguments: HashMap<String, String>,
        }

        let params: GetPromptParams = parse_params(params)?;
        let result = self.prompts.get(&params.name, &params.arguments)?;
        Ok(serde_json::to_value(result)?)
    }

    async fn handle_list_resources(&self) -> Result<Value> {
        let resources = self.resource_registry()?;
        Ok(serde_json::to_value(resources.list().await?)?)
    }

    async fn handle_read_resource(&self, params: Option<Value>) -> Result<Value> {
        #[derive(Deserialize)]
        struct ReadParams {
            uri: String,
        }

        let resources = self.resource_registry()?;
        let params: ReadParams = parse_params(params)?;
        Ok(serde_json::to_value(resources.read(&params.uri).await?)?)
    }

    fn resource_registry(&self) -> Result<&ResourceRegistry> {
        self.resources
            .as_ref()
            .ok_or_else(|| Error::MethodNotFound("resources are not enabled".to_string()))
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<T> {
    params
        .ok_or_else(|| Error::InvalidToolArguments("Missing params".to_string()))
        .and_then(|v| {
            serde_json::from_value(v).map_err(|e| Error::InvalidToolArguments(e.to_string()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::handler::{get_string_arg, success_result, ToolHandler};
    use crate::mcp::protocol::{Tool, ToolResult};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct FlakyTool;

    #[async_trait]
    impl ToolHandler for FlakyTool {
        fn definition(&self) -> Tool {
            Tool {
                name: "flaky".to_string(),
                description: "Fails on demand".to_string(),
                input_schema: json!({"type": "object"}),
            }
        }

        async fn execute(
            &self,
            args: HashMap<String, Value>,
            ctx: &ToolContext,
        ) -> Result<ToolResult> {
            let mode = get_string_arg(&args, "mode")?;
            if let Some(progress) = &ctx.progress {
                progress.report(1, Some("working"));
            }
            match mode.as_str() {
                "fail" => Err(Error::Backend("budget server unreachable".to_string())),
                "slow" => {
                    tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                    Ok(success_result("late"))
                }
                _ => Ok(success_result("ok")),
            }
        }
    }

    struct WriteTool;

    #[async_trait]
    impl ToolHandler for WriteTool {
        fn definition(&self) -> Tool {
            Tool {
                name: "write".to_string(),
                description: "Mutates".to_string(),
                input_schema: json!({"type": "object"}),
            }
        }

        fn mutates(&self) -> bool {
            true
        }

        async fn execute(&self, _: HashMap<String, Value>, _: &ToolContext) -> Result<ToolResult> {
            Ok(success_result("written"))
        }
    }

    #[derive(Default)]
    struct CountingNotifier(AtomicUsize);

    #[async_trait]
    impl ServerNotifier for CountingNotifier {
        async fn notify(&self, notification: JsonRpcNotification) {
            assert_eq!(notification.method, "notifications/resources/list_changed");
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn request(id: i64, method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Number(id),
            method: method.to_string(),
            params: Some(params),
        }
    }

    fn server() -> McpServer {
        let mut handler = McpHandler::new();
        handler.register(FlakyTool);
        handler.register(WriteTool);
        McpServerFactory::new(handler).create()
    }

    async fn initialized(server: McpServer) -> McpServer {
        let resp = server
            .handle_request(request(0, "initialize", json!({"protocolVersion": "2024-11-05"})), None)
            .await;
        assert!(resp.error.is_none());
        server
    }

    #[tokio::test]
    async fn test_initialize_negotiates_version() {
        let server = initialized(server()).await;
        assert!(server.is_initialized());
        assert_eq!(server.protocol_version().as_deref(), Some("2024-11-05"));

        let again = server.handle_request(request(1, "initialize", json!({})), None).await;
        assert_eq!(again.error.unwrap().code, error_codes::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_requests_before_initialize_rejected() {
        let server = server();
        let resp = server.handle_request(request(1, "tools/list", json!({})), None).await;
        assert!(resp.error.is_some());

        let ping = server.handle_request(request(2, "ping", json!({})), None).await;
        assert!(ping.error.is_none());
    }

    #[tokio::test]
    async fn test_tool_failure_becomes_error_result() {
        let server = initialized(server()).await;
        let resp = server
            .handle_request(
                request(1, "tools/call", json!({"name": "flaky", "arguments": {"mode": "fail"}})),
                None,
            )
            .await;

        let result = resp.result.unwrap();
        assert_eq!(result["isError"], json!(true));
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("budget server unreachable"));
    }

    #[tokio::test]
    async fn test_unknown_tool_and_bad_arguments_are_protocol_errors() {
        let server = initialized(server()).await;

        let unknown = server
            .handle_request(request(1, "tools/call", json!({"name": "missing"})), None)
            .await;
        assert_eq!(unknown.error.unwrap().code, error_codes::INVALID_PARAMS);

        let bad_args = server
            .handle_request(request(2, "tools/call", json!({"name": "flaky", "arguments": {}})), None)
            .await;
        assert_eq!(bad_args.error.unwrap().code, error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let server = initialized(server()).await;
        let resp = server.handle_request(request(1, "sampling/create", json!({})), None).await;
        assert_eq!(resp.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_progress_forwarded_when_token_present() {
        let server = initialized(server()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let resp = server
            .handle_request(
                request(
                    1,
                    "tools/call",
                    json!({"name": "flaky", "arguments": {"mode": "ok"}, "_meta": {"progressToken": "p1"}}),
                ),
                Some(tx),
            )
            .await;

        assert!(resp.error.is_none());
        let progress = rx.recv().await.unwrap();
        assert_eq!(progress.method, "notifications/progress");
        assert_eq!(progress.params.unwrap()["progressToken"], json!("p1"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_mutating_tool_pushes_list_changed() {
        let notifier = Arc::new(CountingNotifier::default());
        let server = initialized(server().with_notifier(notifier.clone())).await;

        server
            .handle_request(request(1, "tools/call", json!({"name": "write"})), None)
            .await;
        server
            .handle_request(
                request(2, "tools/call", json!({"name": "flaky", "arguments": {"mode": "ok"}})),
                None,
            )
            .await;

        assert_eq!(notifier.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_notification_aborts_request() {
        let server = Arc::new(initialized(server()).await);

        let call = {
            let server = server.clone();
            tokio::spawn(async move {
                server
                    .handle_request(
                        request(9, "tools/call", json!({"name": "flaky", "arguments": {"mode": "slow"}})),
                        None,
                    )
                    .await
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        server
            .handle_notification(JsonRpcNotification::new(
                "notifications/cancelled",
                Some(json!({"requestId": 9})),
            ))
            .await;

        let resp = call.await.unwrap();
        assert!(resp.error.unwrap().message.contains("cancelled"));
    }

    #[tokio::test]
    async fn test_prompts_available() {
        let server = initialized(server()).await;
        let resp = server.handle_request(request(1, "prompts/list", json!({})), None).await;
        let prompts = resp.result.unwrap()["prompts"].as_array().unwrap().len();
        assert_eq!(prompts, 2);
    }
}

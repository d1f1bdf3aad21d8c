//! Budget MCP Gateway
//!
//! Exposes a budget-sync server as MCP tools over stdio or streamable HTTP.

use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

use budget_mcp::backend::{BackendClient, HttpBudgetApi};
use budget_mcp::config::{Args, Config, Transport};
use budget_mcp::error::Result;
use budget_mcp::mcp::handler::McpHandler;
use budget_mcp::mcp::resources::ResourceRegistry;
use budget_mcp::mcp::server::McpServerFactory;
use budget_mcp::mcp::transport::StdioTransport;
use budget_mcp::metrics::Metrics;
use budget_mcp::{logging, tools, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let config: Config = args.into();
    logging::init(config.debug, config.log_json)?;

    info!("Budget MCP Gateway v{}", VERSION);
    info!("Transport: {:?}", config.transport);

    // Missing credentials are reported again, as an error, on first use.
    if let Err(e) = config.backend.validate() {
        warn!("{}", e);
    }

    let api = Arc::new(HttpBudgetApi::new()?);
    let backend = BackendClient::new(api, config.backend.clone());
    let metrics = Metrics::new();

    let mut handler = McpHandler::new();
    tools::register_all_tools(&mut handler, &backend, config.enable_write);
    info!(
        "Registered {} MCP tools (writes {})",
        handler.tool_count(),
        if config.enable_write { "enabled" } else { "disabled" }
    );

    let factory = McpServerFactory::new(handler)
        .with_resources(ResourceRegistry::new(backend.clone()))
        .with_metrics(metrics.clone());

    match config.transport {
        Transport::Stdio => {
            info!("Starting stdio transport...");
            let result = factory.create().run(StdioTransport::new()).await;
            if let Err(e) = backend.shutdown().await {
                warn!("Backend shutdown failed: {}", e);
            }
            result?;
        }
        Transport::Http => {
            budget_mcp::http::start_server(&config, factory, backend, metrics).await?;
        }
    }

    Ok(())
}

//! Start an azure-claude-proxy server programmatically.
//!
//! Usage:
//!   export AZURE_OPENAI_API_KEY=your_key
//!   cargo run --example basic_proxy

use azure_claude_proxy::{build_router, AppState, ProxyConfig, SharedLogger};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = ProxyConfig::find_and_load(None)?;
    config.validate()?;

    println!("Endpoint: {}", config.azure.endpoint);
    println!(
        "Deployments: opus={} sonnet={} haiku={}",
        config.deployments.opus, config.deployments.sonnet, config.deployments.haiku
    );

    let logger = SharedLogger::new("proxy-example.log")?;
    let client = config.build_client()?;

    let port = config.port;
    let state = Arc::new(AppState {
        config,
        client,
        logger,
    });

    let app = build_router(state);
    let addr = format!("127.0.0.1:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!("Listening on http://{addr}");
    println!();
    println!("  ANTHROPIC_BASE_URL=http://localhost:{port} claude");

    axum::serve(listener, app).await?;
    Ok(())
}

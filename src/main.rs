use azure_claude_proxy::config::config_search_paths;
use azure_claude_proxy::{build_router, AppState, ProxyConfig, SharedLogger};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "azure-claude-proxy",
    about = "Serve the Anthropic Messages API from Azure OpenAI deployments",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Request log file path (JSONL)
    #[arg(long, default_value = "azure-claude-proxy.log")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "azure_claude_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = ProxyConfig::find_and_load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    // Validate config eagerly
    config.validate()?;
    let _api_key = config.resolve_api_key()?;

    let logger = SharedLogger::new(&cli.log_file)?;

    info!("azure-claude-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("  Endpoint:     {}", config.azure.endpoint);
    info!("  API version:  {}", config.azure.api_version);
    info!(
        "  Deployments:  opus={} sonnet={} haiku={}",
        config.deployments.opus, config.deployments.sonnet, config.deployments.haiku
    );
    info!("  Port:         {}", config.port);
    info!("  Log file:     {}", cli.log_file.display());

    logger.info(
        "startup",
        format!(
            "Starting azure-claude-proxy endpoint={} port={}",
            config.azure.endpoint, config.port
        ),
    );

    let client = config.build_client()?;

    let state = Arc::new(AppState {
        config: config.clone(),
        client,
        logger,
    });

    let app = build_router(state);
    let bind_addr = format!("127.0.0.1:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  ANTHROPIC_BASE_URL=http://localhost:{}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}

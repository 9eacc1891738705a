use chat_relay::{build_router, AppState, RelayConfig};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "chat-relay",
    about = "Chat Completions relay — translate OpenAI-shaped requests to a reasoning-capable upstream",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Request extended reasoning from the upstream (overrides config)
    #[arg(long)]
    thinking: bool,

    /// Drop upstream reasoning text instead of folding it into content
    #[arg(long)]
    hide_reasoning: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = RelayConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.thinking {
        config.thinking_mode = true;
    }
    if cli.hide_reasoning {
        config.show_reasoning = false;
    }

    // Validate config eagerly
    let base_url = config.effective_base_url()?;
    let _api_key = config.resolve_api_key()?;

    info!("chat-relay v{}", env!("CARGO_PKG_VERSION"));
    info!("  Upstream:   {}", base_url);
    info!("  Port:       {}", config.port);
    info!("  Models:     {} mapped", config.models.len());
    info!("  Reasoning:  {}", if config.show_reasoning { "shown" } else { "hidden" });
    info!("  Thinking:   {}", if config.thinking_mode { "on" } else { "off" });

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let state = Arc::new(AppState {
        config: config.clone(),
        client,
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

//! Hookhub - GitHub webhook receiver.
//!
//! Loads the repository configuration, builds every handler, then serves
//! `POST /github_webhook` until interrupted.

use clap::Parser;
use hookhub::{build_router, AppState, BuildOptions, Config, DispatchContext, Dispatcher, HandlerKind, Registry};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hookhub")]
#[command(author, version, about)]
#[command(about = "Routes GitHub release and push webhooks to notification handlers")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "hookhub.toml")]
    config: PathBuf,

    /// Verbose logging; emails are logged instead of sent
    #[arg(short, long)]
    debug: bool,

    /// List available handler types
    #[arg(long)]
    list_handlers: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.list_handlers {
        list_available_handlers();
        return;
    }

    init_logging(cli.debug);
    if cli.debug {
        info!("Debug mode enabled");
    }

    if let Err(e) = run(&cli).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

fn default_filter(debug: bool) -> &'static str {
    if debug {
        "hookhub=debug"
    } else {
        "hookhub=info"
    }
}

fn init_logging(debug: bool) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(debug).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = Config::load(&cli.config)
        .map_err(|e| anyhow::anyhow!("Failed to initialize from config: {}", e))?;

    let options = BuildOptions {
        debug: cli.debug,
        tracker: config.tracker.clone(),
    };
    let registry = Registry::from_config(&config, &options)
        .map_err(|e| anyhow::anyhow!("Failed to initialize from config: {}", e))?;
    let mut names: Vec<&str> = registry.repository_names().collect();
    names.sort_unstable();
    info!(count = registry.len(), repositories = ?names, "Registry built");

    let dispatcher = Dispatcher::new(Arc::new(registry), DispatchContext::default());
    let app = build_router(AppState::new(Arc::new(dispatcher)));

    let addr = format!("{}:{}", config.bind_address, config.effective_port());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

fn list_available_handlers() {
    println!("Available handler types:");
    for kind in HandlerKind::all() {
        println!("  - {}", kind);
    }
}

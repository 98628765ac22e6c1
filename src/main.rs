mod config;
mod error;
mod exporter;
mod gate;
mod metrics;
mod selector;
mod server;
mod speedtest;
mod traits;
mod types;
mod utils;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use config::Settings;
use exporter::Exporter;
use speedtest::SpeedtestNet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use traits::DirectoryClient;

#[derive(Parser)]
#[command(name = "speedtest-exporter")]
#[command(about = "Prometheus exporter that runs a speedtest on every scrape", long_about = None)]
struct Cli {
    /// Settings file (default: ~/.config/speedtest-exporter/config.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log format: pretty or json
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve metrics over HTTP (e.g., speedtest-exporter serve --port 9090)
    Serve {
        #[command(flatten)]
        target: TargetArgs,

        /// Listening port to expose metrics on
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run a single speedtest and print the results
    Test {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// List the nearest speedtest.net servers and their IDs
    Servers,
}

#[derive(Args)]
struct TargetArgs {
    /// Comma-separated Speedtest.net server IDs to test against, -1 picks the closest server
    #[arg(long)]
    server_ids: Option<String>,

    /// If a requested server ID is not available, fall back to the closest available server
    #[arg(long)]
    server_fallback: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(format) = cli.log_format {
        settings.log_format = format;
    }

    let settings = match &cli.command {
        Commands::Serve { target, port } => {
            settings.with_overrides(*port, target.server_ids.as_deref(), target.server_fallback)?
        }
        Commands::Test { target } => {
            settings.with_overrides(None, target.server_ids.as_deref(), target.server_fallback)?
        }
        Commands::Servers => {
            settings.validate()?;
            settings
        }
    };

    setup_tracing(&settings.log_format, cli.verbose);

    match cli.command {
        Commands::Serve { .. } => handle_serve(settings).await?,
        Commands::Test { .. } => handle_test(settings).await?,
        Commands::Servers => handle_servers(settings).await?,
    }

    Ok(())
}

fn setup_tracing(format: &str, verbose: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            tracing_subscriber::EnvFilter::new("speedtest_exporter=debug,tower_http=debug,info")
        } else {
            tracing_subscriber::EnvFilter::new("speedtest_exporter=info,warn")
        }
    });

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}

fn build_exporter(settings: &Settings) -> Result<Exporter> {
    let client = Arc::new(SpeedtestNet::new(settings.transfer.clone())?);
    Ok(Exporter::new(settings.selection(), client.clone(), client))
}

// --- Handlers ---

async fn handle_serve(settings: Settings) -> Result<()> {
    let exporter = build_exporter(&settings)?;
    let state = server::AppState::new(exporter, settings.scrape_timeout());

    tracing::info!(
        port = settings.port,
        server_ids = ?settings.server_ids,
        server_fallback = settings.server_fallback,
        scrape_timeout_secs = settings.scrape_timeout().as_secs(),
        "starting speedtest exporter"
    );

    server::serve(state, settings.port, shutdown_signal()).await?;
    Ok(())
}

async fn handle_test(settings: Settings) -> Result<()> {
    let exporter = build_exporter(&settings)?;
    let cancel = CancellationToken::new();

    // Ctrl-C aborts the run instead of killing the process mid-output
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let deadline = cancel.clone();
    let timeout = settings.scrape_timeout();
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        deadline.cancel();
    });

    let report = utils::run_with_progress(&exporter, &cancel).await;
    utils::print_report(&report);

    if !report.healthy {
        bail!("Speedtest failed. Run with --verbose for details.");
    }
    Ok(())
}

async fn handle_servers(settings: Settings) -> Result<()> {
    let client = SpeedtestNet::new(settings.transfer)?;
    let servers = client.fetch_servers(&CancellationToken::new()).await?;

    if servers.is_empty() {
        bail!("No servers returned. Please check your network connection.");
    }
    utils::print_servers(&servers);
    println!();
    println!("Run 'speedtest-exporter serve --server-ids {}' to use one.", servers[0].id);
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutting down server");
}

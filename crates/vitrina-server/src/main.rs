// crates/vitrina-server/src/main.rs
// Vitrina - conversational product-search gateway

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use vitrina::background;
use vitrina::config::Settings;
use vitrina::web::{create_router, state::AppState};

#[derive(Parser)]
#[command(name = "vitrina", about = "Conversational product-search gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default)
    Serve,
    /// Load the configuration, print the validation report and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; real deployments configure the environment directly.
    let _ = dotenvy::dotenv();

    let log_level = std::env::var("VITRINA_LOG_LEVEL")
        .ok()
        .and_then(|raw| raw.parse::<Level>().ok())
        .unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let cli = Cli::parse();
    match cli.command {
        None | Some(Commands::Serve) => serve().await,
        Some(Commands::CheckConfig) => {
            let report = Settings::from_env().validate();
            println!("{}", report.render());
            if report.has_errors() {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

async fn serve() -> Result<()> {
    let settings = Arc::new(Settings::from_env());

    let report = settings.validate();
    for warning in report.warnings() {
        warn!("{warning}");
    }
    if report.has_errors() {
        anyhow::bail!("invalid configuration:\n{}", report.render());
    }

    let state = AppState::new(Arc::clone(&settings))?;

    let janitor_shutdown = background::spawn(
        Duration::from_secs(settings.cleanup_interval_seconds),
        Arc::clone(&state.embeddings),
        Arc::clone(&state.sessions),
        Arc::clone(&state.history),
    );

    let router = create_router(state);
    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!(addr = %addr, index = %settings.index_name, "Vitrina listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let _ = janitor_shutdown.send(true);
    info!("Vitrina stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}

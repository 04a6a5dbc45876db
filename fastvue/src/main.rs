use std::{process::ExitCode, time::Duration};

use clap::Parser;
use fastvue::{
    Application, Config,
    config::{Args, Command},
    db::{engine::Engine, health::DatabaseProber},
    lifecycle::{setup::setup_database, wait_for_database},
    telemetry,
};

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

/// Probe until healthy; the exit status tells the container runtime whether to proceed
async fn wait_for_db(config: &Config, max_retries: u32, retry_interval: u64) -> anyhow::Result<ExitCode> {
    let engine = Engine::initialize(&config.database)?;
    let prober = DatabaseProber::new(engine.clone());

    let ready = wait_for_database(&prober, max_retries, Duration::from_secs(retry_interval)).await;
    engine.dispose().await;

    Ok(if ready { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Pick up a local .env before reading configuration; it is fine if there is none
    let _ = dotenvy::dotenv();

    // Parse CLI args
    let args = Args::parse();

    // Load configuration
    let config = Config::load(&args)?;

    // If --validate flag is set, exit successfully after config validation
    if args.validate {
        println!("Configuration is valid.");
        return Ok(ExitCode::SUCCESS);
    }

    // Initialize telemetry (tracing + optional OpenTelemetry)
    telemetry::init_telemetry(config.log_format, config.enable_otel_export)?;

    tracing::debug!("{:?}", args);

    let result = match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            // Run the application with graceful shutdown on SIGTERM/Ctrl+C
            let shutdown = shutdown_signal();
            Application::new(config).await?.serve(shutdown).await.map(|()| ExitCode::SUCCESS)
        }
        Command::WaitForDb {
            max_retries,
            retry_interval,
        } => wait_for_db(&config, max_retries, retry_interval).await,
        Command::SetupDb => {
            let report = setup_database(&config).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::SUCCESS)
        }
    };

    telemetry::shutdown_telemetry();
    result
}

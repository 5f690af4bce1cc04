mod cli;
mod shutdown;
mod wiring;

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use clap::Parser;
use tokio::sync::mpsc;

use cli::Cli;
use shutdown::{ShutdownController, ShutdownEvent, spawn_ctrl_c_handler};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match broker_config::BrokerConfig::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = match broker_config::init_logging(&config.logger) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("failed to initialize logging: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut reactor = match wiring::build_reactor(&config).await {
        Ok(reactor) => reactor,
        Err(err) => {
            tracing::error!(error = %err, "failed to construct reactor");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Arc::new(ShutdownController::new());
    let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel();
    spawn_ctrl_c_handler(shutdown.clone(), shutdown_tx);

    let terminate = reactor.termination_flag();
    tokio::spawn(async move {
        while let Some(event) = shutdown_rx.recv().await {
            match event {
                ShutdownEvent::Graceful => {
                    tracing::info!("shutdown requested; finishing current poll cycle");
                    terminate.store(true, Ordering::SeqCst);
                }
                ShutdownEvent::Immediate => {
                    tracing::warn!("second shutdown signal received; exiting immediately");
                    std::process::exit(130);
                }
            }
        }
    });

    tracing::info!(
        clients = config.clients.port,
        workers = config.workers.port,
        "broker ready"
    );
    reactor.run().await;
    tracing::info!("reactor stopped; exiting");

    ExitCode::SUCCESS
}

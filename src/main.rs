//! Command-line self-test for backup upload methods.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use drivebackup::config::{Cli, ConfigStore, Settings};
use drivebackup::logger::TracingLogger;
use drivebackup::test_run::{RunOutcome, TestRunner};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = match &cli.config {
        Some(path) => {
            tracing::info!("Settings file: {}", path.display());
            ConfigStore::from_file(path)?
        }
        None => ConfigStore::from_settings(Settings::default()),
    };
    if cli.debug {
        store.pin_debug(true);
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping after the current upload");
            let _ = cancel_tx.send(true);
        }
    });

    let runner = TestRunner::new(store, Arc::new(TracingLogger)).with_cancellation(cancel_rx);
    let args = cli.args.clone();
    let outcome = tokio::spawn(async move { runner.run(&args).await }).await?;

    Ok(match outcome {
        RunOutcome::Passed => ExitCode::SUCCESS,
        RunOutcome::Interrupted => ExitCode::from(130),
        RunOutcome::Failed { .. } | RunOutcome::Aborted => ExitCode::FAILURE,
    })
}

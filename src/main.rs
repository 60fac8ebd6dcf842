//! quiesce - pre-action page stability gate

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use quiesce_cli::cli::{run, Cli, LogFormat};
use tracing::{debug, error};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(&cli.log_level, cli.debug, cli.log_format) {
        eprintln!("error: {err:#}");
        return ExitCode::FAILURE;
    }

    debug!("Starting quiesce v{}", env!("CARGO_PKG_VERSION"));

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("Command failed: {:#}", err);
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: &str, debug: bool, format: LogFormat) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));

    // stdout carries command output, logs go to stderr
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }

    Ok(())
}

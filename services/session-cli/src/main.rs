//! OAuth session CLI
//!
//! Drives a persisted bearer session from the command line:
//! 1. Loads the TOML config and opens the credential file
//! 2. Runs one command (login, restore, userinfo, token-info, refresh, logout);
//!    login reads its token response as JSON from stdin
//! 3. Prints the command's JSON report on stdout
//! 4. With `--metrics`, prints the Prometheus snapshot after the report
//!
//! Logs go to stderr as JSON so stdout stays machine-readable.

mod app;
mod cli;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::App;
use crate::cli::Cli;
use crate::config::Config;

fn install_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    // Installed before any session code runs so no counter is missed
    let prometheus = if cli.metrics {
        Some(install_metrics()?)
    } else {
        None
    };

    let config_path = cli.config;
    info!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    info!(
        token_endpoint = %config.oauth.token_endpoint,
        store = %config.store.path.display(),
        revocation = config.oauth.revocation_endpoint.is_some(),
        "configuration loaded"
    );

    let app = App::build(&config).await?;
    let outcome = app.run(cli.command, std::io::stdin()).await;
    if let Ok(report) = &outcome {
        println!("{}", serde_json::to_string_pretty(report)?);
    }

    // Failed commands still report the counters they moved
    if let Some(handle) = prometheus {
        print!("{}", handle.render());
    }

    outcome.map(|_| ())
}

//! stow CLI entrypoint.

use clap::Parser;
use stow_cache::Plugin;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::Cli;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

/// Parse arguments, re-parsing after an env file so its variables feed the
/// env fallbacks.
fn parse_args() -> Cli {
    let cli = Cli::parse();
    match &cli.env_file {
        Some(path) => {
            if let Err(e) = dotenvy::from_path(path) {
                warn!(path = %path.display(), error = %e, "Failed to load env file");
            }
            Cli::parse()
        }
        None => cli,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli = parse_args();
    let config = cli.plugin_config().inspect_err(|e| {
        error!(error = %e, "Invalid plugin configuration");
    })?;

    info!(
        repo = %config.repo,
        branch = %config.branch,
        backend = config.backend.kind(),
        mounts = config.mounts.len(),
        "Starting cache plugin"
    );

    let report = Plugin::new(config).exec().await.inspect_err(|e| {
        error!(error = %e, "Cache plugin failed");
    })?;

    info!(
        rebuilt = report.rebuild.as_ref().map_or(0, |p| p.mounts.len()),
        restored = report.restore.as_ref().map_or(0, |p| p.mounts.len()),
        "Cache plugin finished"
    );
    Ok(())
}

//! Deployment sync CLI
//!
//! Shows the deployment list, refreshing it whenever the server pushes an
//! update. Each line typed on stdin renames the target deployment.

use std::path::PathBuf;

use clap::Parser;
use deployment_sync::{load_config, Config, DeploymentSyncBuilder};
use tracing::Level;

#[derive(Parser)]
#[command(name = "deployment-sync")]
#[command(about = "Deployment list kept in sync through pull fetches and push notifications")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Deployments API base URL (overrides config file)
    #[arg(long)]
    api_url: Option<String>,

    /// Push channel base URL (overrides config file)
    #[arg(long)]
    push_url: Option<String>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(
        "Parsed command line arguments: config={:?}, api_url={:?}, push_url={:?}, log_level={:?}",
        args.config,
        args.api_url,
        args.push_url,
        args.log_level
    );

    let mut config = if let Some(config_path) = &args.config {
        tracing::debug!("Loading configuration from {:?}", config_path);
        load_config(config_path)?
    } else {
        tracing::debug!("Using default configuration");
        Config::default()
    };

    if let Some(api_url) = args.api_url {
        config.api.base_url = api_url;
    }
    if let Some(push_url) = args.push_url {
        config.push.base_url = push_url;
    }

    tracing::info!(
        "Starting deployment sync (api {}, push {} topic '{}')",
        config.api.base_url,
        config.push.base_url,
        config.push.topic
    );

    DeploymentSyncBuilder::new(config).build()?.start().await?;

    Ok(())
}

//! Muster: fleet task-dispatch engine.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use muster_engine::config::ConfigHandle;
use muster_engine::engine::Engine;

/// Fleet task-dispatch engine: runs as a dispatching server or an
/// executing target depending on configuration.
#[derive(Parser)]
#[command(name = "muster", version)]
struct Args {
    /// Path to the JSON configuration file.
    config: Option<PathBuf>,

    /// Override the configured role (server or target).
    #[arg(long)]
    role: Option<String>,

    /// Override the configured port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    // Config file: explicit argument, else config.json beside the
    // working directory.
    let path = args.config.or_else(|| Some(PathBuf::from("config.json")));
    let config = Arc::new(ConfigHandle::load(path)?);

    // Command-line overrides swap the snapshot without persisting.
    if args.role.is_some() || args.port.is_some() {
        config.override_with(|doc| {
            if let Some(obj) = doc.as_object_mut() {
                if let Some(role) = &args.role {
                    obj.insert("role".to_string(), serde_json::json!(role));
                }
                if let Some(port) = args.port {
                    obj.insert("port".to_string(), serde_json::json!(port));
                }
            }
        })?;
    }

    let engine = Engine::from_config(config, Vec::new());
    let running = engine.start().await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            running.stop().await;
        }
        _ = running.wait() => {}
    }

    Ok(())
}

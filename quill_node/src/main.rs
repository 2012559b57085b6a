//! Runs a Quill node until interrupted.

use anyhow::{anyhow, Context};
use quill_core::{config, QuillCore};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,quill_core=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_level(true))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = config::get_or_init()
        .await
        .context("failed to load quill config")?;

    let core = QuillCore::start(config)
        .await
        .map_err(|e| anyhow!("failed to start quill node: {e}"))?;

    tracing::info!(node_id = %core.node_id(), "listening, press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    core.shutdown()
        .await
        .map_err(|e| anyhow!("failed to shut down cleanly: {e}"))?;

    Ok(())
}

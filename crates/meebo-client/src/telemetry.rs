//! Log setup for the client process.

use anyhow::anyhow;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init(log_level: &str, client: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))?;

    tracing::info!(client, "logging at {}", log_level);
    Ok(())
}

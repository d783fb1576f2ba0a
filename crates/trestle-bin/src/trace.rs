use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Installs the tracing subscriber. `RUST_LOG` wins over the configured
/// level when set.
pub fn init(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!("install tracing subscriber: {err}"))?;
    Ok(())
}

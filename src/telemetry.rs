//! Tracing initialization: an `EnvFilter` read from `RUST_LOG`, console output
//! via the `fmt` layer. Grounded in `dwctl::telemetry::init_telemetry`,
//! narrowed to the console-only half — this coordinator has no OTLP
//! collector to export to.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub fn init_telemetry() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry().with(env_filter).with(tracing_subscriber::fmt::layer()).try_init()?;

    Ok(())
}

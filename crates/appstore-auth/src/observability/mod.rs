//! Logging, metrics and tracing
//!
//! The `record_*` functions are always available and compile to nothing
//! without the `metrics` feature.

#[cfg(feature = "metrics")]
mod metrics;

#[cfg(feature = "telemetry")]
mod telemetry;

#[cfg(feature = "metrics")]
pub use metrics::{init_metrics, render_metrics};
#[cfg(feature = "telemetry")]
pub use telemetry::init_telemetry;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::registry::Registry;

use crate::Result;
use crate::config::TelemetryConfig;

const DEFAULT_LOG_LEVEL: &str = "info";

/// Initialize observability stack
pub fn init_observability(config: &TelemetryConfig) -> Result<()> {
    #[cfg(feature = "metrics")]
    {
        init_metrics()?;
    }

    #[cfg(feature = "telemetry")]
    {
        init_telemetry(config)?;
    }

    #[cfg(not(feature = "telemetry"))]
    {
        init_basic_logging(config);
    }

    Ok(())
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// `RUST_LOG` wins over the configured level
fn env_filter(config: &TelemetryConfig) -> EnvFilter {
    let level = if config.log_level.is_empty() {
        DEFAULT_LOG_LEVEL
    } else {
        config.log_level.as_str()
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

fn fmt_layers(config: &TelemetryConfig) -> (EnvFilter, BoxedLayer) {
    let fmt_layer = if config.json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };
    (env_filter(config), fmt_layer)
}

/// Initialize basic logging without OpenTelemetry
#[cfg(not(feature = "telemetry"))]
fn init_basic_logging(config: &TelemetryConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let (filter, fmt_layer) = fmt_layers(config);
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .init();
}

/// Shutdown observability stack
#[allow(clippy::missing_const_for_fn)]
pub fn shutdown_observability() {
    #[cfg(feature = "telemetry")]
    {
        telemetry::shutdown_telemetry();
    }
}

/// Count a finished login by method (`sso`, `password`, `register`) and outcome.
#[allow(clippy::missing_const_for_fn)]
pub fn record_login(method: &str, outcome: &str) {
    #[cfg(feature = "metrics")]
    metrics::login(method, outcome);
    #[cfg(not(feature = "metrics"))]
    let _ = (method, outcome);
}

#[allow(clippy::missing_const_for_fn)]
pub fn record_rate_limited() {
    #[cfg(feature = "metrics")]
    metrics::rate_limited();
}

#[allow(clippy::missing_const_for_fn)]
pub fn record_session_eviction() {
    #[cfg(feature = "metrics")]
    metrics::session_eviction();
}

#[allow(clippy::missing_const_for_fn)]
pub fn record_jwks_refresh(provider: &str, ok: bool) {
    #[cfg(feature = "metrics")]
    metrics::jwks_refresh(provider, ok);
    #[cfg(not(feature = "metrics"))]
    let _ = (provider, ok);
}

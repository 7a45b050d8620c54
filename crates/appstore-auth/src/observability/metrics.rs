//! Prometheus metrics for appstore-auth

use std::sync::OnceLock;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::Result;
use crate::error::Error;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static START_TIME: OnceLock<Instant> = OnceLock::new();

// Server metrics
const METRIC_UPTIME: &str = "appstore_auth_uptime_seconds";
const METRIC_INFO: &str = "appstore_auth_info";

// Login metrics
const METRIC_LOGINS: &str = "appstore_auth_logins_total";
const METRIC_RATE_LIMITED: &str = "appstore_auth_rate_limited_total";
const METRIC_SESSION_EVICTIONS: &str = "appstore_auth_session_evictions_total";

// Key material metrics
const METRIC_JWKS_REFRESHES: &str = "appstore_auth_jwks_refreshes_total";

/// Initialize Prometheus metrics recorder.
pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::Config(format!("Failed to install metrics recorder: {e}")))?;

    PROMETHEUS_HANDLE.set(handle).ok();
    START_TIME.set(Instant::now()).ok();

    register_metrics();
    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

fn register_metrics() {
    describe_gauge!(METRIC_UPTIME, "Server uptime in seconds");
    describe_gauge!(METRIC_INFO, "Server information (always 1)");

    describe_counter!(METRIC_LOGINS, "Login attempts by method and outcome");
    describe_counter!(
        METRIC_RATE_LIMITED,
        "Logins that required a CAPTCHA because of the attempt rate"
    );
    describe_counter!(
        METRIC_SESSION_EVICTIONS,
        "Sessions evicted to stay within the per-account cap"
    );
    describe_counter!(METRIC_JWKS_REFRESHES, "Key set fetches by provider and status");

    gauge!(
        METRIC_INFO,
        "version" => env!("CARGO_PKG_VERSION"),
    )
    .set(1.0);
}

/// Render metrics in Prometheus text format.
#[must_use]
pub fn render_metrics() -> String {
    if let Some(start) = START_TIME.get() {
        gauge!(METRIC_UPTIME).set(start.elapsed().as_secs_f64());
    }

    PROMETHEUS_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

pub fn login(method: &str, outcome: &str) {
    counter!(
        METRIC_LOGINS,
        "method" => method.to_owned(),
        "outcome" => outcome.to_owned(),
    )
    .increment(1);
}

pub fn rate_limited() {
    counter!(METRIC_RATE_LIMITED).increment(1);
}

pub fn session_eviction() {
    counter!(METRIC_SESSION_EVICTIONS).increment(1);
}

pub fn jwks_refresh(provider: &str, ok: bool) {
    counter!(
        METRIC_JWKS_REFRESHES,
        "provider" => provider.to_owned(),
        "status" => if ok { "success" } else { "error" },
    )
    .increment(1);
}

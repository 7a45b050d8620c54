//! Environment variable loading for configuration

use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use super::builder::{AccountMode, ConfigBuilder};
use crate::Result;

/// Environment variable names
mod vars {
    pub const DATABASE: &str = "APPSTORE_AUTH_DATABASE";
    pub const MODE: &str = "APPSTORE_AUTH_MODE";
    pub const HTTP_HOST: &str = "APPSTORE_AUTH_HTTP_HOST";
    pub const HTTP_PORT: &str = "APPSTORE_AUTH_HTTP_PORT";
    pub const CORS_ORIGIN: &str = "APPSTORE_AUTH_CORS_ORIGIN";
    pub const UPSTREAM_TIMEOUT_SECS: &str = "APPSTORE_AUTH_UPSTREAM_TIMEOUT_SECS";
    pub const STORAGE_TIMEOUT_SECS: &str = "APPSTORE_AUTH_STORAGE_TIMEOUT_SECS";
    pub const CAPTCHA_SECRET: &str = "APPSTORE_AUTH_CAPTCHA_SECRET";
    pub const CAPTCHA_VERIFY_URL: &str = "APPSTORE_AUTH_CAPTCHA_VERIFY_URL";
    pub const OTEL_EXPORTER_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
    pub const OTEL_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";
    pub const OTEL_RESOURCE_ATTRIBUTES: &str = "OTEL_RESOURCE_ATTRIBUTES";
    pub const RUST_LOG: &str = "RUST_LOG";
    pub const JSON_LOGS: &str = "APPSTORE_AUTH_JSON_LOGS";
}

/// Load configuration from environment variables
pub fn load_from_env(mut builder: ConfigBuilder) -> Result<ConfigBuilder> {
    if let Ok(path) = env::var(vars::DATABASE) {
        builder = builder.database((!path.is_empty()).then(|| PathBuf::from(path)));
    }

    if let Ok(mode) = env::var(vars::MODE) {
        builder = builder.mode(mode.parse::<AccountMode>()?);
    }

    if let Ok(host_str) = env::var(vars::HTTP_HOST)
        && let Ok(host) = host_str.parse::<IpAddr>()
    {
        builder = builder.http_host(host);
    }

    if let Ok(port_str) = env::var(vars::HTTP_PORT)
        && let Ok(port) = port_str.parse::<u16>()
    {
        builder = builder.http_port(port);
    }

    if let Ok(origin) = env::var(vars::CORS_ORIGIN) {
        builder = builder.cors_origin(Some(origin));
    }

    if let Ok(timeout_str) = env::var(vars::UPSTREAM_TIMEOUT_SECS)
        && let Ok(secs) = timeout_str.parse::<u64>()
    {
        builder = builder.upstream_timeout(Duration::from_secs(secs));
    }

    if let Ok(timeout_str) = env::var(vars::STORAGE_TIMEOUT_SECS)
        && let Ok(secs) = timeout_str.parse::<u64>()
    {
        builder = builder.storage_timeout(Duration::from_secs(secs));
    }

    // CAPTCHA
    if let Ok(secret) = env::var(vars::CAPTCHA_SECRET) {
        builder = builder.captcha_secret(Some(SecretString::from(secret)));
    }

    if let Ok(url_str) = env::var(vars::CAPTCHA_VERIFY_URL) {
        let url = Url::parse(&url_str).map_err(|e| {
            crate::Error::Config(format!("Invalid {}: {}", vars::CAPTCHA_VERIFY_URL, e))
        })?;
        builder = builder.captcha_verify_url(url);
    }

    // Telemetry
    if let Ok(endpoint) = env::var(vars::OTEL_EXPORTER_OTLP_ENDPOINT) {
        builder = builder.otlp_endpoint(Some(endpoint));
    }

    if let Ok(name) = env::var(vars::OTEL_SERVICE_NAME) {
        builder = builder.service_name(name);
    }

    if let Ok(raw) = env::var(vars::OTEL_RESOURCE_ATTRIBUTES) {
        for (key, value) in parse_resource_attributes(&raw) {
            builder = builder.resource_attribute(key, value);
        }
    }

    if let Ok(level) = env::var(vars::RUST_LOG) {
        builder = builder.log_level(level);
    }

    if let Ok(val) = env::var(vars::JSON_LOGS) {
        builder = builder.json_logs(parse_bool(&val));
    }

    Ok(builder)
}

fn parse_bool(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

/// `key1=value1,key2=value2`; malformed pairs and empty keys are skipped.
fn parse_resource_attributes(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}

//! TOML configuration file loading

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

use super::builder::{AccountMode, ConfigBuilder, ProviderConfig};
use crate::Result;

/// Configuration file locations checked in order
const CONFIG_PATHS: &[&str] = &[
    "./appstore-auth.toml",
    "~/.config/appstore-auth/config.toml",
    "/etc/appstore-auth/config.toml",
];

/// Find the first existing configuration file
pub fn find_config_file() -> Option<PathBuf> {
    for path_str in CONFIG_PATHS {
        let path = if path_str.starts_with('~') {
            if let Ok(home) = std::env::var("HOME") {
                PathBuf::from(path_str.replacen('~', &home, 1))
            } else {
                continue;
            }
        } else {
            PathBuf::from(path_str)
        };

        if path.exists() {
            return Some(path);
        }
    }
    None
}

/// Load configuration from a TOML file
pub fn load_from_file(path: &Path, builder: ConfigBuilder) -> Result<ConfigBuilder> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        crate::Error::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    let file_config: FileConfig = toml::from_str(&content).map_err(|e| {
        crate::Error::Config(format!(
            "Failed to parse config file {}: {}",
            path.display(),
            e
        ))
    })?;

    apply_file_config(builder, file_config)
}

fn parse_url(field: &str, value: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| crate::Error::Config(format!("Invalid {field}: {e}")))
}

fn apply_file_config(mut builder: ConfigBuilder, config: FileConfig) -> Result<ConfigBuilder> {
    if let Some(accounts) = config.accounts {
        if let Some(mode) = accounts.mode {
            builder = builder.mode(mode.parse::<AccountMode>()?);
        }

        if let Some(path) = accounts.database {
            builder = builder.database(Some(path));
        }

        if let Some(secs) = accounts.storage_timeout_secs {
            builder = builder.storage_timeout(Duration::from_secs(secs));
        }
    }

    if let Some(limits) = config.rate_limit {
        if let Some(secs) = limits.window_secs {
            builder = builder.rate_limit_window(Duration::from_secs(secs));
        }

        if let Some(threshold) = limits.threshold {
            builder = builder.rate_limit_threshold(threshold);
        }
    }

    if let Some(captcha) = config.captcha {
        if let Some(secret) = captcha.secret {
            builder = builder.captcha_secret(Some(SecretString::from(secret)));
        }

        if let Some(url) = captcha.verify_url {
            builder = builder.captcha_verify_url(parse_url("CAPTCHA verify URL", &url)?);
        }
    }

    if let Some(secs) = config.upstream_timeout_secs {
        builder = builder.upstream_timeout(Duration::from_secs(secs));
    }

    if let Some(secs) = config.token_leeway_secs {
        builder = builder.token_leeway(Duration::from_secs(secs));
    }

    for provider in config.providers {
        let issuer = parse_url(&format!("issuer of provider '{}'", provider.name), &provider.issuer)?;
        let token_endpoint = provider
            .token_endpoint
            .as_deref()
            .map(|u| parse_url("token_endpoint", u))
            .transpose()?;
        let jwks_uri = provider
            .jwks_uri
            .as_deref()
            .map(|u| parse_url("jwks_uri", u))
            .transpose()?;

        builder = builder.provider(ProviderConfig {
            name: provider.name,
            client_id: provider.client_id,
            client_secret: SecretString::from(provider.client_secret),
            redirect_uri: provider.redirect_uri,
            issuer,
            token_endpoint,
            jwks_uri,
        });
    }

    // Transport settings
    if let Some(transport) = config.transport {
        if let Some(host_str) = transport.http_host
            && let Ok(host) = host_str.parse::<IpAddr>()
        {
            builder = builder.http_host(host);
        }

        if let Some(port) = transport.http_port {
            builder = builder.http_port(port);
        }

        if let Some(secs) = transport.request_timeout_secs {
            builder = builder.request_timeout(Duration::from_secs(secs));
        }

        if let Some(origin) = transport.cors_origin {
            builder = builder.cors_origin(Some(origin));
        }
    }

    // Observability settings
    if let Some(obs) = config.observability {
        if let Some(endpoint) = obs.otlp_endpoint {
            builder = builder.otlp_endpoint(Some(endpoint));
        }

        if let Some(name) = obs.service_name {
            builder = builder.service_name(name);
        }

        if let Some(level) = obs.log_level {
            builder = builder.log_level(level);
        }

        if let Some(json) = obs.json_logs {
            builder = builder.json_logs(json);
        }

        for (key, value) in obs.resource_attributes.unwrap_or_default() {
            builder = builder.resource_attribute(key, value);
        }
    }

    Ok(builder)
}

/// Root configuration file structure
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    upstream_timeout_secs: Option<u64>,
    token_leeway_secs: Option<u64>,
    accounts: Option<AccountsConfig>,
    rate_limit: Option<RateLimitFileConfig>,
    captcha: Option<CaptchaFileConfig>,
    #[serde(default)]
    providers: Vec<ProviderFileConfig>,
    transport: Option<TransportFileConfig>,
    observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Deserialize)]
struct AccountsConfig {
    mode: Option<String>,
    database: Option<PathBuf>,
    storage_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RateLimitFileConfig {
    window_secs: Option<u64>,
    threshold: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CaptchaFileConfig {
    secret: Option<String>,
    verify_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderFileConfig {
    name: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    issuer: String,
    token_endpoint: Option<String>,
    jwks_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransportFileConfig {
    http_host: Option<String>,
    http_port: Option<u16>,
    request_timeout_secs: Option<u64>,
    cors_origin: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObservabilityConfig {
    otlp_endpoint: Option<String>,
    service_name: Option<String>,
    log_level: Option<String>,
    json_logs: Option<bool>,
    resource_attributes: Option<BTreeMap<String, String>>,
}

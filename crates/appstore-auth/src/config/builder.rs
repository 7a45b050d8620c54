//! Configuration builder

use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::Error;
use crate::captcha::DEFAULT_VERIFY_URL;
use crate::guard::{BruteForceGuard, DEFAULT_THRESHOLD, DEFAULT_WINDOW};
use crate::service::ServiceSettings;

/// Service configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// `None` keeps everything in memory
    pub database: Option<PathBuf>,
    pub mode: AccountMode,
    pub providers: Vec<ProviderConfig>,
    pub rate_limit: RateLimitConfig,
    pub upstream_timeout: Duration,
    pub storage_timeout: Duration,
    pub token_leeway: Duration,
    pub captcha: CaptchaConfig,
    pub transport: TransportConfig,
    pub telemetry: TelemetryConfig,
}

impl Config {
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    #[must_use]
    pub const fn mode(&self) -> AccountMode {
        self.mode
    }

    #[must_use]
    pub fn providers(&self) -> &[ProviderConfig] {
        &self.providers
    }

    #[must_use]
    pub const fn guard(&self) -> BruteForceGuard {
        BruteForceGuard::new(self.rate_limit.window, self.rate_limit.threshold)
    }

    /// Settings handed to [`crate::AuthService`]
    #[must_use]
    pub const fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            mode: self.mode,
            guard: self.guard(),
            upstream_timeout: self.upstream_timeout,
        }
    }
}

/// Which login method a deployment offers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccountMode {
    /// Third-party identity providers only
    #[default]
    Sso,
    /// Username and password accounts
    Local,
}

impl AccountMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sso => "sso",
            Self::Local => "local",
        }
    }
}

impl FromStr for AccountMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sso" | "oidc" => Ok(Self::Sso),
            "local" | "password" => Ok(Self::Local),
            other => Err(Error::Config(format!(
                "Unknown account mode '{other}', expected 'sso' or 'local'"
            ))),
        }
    }
}

impl std::fmt::Display for AccountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One identity provider
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,
    /// Base URL of the provider; its discovery document lives below it
    pub issuer: Url,
    /// Skips discovery for the token endpoint when set
    pub token_endpoint: Option<Url>,
    /// Skips discovery for the key set when set
    pub jwks_uri: Option<Url>,
}

/// Brute-force guard tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub threshold: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptchaConfig {
    /// Without a secret every CAPTCHA response is rejected
    pub secret: Option<SecretString>,
    pub verify_url: Url,
}

/// HTTP listener configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub http_host: IpAddr,
    pub http_port: u16,
    pub request_timeout: Duration,
    /// Allowed browser origin; `None` disables CORS headers
    pub cors_origin: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            http_host: IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            http_port: 8080,
            request_timeout: Duration::from_secs(30),
            cors_origin: None,
        }
    }
}

/// Resource attribute carrying the account mode, set unless configured
pub const ACCOUNT_MODE_ATTRIBUTE: &str = "appstore.account_mode";

/// Telemetry configuration
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    pub otlp_endpoint: Option<String>,
    pub service_name: String,
    pub log_level: String,
    pub json_logs: bool,
    /// Extra OpenTelemetry resource attributes, in insertion order
    pub resource_attributes: Vec<(String, String)>,
}

/// Configuration builder with fluent API
#[derive(Debug)]
pub struct ConfigBuilder {
    database: Option<PathBuf>,
    mode: AccountMode,
    providers: Vec<ProviderConfig>,
    rate_limit: RateLimitConfig,
    upstream_timeout: Duration,
    storage_timeout: Duration,
    token_leeway: Duration,
    captcha_secret: Option<SecretString>,
    captcha_verify_url: Option<Url>,
    transport: TransportConfig,
    telemetry: TelemetryConfig,
}

impl ConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            database: None,
            mode: AccountMode::Sso,
            providers: Vec::new(),
            rate_limit: RateLimitConfig::default(),
            upstream_timeout: Duration::from_secs(10),
            storage_timeout: Duration::from_secs(5),
            token_leeway: Duration::from_secs(60),
            captcha_secret: None,
            captcha_verify_url: None,
            transport: TransportConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }

    #[must_use]
    pub fn database(mut self, path: Option<PathBuf>) -> Self {
        self.database = path;
        self
    }

    #[must_use]
    pub const fn mode(mut self, mode: AccountMode) -> Self {
        self.mode = mode;
        self
    }

    /// Add a provider. A later provider with the same name replaces the
    /// earlier one.
    #[must_use]
    pub fn provider(mut self, provider: ProviderConfig) -> Self {
        self.providers.retain(|p| p.name != provider.name);
        self.providers.push(provider);
        self
    }

    #[must_use]
    pub const fn rate_limit_window(mut self, window: Duration) -> Self {
        self.rate_limit.window = window;
        self
    }

    #[must_use]
    pub const fn rate_limit_threshold(mut self, threshold: u32) -> Self {
        self.rate_limit.threshold = threshold;
        self
    }

    #[must_use]
    pub const fn upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn token_leeway(mut self, leeway: Duration) -> Self {
        self.token_leeway = leeway;
        self
    }

    #[must_use]
    pub fn captcha_secret(mut self, secret: Option<SecretString>) -> Self {
        self.captcha_secret = secret;
        self
    }

    #[must_use]
    pub fn captcha_verify_url(mut self, url: Url) -> Self {
        self.captcha_verify_url = Some(url);
        self
    }

    #[must_use]
    pub const fn http_host(mut self, host: IpAddr) -> Self {
        self.transport.http_host = host;
        self
    }

    #[must_use]
    pub const fn http_port(mut self, port: u16) -> Self {
        self.transport.http_port = port;
        self
    }

    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.transport.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn cors_origin(mut self, origin: Option<String>) -> Self {
        self.transport.cors_origin = origin;
        self
    }

    #[must_use]
    pub fn otlp_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.telemetry.otlp_endpoint = endpoint;
        self
    }

    #[must_use]
    pub fn service_name(mut self, name: String) -> Self {
        self.telemetry.service_name = name;
        self
    }

    /// Add a resource attribute, replacing an earlier value for the same key.
    #[must_use]
    pub fn resource_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.telemetry.resource_attributes.retain(|(k, _)| *k != key);
        self.telemetry.resource_attributes.push((key, value.into()));
        self
    }

    #[must_use]
    pub fn log_level(mut self, level: String) -> Self {
        self.telemetry.log_level = level;
        self
    }

    #[must_use]
    pub const fn json_logs(mut self, enabled: bool) -> Self {
        self.telemetry.json_logs = enabled;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    ///
    /// Returns error if a value is out of range or SSO mode has no providers
    pub fn build(self) -> crate::Result<Config> {
        if self.rate_limit.threshold == 0 {
            return Err(Error::Config(
                "Rate-limit threshold must be at least 1".into(),
            ));
        }
        if self.rate_limit.window.is_zero() {
            return Err(Error::Config("Rate-limit window must be positive".into()));
        }
        for (name, value) in [
            ("Upstream timeout", self.upstream_timeout),
            ("Storage timeout", self.storage_timeout),
            ("Request timeout", self.transport.request_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::Config(format!("{name} must be positive")));
            }
        }

        if self
            .providers
            .iter()
            .any(|p| p.name.is_empty() || p.client_id.is_empty())
        {
            return Err(Error::Config(
                "Every provider needs a name and a client_id".into(),
            ));
        }
        if self.mode == AccountMode::Sso && self.providers.is_empty() {
            return Err(Error::Config(
                "SSO mode requires at least one [[providers]] entry".into(),
            ));
        }

        let verify_url = match self.captcha_verify_url {
            Some(url) => url,
            None => Url::parse(DEFAULT_VERIFY_URL)
                .map_err(|e| Error::Config(format!("Invalid CAPTCHA verify URL: {e}")))?,
        };

        let mut telemetry = self.telemetry;
        if !telemetry.resource_attributes.iter().any(|(k, _)| k == ACCOUNT_MODE_ATTRIBUTE) {
            telemetry
                .resource_attributes
                .push((ACCOUNT_MODE_ATTRIBUTE.to_string(), self.mode.as_str().to_string()));
        }

        Ok(Config {
            database: self.database,
            mode: self.mode,
            providers: self.providers,
            rate_limit: self.rate_limit,
            upstream_timeout: self.upstream_timeout,
            storage_timeout: self.storage_timeout,
            token_leeway: self.token_leeway,
            captcha: CaptchaConfig {
                secret: self.captcha_secret,
                verify_url,
            },
            transport: self.transport,
            telemetry,
        })
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

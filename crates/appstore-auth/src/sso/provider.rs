//! Identity provider registry
//!
//! Each configured provider gets its own key cache, verifier and code
//! exchange. Endpoints come from the provider's OpenID discovery document
//! unless the configuration names them explicitly.

use std::sync::Arc;
use std::time::Duration;

use openidconnect::IssuerUrl;
use openidconnect::core::CoreProviderMetadata;
use serde::Serialize;
use url::Url;

use super::exchange::{CodeExchange, HttpCodeExchange};
use super::jwks::{HttpJwksSource, KeyCache};
use super::verifier::TokenVerifier;
use crate::config::ProviderConfig;

/// A provider that could not be brought up
#[derive(Debug, thiserror::Error)]
#[error("provider {provider}: {reason}")]
pub struct DiscoveryError {
    pub provider: String,
    pub reason: String,
}

impl DiscoveryError {
    fn new(provider: &str, reason: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }
}

/// Endpoints a provider must expose for the code flow
#[derive(Debug, Clone)]
struct Endpoints {
    token: Url,
    jwks: Url,
}

/// Public description of a provider, safe to hand to a frontend
#[derive(Debug, Clone, Serialize)]
pub struct ProviderListing {
    pub name: String,
    pub client_id: String,
    pub discover_uri: String,
}

/// A ready-to-use identity provider
pub struct Provider {
    name: String,
    client_id: String,
    issuer: Url,
    verifier: TokenVerifier,
    exchange: Arc<dyn CodeExchange>,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("client_id", &self.client_id)
            .field("issuer", &self.issuer.as_str())
            .finish_non_exhaustive()
    }
}

impl Provider {
    /// Assemble a provider from already-built parts.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        client_id: impl Into<String>,
        issuer: Url,
        verifier: TokenVerifier,
        exchange: Arc<dyn CodeExchange>,
    ) -> Self {
        Self {
            name: name.into(),
            client_id: client_id.into(),
            issuer,
            verifier,
            exchange,
        }
    }

    /// Resolve endpoints (discovering them if needed) and build the provider.
    pub async fn connect(
        config: &ProviderConfig,
        client: &reqwest::Client,
        leeway: Duration,
        timeout: Duration,
    ) -> Result<Self, DiscoveryError> {
        let endpoints = match (&config.token_endpoint, &config.jwks_uri) {
            (Some(token), Some(jwks)) => {
                tracing::info!(
                    provider = %config.name,
                    token_endpoint = %token,
                    jwks_uri = %jwks,
                    "Using configured provider endpoints"
                );
                Endpoints {
                    token: token.clone(),
                    jwks: jwks.clone(),
                }
            }
            (token, jwks) => {
                let discovered = discover(config, timeout).await?;
                Endpoints {
                    token: token.clone().unwrap_or(discovered.token),
                    jwks: jwks.clone().unwrap_or(discovered.jwks),
                }
            }
        };

        let source = Arc::new(HttpJwksSource::new(endpoints.jwks, client.clone()));
        let keys = Arc::new(KeyCache::new(config.name.clone(), source));

        // Warm the cache; a failure here is retried on the first login.
        if let Err(e) = keys.refresh().await {
            tracing::warn!(provider = %config.name, error = %e, "Initial JWKS fetch failed");
        }

        let verifier = TokenVerifier::new(keys, config.client_id.clone())
            .with_issuer(config.issuer.as_str())
            .with_leeway(leeway);

        let exchange = Arc::new(HttpCodeExchange::new(
            endpoints.token,
            config.client_id.clone(),
            config.client_secret.clone(),
            config.redirect_uri.clone(),
            client.clone(),
        ));

        Ok(Self::new(
            config.name.clone(),
            config.client_id.clone(),
            config.issuer.clone(),
            verifier,
            exchange,
        ))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub const fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    #[must_use]
    pub fn exchange(&self) -> &dyn CodeExchange {
        self.exchange.as_ref()
    }

    /// Location of the provider's discovery document
    #[must_use]
    pub fn discover_uri(&self) -> String {
        format!(
            "{}/.well-known/openid-configuration",
            self.issuer.as_str().trim_end_matches('/')
        )
    }

    #[must_use]
    pub fn listing(&self) -> ProviderListing {
        ProviderListing {
            name: self.name.clone(),
            client_id: self.client_id.clone(),
            discover_uri: self.discover_uri(),
        }
    }
}

/// Fetch the discovery document and pull out the endpoints we need.
async fn discover(config: &ProviderConfig, timeout: Duration) -> Result<Endpoints, DiscoveryError> {
    tracing::info!(provider = %config.name, issuer = %config.issuer, "Discovering OIDC provider");

    let issuer = IssuerUrl::new(config.issuer.as_str().trim_end_matches('/').to_string())
        .map_err(|e| DiscoveryError::new(&config.name, format!("invalid issuer URL: {e}")))?;

    // openidconnect re-exports its own reqwest; use it to avoid version skew
    let http_client = openidconnect::reqwest::Client::builder()
        .timeout(timeout)
        .redirect(openidconnect::reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| DiscoveryError::new(&config.name, format!("HTTP client: {e}")))?;

    let metadata = CoreProviderMetadata::discover_async(issuer, &http_client)
        .await
        .map_err(|e| DiscoveryError::new(&config.name, format!("discovery failed: {e}")))?;

    let token = metadata
        .token_endpoint()
        .ok_or_else(|| DiscoveryError::new(&config.name, "no token_endpoint advertised"))?;
    let token = Url::parse(token.as_str())
        .map_err(|e| DiscoveryError::new(&config.name, format!("invalid token endpoint: {e}")))?;
    let jwks = Url::parse(metadata.jwks_uri().as_str())
        .map_err(|e| DiscoveryError::new(&config.name, format!("invalid JWKS URI: {e}")))?;

    tracing::info!(provider = %config.name, token_endpoint = %token, jwks_uri = %jwks, "OIDC discovery complete");
    Ok(Endpoints { token, jwks })
}

/// All usable providers, in configuration order
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<Provider>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new(providers: Vec<Provider>) -> Self {
        Self {
            providers: providers.into_iter().map(Arc::new).collect(),
        }
    }

    /// Bring up every configured provider. Providers that fail are logged and
    /// left out, so one broken provider does not take the service down.
    pub async fn connect_all(
        configs: &[ProviderConfig],
        client: &reqwest::Client,
        leeway: Duration,
        timeout: Duration,
    ) -> Self {
        let mut providers = Vec::with_capacity(configs.len());
        for config in configs {
            match Provider::connect(config, client, leeway, timeout).await {
                Ok(provider) => providers.push(provider),
                Err(e) => tracing::error!(error = %e, "Identity provider unavailable"),
            }
        }
        tracing::info!(
            configured = configs.len(),
            available = providers.len(),
            "Identity providers ready"
        );
        Self::new(providers)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Provider>> {
        self.providers.iter().find(|p| p.name == name).cloned()
    }

    #[must_use]
    pub fn listings(&self) -> Vec<ProviderListing> {
        self.providers.iter().map(|p| p.listing()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

//! Authorization-code exchange at a provider's token endpoint

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

use super::error::ExchangeError;

/// Tokens returned by a successful code exchange
#[derive(Clone)]
pub struct TokenSet {
    pub access_token: String,
    pub id_token: String,
    /// Lifetime of the access token in seconds, when the provider states one
    pub expires_in: Option<u64>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field("id_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Trades a single-use authorization code for tokens
#[async_trait]
pub trait CodeExchange: Send + Sync + std::fmt::Debug {
    async fn exchange(&self, code: &str) -> Result<TokenSet, ExchangeError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Interpret a token endpoint reply. A body carrying `error` is a rejection
/// even under a 2xx status.
fn parse_token_response(status: u16, body: &[u8]) -> Result<TokenSet, ExchangeError> {
    let parsed: Result<TokenResponse, _> = serde_json::from_slice(body);

    let response = match parsed {
        Ok(response) => response,
        Err(e) if (200..300).contains(&status) => return Err(ExchangeError::Decode(e.to_string())),
        Err(_) => {
            return Err(ExchangeError::Provider {
                status,
                code: "http_error".into(),
                description: String::from_utf8_lossy(body).chars().take(200).collect(),
            });
        }
    };

    if let Some(code) = response.error {
        return Err(ExchangeError::Provider {
            status,
            code,
            description: response.error_description.unwrap_or_default(),
        });
    }
    if !(200..300).contains(&status) {
        return Err(ExchangeError::Provider {
            status,
            code: "http_error".into(),
            description: response.error_description.unwrap_or_default(),
        });
    }

    let id_token = response
        .id_token
        .filter(|t| !t.is_empty())
        .ok_or(ExchangeError::MissingField("id_token"))?;
    let access_token = response
        .access_token
        .ok_or(ExchangeError::MissingField("access_token"))?;

    Ok(TokenSet {
        access_token,
        id_token,
        expires_in: response.expires_in,
    })
}

/// Form-encoded `authorization_code` grant against a token endpoint
pub struct HttpCodeExchange {
    token_endpoint: Url,
    client_id: String,
    client_secret: SecretString,
    redirect_uri: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpCodeExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCodeExchange")
            .field("token_endpoint", &self.token_endpoint.as_str())
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .finish_non_exhaustive()
    }
}

impl HttpCodeExchange {
    #[must_use]
    pub fn new(
        token_endpoint: Url,
        client_id: impl Into<String>,
        client_secret: SecretString,
        redirect_uri: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            token_endpoint,
            client_id: client_id.into(),
            client_secret,
            redirect_uri: redirect_uri.into(),
            client,
        }
    }
}

#[async_trait]
impl CodeExchange for HttpCodeExchange {
    async fn exchange(&self, code: &str) -> Result<TokenSet, ExchangeError> {
        let form = [
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];

        let response = self
            .client
            .post(self.token_endpoint.clone())
            .form(&form)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.bytes().await?;

        let result = parse_token_response(status, &body);
        if let Err(e) = &result {
            tracing::warn!(
                endpoint = %self.token_endpoint,
                status,
                error = %e,
                "Code exchange rejected"
            );
        }
        result
    }
}

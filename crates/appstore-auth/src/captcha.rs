//! CAPTCHA verification for rate-limited logins

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Default reCAPTCHA-compatible verification endpoint
pub const DEFAULT_VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";

#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("CAPTCHA verifier unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("CAPTCHA verifier returned HTTP {0}")]
    Status(u16),
}

/// Checks a client's CAPTCHA response token
#[async_trait]
pub trait CaptchaVerifier: Send + Sync + std::fmt::Debug {
    /// `Ok(false)` means the verifier answered and rejected the response.
    async fn verify(&self, response: &str, remote_ip: &str) -> Result<bool, CaptchaError>;
}

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// Verifier speaking the reCAPTCHA `siteverify` protocol
pub struct RecaptchaVerifier {
    secret: SecretString,
    verify_url: Url,
    client: reqwest::Client,
}

impl std::fmt::Debug for RecaptchaVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecaptchaVerifier")
            .field("verify_url", &self.verify_url.as_str())
            .finish_non_exhaustive()
    }
}

impl RecaptchaVerifier {
    #[must_use]
    pub const fn new(secret: SecretString, verify_url: Url, client: reqwest::Client) -> Self {
        Self {
            secret,
            verify_url,
            client,
        }
    }
}

#[async_trait]
impl CaptchaVerifier for RecaptchaVerifier {
    async fn verify(&self, response: &str, remote_ip: &str) -> Result<bool, CaptchaError> {
        if response.is_empty() {
            return Ok(false);
        }

        let form = [
            ("secret", self.secret.expose_secret()),
            ("response", response),
            ("remoteip", remote_ip),
        ];
        let reply = self
            .client
            .post(self.verify_url.clone())
            .form(&form)
            .send()
            .await?;

        let status = reply.status();
        if !status.is_success() {
            return Err(CaptchaError::Status(status.as_u16()));
        }

        let body: SiteVerifyResponse = reply.json().await?;
        if !body.success {
            tracing::info!(remote_ip, error_codes = ?body.error_codes, "CAPTCHA rejected");
        }
        Ok(body.success)
    }
}

/// Used when no CAPTCHA secret is configured: nothing passes.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCaptcha;

#[async_trait]
impl CaptchaVerifier for DisabledCaptcha {
    async fn verify(&self, _response: &str, _remote_ip: &str) -> Result<bool, CaptchaError> {
        Ok(false)
    }
}

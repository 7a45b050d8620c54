//! JWKS fetching and the per-provider key cache
//!
//! The cache holds an immutable [`KeySet`] snapshot behind an [`ArcSwap`].
//! A refresh builds a complete new snapshot and swaps the pointer, so a
//! concurrent reader sees either the old set or the new one, never a mix.
//! Refreshes happen only on a key-id miss; there is no background task.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use url::Url;

use super::error::VerificationError;

/// JSON Web Key
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key ID
    #[serde(default)]
    pub kid: Option<String>,
    /// Key type (RSA, EC)
    pub kty: String,
    /// Algorithm
    #[serde(default)]
    pub alg: Option<String>,
    /// Key usage
    #[serde(default)]
    pub r#use: Option<String>,
    // RSA components
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,
    // EC components
    #[serde(default)]
    pub crv: Option<String>,
    #[serde(default)]
    pub x: Option<String>,
    #[serde(default)]
    pub y: Option<String>,
}

/// JSON Web Key Set
#[derive(Debug, Clone, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

/// Public-key family of a signing key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
    EcP256,
    EcP384,
}

impl KeyFamily {
    fn accepts(self, alg: Algorithm) -> bool {
        match self {
            Self::Rsa => matches!(
                alg,
                Algorithm::RS256
                    | Algorithm::RS384
                    | Algorithm::RS512
                    | Algorithm::PS256
                    | Algorithm::PS384
                    | Algorithm::PS512
            ),
            Self::EcP256 => alg == Algorithm::ES256,
            Self::EcP384 => alg == Algorithm::ES384,
        }
    }
}

/// A provider signing key decoded from its JWK
#[derive(Clone)]
pub struct SigningKey {
    pub kid: String,
    pub family: KeyFamily,
    /// Algorithm the provider pinned this key to, if any
    pub algorithm: Option<Algorithm>,
    pub usage: Option<String>,
    key: DecodingKey,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("family", &self.family)
            .field("algorithm", &self.algorithm)
            .field("usage", &self.usage)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Whether a token declaring `alg` may be checked against this key.
    #[must_use]
    pub fn accepts(&self, alg: Algorithm) -> bool {
        self.algorithm.map_or_else(|| self.family.accepts(alg), |pinned| pinned == alg)
    }

    pub(crate) const fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }

    /// Decode a JWK. `Ok(None)` means the key is well-formed but not usable for
    /// token signatures (encryption key, unsupported type, no key id).
    pub fn from_jwk(jwk: &Jwk) -> Result<Option<Self>, VerificationError> {
        let Some(kid) = jwk.kid.clone() else {
            tracing::debug!(kty = %jwk.kty, "Skipping JWK without key id");
            return Ok(None);
        };

        if jwk.r#use.as_deref().is_some_and(|u| u != "sig") {
            tracing::debug!(kid = %kid, "Skipping non-signature JWK");
            return Ok(None);
        }

        let algorithm = match jwk.alg.as_deref() {
            None => None,
            Some("RS256") => Some(Algorithm::RS256),
            Some("RS384") => Some(Algorithm::RS384),
            Some("RS512") => Some(Algorithm::RS512),
            Some("PS256") => Some(Algorithm::PS256),
            Some("PS384") => Some(Algorithm::PS384),
            Some("PS512") => Some(Algorithm::PS512),
            Some("ES256") => Some(Algorithm::ES256),
            Some("ES384") => Some(Algorithm::ES384),
            Some(other) => {
                tracing::debug!(kid = %kid, alg = other, "Skipping JWK with unsupported algorithm");
                return Ok(None);
            }
        };

        let (family, key) = match jwk.kty.as_str() {
            "RSA" => {
                let n = jwk
                    .n
                    .as_deref()
                    .ok_or_else(|| VerificationError::JwksParse(format!("key {kid} has no 'n'")))?;
                let e = jwk
                    .e
                    .as_deref()
                    .ok_or_else(|| VerificationError::JwksParse(format!("key {kid} has no 'e'")))?;
                let modulus = decode_component(&kid, "n", n)?;
                let exponent = decode_component(&kid, "e", e)?;
                (
                    KeyFamily::Rsa,
                    DecodingKey::from_rsa_raw_components(&modulus, &exponent),
                )
            }
            "EC" => {
                let family = match jwk.crv.as_deref() {
                    Some("P-256") => KeyFamily::EcP256,
                    Some("P-384") => KeyFamily::EcP384,
                    _ => return Ok(None),
                };
                let x = jwk
                    .x
                    .as_deref()
                    .ok_or_else(|| VerificationError::JwksParse(format!("key {kid} has no 'x'")))?;
                let y = jwk
                    .y
                    .as_deref()
                    .ok_or_else(|| VerificationError::JwksParse(format!("key {kid} has no 'y'")))?;
                let key = DecodingKey::from_ec_components(x, y).map_err(|e| {
                    VerificationError::JwksParse(format!("key {kid} has invalid EC components: {e}"))
                })?;
                (family, key)
            }
            other => {
                tracing::debug!(kid = %kid, kty = other, "Skipping unsupported key type");
                return Ok(None);
            }
        };

        if let Some(alg) = algorithm
            && !family.accepts(alg)
        {
            return Err(VerificationError::JwksParse(format!(
                "key {kid} pins {alg:?} which does not fit its key type"
            )));
        }

        Ok(Some(Self {
            kid,
            family,
            algorithm,
            usage: jwk.r#use.clone(),
            key,
        }))
    }
}

/// Decode a base64url key component, restoring stripped padding first.
fn decode_component(kid: &str, field: &str, value: &str) -> Result<Vec<u8>, VerificationError> {
    let mut padded = value.trim().to_owned();
    let remainder = padded.len() % 4;
    if remainder != 0 {
        padded.push_str(&"=".repeat(4 - remainder));
    }
    URL_SAFE.decode(padded.as_bytes()).map_err(|e| {
        VerificationError::JwksParse(format!("key {kid} has undecodable '{field}': {e}"))
    })
}

/// Immutable snapshot of one provider's signing keys
#[derive(Debug, Default)]
pub struct KeySet {
    keys: HashMap<String, SigningKey>,
    fetched_at: Option<Instant>,
}

impl KeySet {
    /// Build a snapshot from a fetched document. Individual unusable keys are
    /// skipped so one malformed entry cannot lock out the others.
    #[must_use]
    pub fn from_jwks(provider: &str, jwks: &JwkSet) -> Self {
        let mut keys = HashMap::with_capacity(jwks.keys.len());
        for jwk in &jwks.keys {
            match SigningKey::from_jwk(jwk) {
                Ok(Some(key)) => {
                    keys.insert(key.kid.clone(), key);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(provider, error = %e, "Ignoring malformed JWK"),
            }
        }
        Self {
            keys,
            fetched_at: Some(Instant::now()),
        }
    }

    #[must_use]
    pub fn get(&self, kid: &str) -> Option<&SigningKey> {
        self.keys.get(kid)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Age of the snapshot; `None` before the first fetch.
    #[must_use]
    pub fn age(&self) -> Option<Duration> {
        self.fetched_at.map(|t| t.elapsed())
    }
}

/// Where a provider's key set comes from
#[async_trait]
pub trait JwksSource: Send + Sync + std::fmt::Debug {
    async fn fetch(&self) -> Result<JwkSet, VerificationError>;
}

/// Fetches the key set from the provider's `jwks_uri`
#[derive(Debug, Clone)]
pub struct HttpJwksSource {
    uri: Url,
    client: reqwest::Client,
}

impl HttpJwksSource {
    #[must_use]
    pub const fn new(uri: Url, client: reqwest::Client) -> Self {
        Self { uri, client }
    }
}

#[async_trait]
impl JwksSource for HttpJwksSource {
    async fn fetch(&self) -> Result<JwkSet, VerificationError> {
        let response = self
            .client
            .get(self.uri.clone())
            .send()
            .await
            .map_err(|e| VerificationError::JwksFetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VerificationError::JwksFetch(format!(
                "{} answered HTTP {status}",
                self.uri
            )));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| VerificationError::JwksParse(e.to_string()))
    }
}

/// Per-provider signing key cache, refreshed wholesale on a key-id miss
pub struct KeyCache {
    provider: String,
    source: Arc<dyn JwksSource>,
    snapshot: ArcSwap<KeySet>,
    refreshes: AtomicU64,
}

impl std::fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCache")
            .field("provider", &self.provider)
            .field("source", &self.source)
            .field("keys_count", &self.snapshot.load().len())
            .finish_non_exhaustive()
    }
}

impl KeyCache {
    /// Create an empty cache; the first verification triggers the first fetch.
    pub fn new(provider: impl Into<String>, source: Arc<dyn JwksSource>) -> Self {
        Self {
            provider: provider.into(),
            source,
            snapshot: ArcSwap::from_pointee(KeySet::default()),
            refreshes: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Current snapshot (lock-free read)
    #[must_use]
    pub fn snapshot(&self) -> Arc<KeySet> {
        self.snapshot.load_full()
    }

    /// Number of refreshes attempted since creation
    #[must_use]
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Fetch the key set and replace the snapshot.
    ///
    /// Concurrent refreshes race; the last one to finish wins.
    pub async fn refresh(&self) -> Result<Arc<KeySet>, VerificationError> {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(provider = %self.provider, "Refreshing JWKS");

        let result = self.source.fetch().await;

        crate::observability::record_jwks_refresh(&self.provider, result.is_ok());

        let jwks = result?;
        let fresh = Arc::new(KeySet::from_jwks(&self.provider, &jwks));
        self.snapshot.store(Arc::clone(&fresh));

        tracing::info!(
            provider = %self.provider,
            keys_count = fresh.len(),
            "JWKS refreshed"
        );
        Ok(fresh)
    }

    /// Look up `kid`, refreshing at most once on a miss.
    pub async fn key_for(&self, kid: &str) -> Result<SigningKey, VerificationError> {
        if let Some(key) = self.snapshot.load().get(kid) {
            return Ok(key.clone());
        }

        tracing::debug!(provider = %self.provider, kid, "Key id not cached");
        let fresh = self.refresh().await?;
        fresh
            .get(kid)
            .cloned()
            .ok_or_else(|| VerificationError::UnknownKey(kid.to_string()))
    }
}

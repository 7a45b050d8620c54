//! Identity token verification against a provider's published keys

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, Validation};
use serde::Deserialize;

use super::claims::IdentityClaims;
use super::error::VerificationError;
use super::jwks::KeyCache;

/// Header fields read before any key is chosen.
///
/// Parsed by hand because `alg` values such as `none` must be rejected with a
/// precise reason rather than a generic decode failure.
#[derive(Debug, Deserialize)]
struct RawHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

fn peek_header(token: &str) -> Result<RawHeader, VerificationError> {
    let mut parts = token.split('.');
    let (Some(header), Some(_), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(VerificationError::MalformedToken);
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(header.trim_end_matches('='))
        .map_err(|_| VerificationError::MalformedToken)?;
    serde_json::from_slice(&bytes).map_err(|_| VerificationError::MalformedToken)
}

/// Only asymmetric algorithms are trusted; a provider never shares a secret
/// with us, so `none` and HMAC tokens are forgeries by definition.
fn allowed_algorithm(name: &str) -> Result<Algorithm, VerificationError> {
    if name.eq_ignore_ascii_case("none") || name.starts_with("HS") {
        return Err(VerificationError::DisallowedAlgorithm(name.to_string()));
    }
    Algorithm::from_str(name).map_err(|_| VerificationError::DisallowedAlgorithm(name.to_string()))
}

/// Verifies identity tokens for a single provider
pub struct TokenVerifier {
    keys: Arc<KeyCache>,
    client_id: String,
    issuer: Option<String>,
    leeway: Duration,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("provider", &self.keys.provider())
            .field("client_id", &self.client_id)
            .field("issuer", &self.issuer)
            .field("leeway", &self.leeway)
            .finish()
    }
}

impl TokenVerifier {
    #[must_use]
    pub fn new(keys: Arc<KeyCache>, client_id: impl Into<String>) -> Self {
        Self {
            keys,
            client_id: client_id.into(),
            issuer: None,
            leeway: Duration::from_secs(60),
        }
    }

    /// Require `iss` to match. Trailing slashes are ignored.
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into().trim_end_matches('/').to_string());
        self
    }

    #[must_use]
    pub const fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    #[must_use]
    pub fn keys(&self) -> &Arc<KeyCache> {
        &self.keys
    }

    /// Verify signature, algorithm, expiry, audience and issuer, returning the
    /// claims only when every check passes.
    pub async fn verify(&self, token: &str) -> Result<IdentityClaims, VerificationError> {
        let header = peek_header(token)?;
        let alg = allowed_algorithm(&header.alg)?;
        let kid = header.kid.ok_or(VerificationError::MissingKeyId)?;

        let key = self.keys.key_for(&kid).await?;
        if !key.accepts(alg) {
            return Err(VerificationError::AlgorithmMismatch {
                published: key
                    .algorithm
                    .map_or_else(|| format!("{:?}", key.family), |a| format!("{a:?}")),
                declared: header.alg,
                kid,
            });
        }

        let mut validation = Validation::new(alg);
        validation.set_audience(&[self.client_id.as_str()]);
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer.clone(), format!("{issuer}/")]);
        }
        validation.set_required_spec_claims(&["exp", "sub"]);
        validation.leeway = self.leeway.as_secs();

        let data = jsonwebtoken::decode::<IdentityClaims>(token, key.decoding_key(), &validation)?;
        let claims = data.claims.validate()?;

        tracing::debug!(
            provider = %self.keys.provider(),
            kid = %kid,
            "Identity token verified"
        );
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::sso::jwks::tests::ScriptedSource;
    use crate::sso::testutil::{
        CLIENT_ID, ISSUER, KEY_1_N, KEY_1_PEM, KEY_2_N, KEY_2_PEM, claims_for, jwk_set, now, sign,
    };

    fn verifier_with(source: ScriptedSource) -> (TokenVerifier, Arc<ScriptedSource>) {
        let source = Arc::new(source);
        let cache = Arc::new(KeyCache::new("example", source.clone()));
        let verifier = TokenVerifier::new(cache, CLIENT_ID).with_issuer(ISSUER);
        (verifier, source)
    }

    fn forge(header: &serde_json::Value, claims: &serde_json::Value, sig: &str) -> String {
        format!(
            "{}.{}.{sig}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(claims.to_string())
        )
    }

    #[tokio::test]
    async fn test_verify_valid_token() {
        let (verifier, _) = verifier_with(ScriptedSource::always(jwk_set(&[("k1", KEY_1_N)])));
        let token = sign(KEY_1_PEM, Some("k1"), &claims_for("user-1"));

        let claims = verifier.verify(&token).await.unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.display_name(), "Test User");
    }

    #[tokio::test]
    async fn test_verify_picks_up_rotated_key_with_one_refresh() {
        let (verifier, source) = verifier_with(
            ScriptedSource::always(jwk_set(&[("k1", KEY_1_N), ("k2", KEY_2_N)]))
                .then(Ok(jwk_set(&[("k1", KEY_1_N)]))),
        );
        verifier.keys().refresh().await.unwrap();

        let token = sign(KEY_2_PEM, Some("k2"), &claims_for("user-2"));
        let claims = verifier.verify(&token).await.unwrap();
        assert_eq!(claims.sub, "user-2");
        assert_eq!(source.fetch_count(), 2);

        // Subsequent tokens signed with the rotated key hit the cache
        verifier.verify(&token).await.unwrap();
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_verify_rejects_wrong_signature() {
        let (verifier, _) = verifier_with(ScriptedSource::always(jwk_set(&[("k1", KEY_1_N)])));
        // Claims k1 but signed with key 2
        let token = sign(KEY_2_PEM, Some("k1"), &claims_for("user-1"));
        assert!(matches!(
            verifier.verify(&token).await,
            Err(VerificationError::InvalidSignature)
        ));
    }

    #[tokio::test]
    async fn test_verify_rejects_expired_token() {
        let (verifier, _) = verifier_with(ScriptedSource::always(jwk_set(&[("k1", KEY_1_N)])));
        let mut claims = claims_for("user-1");
        claims["exp"] = json!(now() - 3600);
        let token = sign(KEY_1_PEM, Some("k1"), &claims);
        assert!(matches!(
            verifier.verify(&token).await,
            Err(VerificationError::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn test_verify_rejects_foreign_audience() {
        let (verifier, _) = verifier_with(ScriptedSource::always(jwk_set(&[("k1", KEY_1_N)])));
        let mut claims = claims_for("user-1");
        claims["aud"] = json!("someone-else");
        let token = sign(KEY_1_PEM, Some("k1"), &claims);
        assert!(matches!(
            verifier.verify(&token).await,
            Err(VerificationError::InvalidAudience)
        ));
    }

    #[tokio::test]
    async fn test_verify_accepts_audience_list_containing_client() {
        let (verifier, _) = verifier_with(ScriptedSource::always(jwk_set(&[("k1", KEY_1_N)])));
        let mut claims = claims_for("user-1");
        claims["aud"] = json!(["other", CLIENT_ID]);
        let token = sign(KEY_1_PEM, Some("k1"), &claims);
        assert!(verifier.verify(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_verify_rejects_foreign_issuer() {
        let (verifier, _) = verifier_with(ScriptedSource::always(jwk_set(&[("k1", KEY_1_N)])));
        let mut claims = claims_for("user-1");
        claims["iss"] = json!("https://evil.example.com");
        let token = sign(KEY_1_PEM, Some("k1"), &claims);
        assert!(matches!(
            verifier.verify(&token).await,
            Err(VerificationError::InvalidIssuer)
        ));
    }

    #[tokio::test]
    async fn test_verify_rejects_missing_subject() {
        let (verifier, _) = verifier_with(ScriptedSource::always(jwk_set(&[("k1", KEY_1_N)])));
        let mut claims = claims_for("user-1");
        claims.as_object_mut().unwrap().remove("sub");
        let token = sign(KEY_1_PEM, Some("k1"), &claims);
        assert!(matches!(
            verifier.verify(&token).await,
            Err(VerificationError::InvalidClaims(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_rejects_none_and_hmac_without_fetching() {
        let (verifier, source) =
            verifier_with(ScriptedSource::always(jwk_set(&[("k1", KEY_1_N)])));
        let claims = claims_for("user-1");

        let none = forge(&json!({"alg": "none", "kid": "k1"}), &claims, "");
        assert!(matches!(
            verifier.verify(&none).await,
            Err(VerificationError::DisallowedAlgorithm(a)) if a == "none"
        ));

        let hmac = forge(&json!({"alg": "HS256", "kid": "k1"}), &claims, "c2ln");
        assert!(matches!(
            verifier.verify(&hmac).await,
            Err(VerificationError::DisallowedAlgorithm(a)) if a == "HS256"
        ));
        assert_eq!(source.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_verify_rejects_algorithm_the_key_is_not_pinned_to() {
        let (verifier, _) = verifier_with(ScriptedSource::always(jwk_set(&[("k1", KEY_1_N)])));
        let token = forge(&json!({"alg": "RS512", "kid": "k1"}), &claims_for("u"), "c2ln");
        assert!(matches!(
            verifier.verify(&token).await,
            Err(VerificationError::AlgorithmMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_verify_requires_key_id() {
        let (verifier, _) = verifier_with(ScriptedSource::always(jwk_set(&[("k1", KEY_1_N)])));
        let token = sign(KEY_1_PEM, None, &claims_for("user-1"));
        assert!(matches!(
            verifier.verify(&token).await,
            Err(VerificationError::MissingKeyId)
        ));
    }

    #[tokio::test]
    async fn test_verify_unknown_key_after_refresh() {
        let (verifier, source) =
            verifier_with(ScriptedSource::always(jwk_set(&[("k1", KEY_1_N)])));
        let token = sign(KEY_2_PEM, Some("k9"), &claims_for("user-1"));
        assert!(matches!(
            verifier.verify(&token).await,
            Err(VerificationError::UnknownKey(k)) if k == "k9"
        ));
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_verify_rejects_garbage() {
        let (verifier, _) = verifier_with(ScriptedSource::always(jwk_set(&[])));
        for token in ["", "abc", "a.b", "a.b.c.d", "!!!.e30.sig"] {
            assert!(matches!(
                verifier.verify(token).await,
                Err(VerificationError::MalformedToken)
            ));
        }
    }
}

//! Identity-provider error types

use thiserror::Error;

/// Why an identity token was not trusted.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("malformed token")]
    MalformedToken,

    #[error("disallowed signing algorithm: {0}")]
    DisallowedAlgorithm(String),

    #[error("token header has no key id")]
    MissingKeyId,

    #[error("unknown signing key: {0}")]
    UnknownKey(String),

    #[error("key {kid} is published for {published}, token declares {declared}")]
    AlgorithmMismatch {
        kid: String,
        published: String,
        declared: String,
    },

    #[error("invalid signature")]
    InvalidSignature,

    #[error("token expired")]
    TokenExpired,

    #[error("invalid issuer")]
    InvalidIssuer,

    #[error("invalid audience")]
    InvalidAudience,

    #[error("invalid claims: {0}")]
    InvalidClaims(String),

    #[error("JWKS fetch failed: {0}")]
    JwksFetch(String),

    #[error("JWKS parse failed: {0}")]
    JwksParse(String),
}

impl VerificationError {
    /// The provider's key endpoint could not be reached or understood.
    #[must_use]
    pub const fn is_upstream(&self) -> bool {
        matches!(self, Self::JwksFetch(_) | Self::JwksParse(_))
    }

    #[must_use]
    pub const fn is_unknown_key(&self) -> bool {
        matches!(self, Self::UnknownKey(_))
    }
}

impl From<jsonwebtoken::errors::Error> for VerificationError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::TokenExpired,
            ErrorKind::InvalidIssuer => Self::InvalidIssuer,
            ErrorKind::InvalidAudience => Self::InvalidAudience,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::MissingRequiredClaim(claim) => {
                Self::InvalidClaims(format!("missing required claim '{claim}'"))
            }
            ErrorKind::ImmatureSignature => Self::InvalidClaims("token not yet valid".into()),
            ErrorKind::Json(e) => Self::InvalidClaims(e.to_string()),
            ErrorKind::InvalidAlgorithm => Self::DisallowedAlgorithm("mismatched key type".into()),
            _ => Self::MalformedToken,
        }
    }
}

/// Failure to trade an authorization code for tokens.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("token endpoint unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("token endpoint returned {code} ({description}), HTTP {status}")]
    Provider {
        status: u16,
        code: String,
        description: String,
    },

    #[error("undecodable token response: {0}")]
    Decode(String),

    #[error("token response has no {0}")]
    MissingField(&'static str),
}

impl ExchangeError {
    /// Whether the provider answered and refused, as opposed to not answering.
    #[must_use]
    pub const fn is_provider_rejection(&self) -> bool {
        matches!(self, Self::Provider { .. })
    }
}

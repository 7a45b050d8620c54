//! Identity token claims

use serde::Deserialize;
use serde_json::{Map, Value};

use super::error::VerificationError;

/// Audience can be a single string or array of strings
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Self::One(s) => s == value,
            Self::Many(v) => v.iter().any(|s| s == value),
        }
    }
}

/// Claims of a verified identity token.
///
/// Required claims are non-optional fields, so a token missing them (or carrying
/// them with the wrong JSON type) fails to decode instead of yielding a
/// half-populated value.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityClaims {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub aud: Option<OneOrMany>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
    /// Provider-specific claims
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IdentityClaims {
    /// Reject claim sets that decode but cannot identify anyone.
    pub(crate) fn validate(self) -> Result<Self, VerificationError> {
        if self.sub.trim().is_empty() {
            return Err(VerificationError::InvalidClaims("empty subject".into()));
        }
        Ok(self)
    }

    /// Best display name the provider offered.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or_default()
    }
}

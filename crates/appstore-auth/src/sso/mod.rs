//! Single sign-on: provider keys, identity token verification and code exchange

mod claims;
mod error;
mod exchange;
mod jwks;
mod provider;
mod verifier;

#[cfg(test)]
pub(crate) mod testutil;

pub use claims::{IdentityClaims, OneOrMany};
pub use error::{ExchangeError, VerificationError};
pub use exchange::{CodeExchange, HttpCodeExchange, TokenSet};
pub use jwks::{HttpJwksSource, Jwk, JwkSet, JwksSource, KeyCache, KeyFamily, KeySet, SigningKey};
pub use provider::{DiscoveryError, Provider, ProviderListing, ProviderRegistry};
pub use verifier::TokenVerifier;

#[cfg(test)]
pub(crate) use jwks::tests::ScriptedSource;

//! Authentication and session service for an app store catalog API
//!
//! Identity comes either from third-party OpenID Connect providers or from
//! local username and password accounts. [`AuthService`] is the entry point:
//! it issues opaque session keys, resolves them back to accounts and guards
//! password logins against brute force.

pub mod captcha;
pub mod config;
mod constants;
mod error;
pub mod guard;
pub mod observability;
pub mod password;
pub mod service;
pub mod sso;
pub mod store;
pub mod transport;

pub use captcha::{CaptchaError, CaptchaVerifier, DisabledCaptcha, RecaptchaVerifier};
pub use config::{AccountMode, Config, ConfigBuilder, ProviderConfig, TelemetryConfig};
pub use error::{AuthError, Error, ErrorClass, Result};
pub use guard::BruteForceGuard;
pub use service::{AuthService, IssuedSession, LoginState, ServiceSettings, SessionInfo};
pub use store::Database;
pub use store::accounts::AccountId;
pub use store::sessions::SessionKey;

use thiserror::Error;

use crate::captcha::CaptchaError;
use crate::constants::{
    MSG_ACCOUNT_DISABLED, MSG_CAPTCHA_REQUIRED, MSG_IDENTITY_REJECTED, MSG_INTERNAL,
    MSG_INVALID_PASSWORD, MSG_INVALID_PROVIDER, MSG_INVALID_SESSION, MSG_INVALID_USERNAME,
    MSG_LOGIN_METHOD_UNAVAILABLE, MSG_USERNAME_TAKEN,
};
use crate::password::PasswordError;
use crate::sso::{ExchangeError, VerificationError};
use crate::store::StoreError;
use crate::store::accounts::AccountId;

/// Service-level failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed or unacceptable request
    Input,
    /// Credential not trusted
    Credential,
    /// Provider, CAPTCHA service or storage failed
    Upstream,
    /// Not an error: the caller must pass a CAPTCHA and retry
    RateLimited,
}

/// Why a login or session operation did not succeed.
///
/// `Display` carries operator detail for logs. Responses use
/// [`AuthError::user_message`], which never includes upstream text.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),

    #[error("unknown identity provider '{0}'")]
    UnknownProvider(String),

    #[error("login method not enabled in this deployment")]
    WrongMode,

    #[error("username not found")]
    UnknownUsername,

    #[error("password mismatch for account {0}")]
    InvalidPassword(AccountId),

    #[error("account {0} is disabled")]
    AccountDisabled(AccountId),

    #[error("username already taken")]
    UsernameTaken,

    #[error("session key not found")]
    InvalidSession,

    #[error("rate limited and CAPTCHA not passed")]
    RateLimited,

    #[error("identity token rejected: {0}")]
    Verification(#[from] VerificationError),

    #[error("code exchange failed: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("CAPTCHA verification failed: {0}")]
    Captcha(#[from] CaptchaError),

    #[error("storage failed: {0}")]
    Store(StoreError),

    #[error(transparent)]
    Password(#[from] PasswordError),

    #[error("{0} timed out")]
    UpstreamTimeout(&'static str),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateUsername => Self::UsernameTaken,
            other => Self::Store(other),
        }
    }
}

impl AuthError {
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidRequest(_)
            | Self::UnknownProvider(_)
            | Self::WrongMode
            | Self::UsernameTaken => ErrorClass::Input,
            Self::UnknownUsername
            | Self::InvalidPassword(_)
            | Self::AccountDisabled(_)
            | Self::InvalidSession => ErrorClass::Credential,
            Self::Verification(e) if e.is_upstream() => ErrorClass::Upstream,
            Self::Verification(_) => ErrorClass::Credential,
            Self::RateLimited => ErrorClass::RateLimited,
            Self::Exchange(_)
            | Self::Captcha(_)
            | Self::Store(_)
            | Self::Password(_)
            | Self::UpstreamTimeout(_) => ErrorClass::Upstream,
        }
    }

    /// Message safe to show the end user
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidRequest(msg) => *msg,
            Self::UnknownProvider(_) => MSG_INVALID_PROVIDER,
            Self::WrongMode => MSG_LOGIN_METHOD_UNAVAILABLE,
            Self::UnknownUsername => MSG_INVALID_USERNAME,
            Self::InvalidPassword(_) => MSG_INVALID_PASSWORD,
            Self::AccountDisabled(_) => MSG_ACCOUNT_DISABLED,
            Self::UsernameTaken => MSG_USERNAME_TAKEN,
            Self::InvalidSession => MSG_INVALID_SESSION,
            Self::RateLimited => MSG_CAPTCHA_REQUIRED,
            Self::Verification(e) if e.is_upstream() => MSG_INTERNAL,
            Self::Verification(_) => MSG_IDENTITY_REJECTED,
            Self::Exchange(_)
            | Self::Captcha(_)
            | Self::Store(_)
            | Self::Password(_)
            | Self::UpstreamTimeout(_) => MSG_INTERNAL,
        }
    }

    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited)
    }

    #[must_use]
    pub const fn is_upstream(&self) -> bool {
        matches!(self.class(), ErrorClass::Upstream)
    }
}

/// Process-level errors: configuration, startup and serving
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl Error {
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

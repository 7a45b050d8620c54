//! Session and account façade
//!
//! The only entry point the rest of the system uses. Composes provider
//! exchange and verification, the brute-force guard, the account directory and
//! the session store into login, registration, session resolution and profile
//! updates. Every operation returns a structured result; nothing here panics
//! or takes the process down on a failed login.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;

use crate::captcha::{CaptchaVerifier, DisabledCaptcha, RecaptchaVerifier};
use crate::config::{AccountMode, Config};
use crate::constants::{
    MAX_DISPLAY_NAME_CHARS, MAX_USERNAME_CHARS, MSG_MISSING_FIELDS, MSG_NAME_TOO_LONG,
    MSG_PASSWORD_SHAPE, MSG_USERNAME_SHAPE,
};
use crate::error::{AuthError, ErrorClass};
use crate::guard::BruteForceGuard;
use crate::observability;
use crate::password::{self, MAX_PASSWORD_BYTES};
use crate::sso::{ProviderListing, ProviderRegistry};
use crate::store::accounts::{self, AccountId, AccountKind};
use crate::store::sessions::{self, CreatedSession, SessionKey, SessionSideData};
use crate::store::{Database, unix_millis};

pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// Where a login attempt currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Unauthenticated,
    ExchangingToken,
    VerifyingToken,
    CheckingRateLimit,
    CaptchaRequired,
    Verified,
    SessionIssued,
    Rejected,
}

impl LoginState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::SessionIssued | Self::Rejected)
    }

    /// Allowed transitions. Registration goes straight from
    /// `Unauthenticated` to `Verified` since it creates the credential.
    #[must_use]
    pub const fn may_advance_to(self, next: Self) -> bool {
        if matches!(next, Self::Rejected) {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (
                Self::Unauthenticated,
                Self::ExchangingToken | Self::CheckingRateLimit | Self::Verified
            ) | (Self::ExchangingToken, Self::VerifyingToken)
                | (Self::CheckingRateLimit, Self::CaptchaRequired)
                | (
                    Self::VerifyingToken | Self::CheckingRateLimit | Self::CaptchaRequired,
                    Self::Verified
                )
                | (Self::Verified, Self::SessionIssued)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginMethod {
    Sso,
    Password,
    Register,
}

impl LoginMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sso => "sso",
            Self::Password => "password",
            Self::Register => "register",
        }
    }
}

/// Tracks and logs one login attempt's progress through [`LoginState`]
struct LoginFlow<'a> {
    method: LoginMethod,
    origin: &'a str,
    state: LoginState,
}

impl<'a> LoginFlow<'a> {
    const fn start(method: LoginMethod, origin: &'a str) -> Self {
        Self {
            method,
            origin,
            state: LoginState::Unauthenticated,
        }
    }

    fn advance(&mut self, next: LoginState) {
        debug_assert!(
            self.state.may_advance_to(next),
            "illegal login transition {:?} -> {next:?}",
            self.state
        );
        tracing::debug!(
            method = self.method.as_str(),
            from = ?self.state,
            to = ?next,
            "Login state changed"
        );
        self.state = next;
    }

    fn issue(&mut self, account: AccountId) {
        self.advance(LoginState::SessionIssued);
        tracing::info!(
            method = self.method.as_str(),
            account_id = %account,
            origin = self.origin,
            "Session issued"
        );
        observability::record_login(self.method.as_str(), "success");
    }

    fn reject(&mut self, err: AuthError) -> AuthError {
        self.advance(LoginState::Rejected);
        let method = self.method.as_str();
        let outcome = match err.class() {
            ErrorClass::Input => {
                tracing::info!(method, origin = self.origin, error = %err, "Login request refused");
                "invalid_request"
            }
            ErrorClass::Credential => {
                tracing::warn!(method, origin = self.origin, error = %err, "Login rejected");
                "rejected"
            }
            ErrorClass::Upstream => {
                tracing::error!(method, origin = self.origin, error = %err, "Login failed");
                "error"
            }
            ErrorClass::RateLimited => {
                tracing::info!(method, origin = self.origin, "Login needs CAPTCHA");
                "rate_limited"
            }
        };
        observability::record_login(method, outcome);
        err
    }

    fn finish<T>(&mut self, result: AuthResult<(AccountId, T)>) -> AuthResult<(AccountId, T)> {
        match result {
            Ok((account, value)) => {
                self.issue(account);
                Ok((account, value))
            }
            Err(e) => Err(self.reject(e)),
        }
    }
}

/// A freshly issued session
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub key: SessionKey,
    pub account_id: AccountId,
}

/// What the session-info endpoint reports about a live session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub account_id: AccountId,
    /// Local accounts only
    pub username: Option<String>,
    pub display_name: String,
    pub sso: bool,
}

/// Tunables of the façade
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub mode: AccountMode,
    pub guard: BruteForceGuard,
    /// Bound on each provider or CAPTCHA call
    pub upstream_timeout: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            mode: AccountMode::Sso,
            guard: BruteForceGuard::default(),
            upstream_timeout: Duration::from_secs(10),
        }
    }
}

pub struct AuthService {
    db: Database,
    providers: ProviderRegistry,
    captcha: Arc<dyn CaptchaVerifier>,
    settings: ServiceSettings,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("mode", &self.settings.mode)
            .field("providers", &self.providers.len())
            .field("captcha", &self.captcha)
            .finish_non_exhaustive()
    }
}

fn validate_username(username: &str) -> AuthResult<()> {
    let chars = username.chars().count();
    if chars == 0 || chars > MAX_USERNAME_CHARS {
        return Err(AuthError::InvalidRequest(MSG_USERNAME_SHAPE));
    }
    Ok(())
}

fn validate_password(password: &str) -> AuthResult<()> {
    if password.is_empty() || password.len() > MAX_PASSWORD_BYTES {
        return Err(AuthError::InvalidRequest(MSG_PASSWORD_SHAPE));
    }
    Ok(())
}

fn validate_display_name(name: &str) -> AuthResult<()> {
    if name.chars().count() > MAX_DISPLAY_NAME_CHARS {
        return Err(AuthError::InvalidRequest(MSG_NAME_TOO_LONG));
    }
    Ok(())
}

fn clip_display_name(name: &str) -> String {
    name.chars().take(MAX_DISPLAY_NAME_CHARS).collect()
}

impl AuthService {
    #[must_use]
    pub fn new(
        db: Database,
        providers: ProviderRegistry,
        captcha: Arc<dyn CaptchaVerifier>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            db,
            providers,
            captcha,
            settings,
        }
    }

    /// Open the database, bring up the configured providers and pick the
    /// CAPTCHA verifier.
    pub async fn from_config(config: &Config) -> crate::Result<Self> {
        let db = match &config.database {
            Some(path) => Database::open(path, config.storage_timeout)?,
            None => {
                tracing::warn!("No database path configured; accounts and sessions live in memory");
                Database::open_in_memory(config.storage_timeout)?
            }
        };

        let client = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .user_agent(concat!("appstore-auth/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| crate::Error::Config(format!("Failed to build HTTP client: {e}")))?;

        let providers = match config.mode {
            AccountMode::Sso => {
                ProviderRegistry::connect_all(
                    config.providers(),
                    &client,
                    config.token_leeway,
                    config.upstream_timeout,
                )
                .await
            }
            AccountMode::Local => ProviderRegistry::default(),
        };

        let captcha: Arc<dyn CaptchaVerifier> = match &config.captcha.secret {
            Some(secret) if !secret.expose_secret().is_empty() => Arc::new(RecaptchaVerifier::new(
                secret.clone(),
                config.captcha.verify_url.clone(),
                client,
            )),
            _ => {
                if config.mode == AccountMode::Local {
                    tracing::warn!("No CAPTCHA secret configured; rate-limited logins cannot proceed");
                }
                Arc::new(DisabledCaptcha)
            }
        };

        Ok(Self::new(db, providers, captcha, config.service_settings()))
    }

    #[must_use]
    pub const fn mode(&self) -> AccountMode {
        self.settings.mode
    }

    /// Providers a frontend may offer, in configuration order
    #[must_use]
    pub fn providers(&self) -> Vec<ProviderListing> {
        self.providers.listings()
    }

    fn require_mode(&self, mode: AccountMode) -> AuthResult<()> {
        if self.settings.mode == mode {
            Ok(())
        } else {
            Err(AuthError::WrongMode)
        }
    }

    async fn bounded<T, E>(
        &self,
        what: &'static str,
        work: impl Future<Output = Result<T, E>>,
    ) -> AuthResult<T>
    where
        AuthError: From<E>,
    {
        match tokio::time::timeout(self.settings.upstream_timeout, work).await {
            Ok(result) => result.map_err(AuthError::from),
            Err(_) => Err(AuthError::UpstreamTimeout(what)),
        }
    }

    #[cfg(test)]
    async fn record_attempt(
        &self,
        account: Option<AccountId>,
        origin: &str,
        success: bool,
    ) -> AuthResult<()> {
        let guard = self.settings.guard;
        let origin = origin.to_string();
        let now = unix_millis();
        self.db
            .transact(move |tx| guard.record(tx, account, &origin, success, now))
            .await?;
        Ok(())
    }

    fn note_eviction(account: AccountId, created: &CreatedSession) {
        if created.evicted > 0 {
            tracing::debug!(account_id = %account, "Session cap reached, oldest session evicted");
            observability::record_session_eviction();
        }
    }

    /// SSO login: exchange `code` with `provider`, verify the identity token,
    /// find or create the linked account and issue a session.
    pub async fn login_or_register(
        &self,
        provider: &str,
        code: &str,
        origin: &str,
    ) -> AuthResult<IssuedSession> {
        let mut flow = LoginFlow::start(LoginMethod::Sso, origin);
        let result = self.sso_login(&mut flow, provider, code, origin).await;
        let (account_id, key) = flow.finish(result)?;
        Ok(IssuedSession { key, account_id })
    }

    async fn sso_login(
        &self,
        flow: &mut LoginFlow<'_>,
        provider_name: &str,
        code: &str,
        origin: &str,
    ) -> AuthResult<(AccountId, SessionKey)> {
        self.require_mode(AccountMode::Sso)?;
        if code.is_empty() || provider_name.is_empty() {
            return Err(AuthError::InvalidRequest(MSG_MISSING_FIELDS));
        }
        let provider = self
            .providers
            .get(provider_name)
            .ok_or_else(|| AuthError::UnknownProvider(provider_name.to_string()))?;

        flow.advance(LoginState::ExchangingToken);
        let tokens = self
            .bounded("token exchange", provider.exchange().exchange(code))
            .await?;

        flow.advance(LoginState::VerifyingToken);
        let claims = self
            .bounded(
                "identity token verification",
                provider.verifier().verify(&tokens.id_token),
            )
            .await?;
        flow.advance(LoginState::Verified);

        let now = unix_millis();
        let expires_at = tokens.expires_in.map_or(claims.exp, |secs| {
            (now / 1000).saturating_add(i64::try_from(secs).unwrap_or(i64::MAX))
        });
        let side = SessionSideData {
            access_token: Some(tokens.access_token),
            access_token_expires_at: Some(expires_at),
        };

        let guard = self.settings.guard;
        let provider_name = provider.name().to_string();
        let display_name = clip_display_name(claims.display_name());
        let subject = claims.sub;
        let origin = origin.to_string();

        let outcome = self
            .db
            .transact(move |tx| {
                let (account, created) =
                    accounts::find_or_create_sso(tx, &provider_name, &subject, &display_name)?;
                if created {
                    tracing::info!(
                        provider = %provider_name,
                        account_id = %account.id,
                        "Created account for new SSO identity"
                    );
                }
                if account.disabled {
                    guard.record(tx, Some(account.id), &origin, false, now)?;
                    return Ok(Err(account.id));
                }
                guard.record(tx, Some(account.id), &origin, true, now)?;
                let session = sessions::create(tx, account.id, &side, now)?;
                Ok(Ok((account.id, session)))
            })
            .await?;

        match outcome {
            Err(disabled) => Err(AuthError::AccountDisabled(disabled)),
            Ok((account, session)) => {
                Self::note_eviction(account, &session);
                Ok((account, session.key))
            }
        }
    }

    /// Password login. When the guard flags the account or origin, a passing
    /// `captcha_response` is required before the password is even checked.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        captcha_response: &str,
        origin: &str,
    ) -> AuthResult<IssuedSession> {
        let mut flow = LoginFlow::start(LoginMethod::Password, origin);
        let result = self
            .password_login(&mut flow, username, password, captcha_response, origin)
            .await;
        let (account_id, key) = flow.finish(result)?;
        Ok(IssuedSession { key, account_id })
    }

    async fn password_login(
        &self,
        flow: &mut LoginFlow<'_>,
        username: &str,
        password: &str,
        captcha_response: &str,
        origin: &str,
    ) -> AuthResult<(AccountId, SessionKey)> {
        self.require_mode(AccountMode::Local)?;
        validate_username(username)?;
        validate_password(password)?;

        flow.advance(LoginState::CheckingRateLimit);
        let guard = self.settings.guard;
        let (account, admission) = {
            let username = username.to_string();
            let origin = origin.to_string();
            let now = unix_millis();
            self.db
                .transact(move |tx| {
                    let account = accounts::find_by_username(tx, &username)?;
                    let admission = guard.admit(tx, account.as_ref().map(|a| a.id), &origin, now)?;
                    Ok((account, admission))
                })
                .await?
        };

        // From here on the attempt is already on record as failed
        if admission.limited {
            flow.advance(LoginState::CaptchaRequired);
            observability::record_rate_limited();
            let passed = if captcha_response.is_empty() {
                false
            } else {
                self.bounded(
                    "CAPTCHA verification",
                    self.captcha.verify(captcha_response, origin),
                )
                .await?
            };
            if !passed {
                return Err(AuthError::RateLimited);
            }
        }

        let Some(account) = account else {
            password::verify_blocking(None, password.to_string()).await;
            return Err(AuthError::UnknownUsername);
        };

        if account.disabled {
            return Err(AuthError::AccountDisabled(account.id));
        }

        let AccountKind::LocalCredential { password_hash, .. } = account.kind else {
            return Err(AuthError::UnknownUsername);
        };

        if !password::verify_blocking(Some(password_hash), password.to_string()).await {
            return Err(AuthError::InvalidPassword(account.id));
        }
        flow.advance(LoginState::Verified);

        let id = account.id;
        let attempt = admission.attempt;
        let now = unix_millis();
        let session = self
            .db
            .transact(move |tx| {
                guard.settle(tx, attempt)?;
                sessions::create(tx, id, &SessionSideData::default(), now)
            })
            .await?;
        Self::note_eviction(id, &session);
        Ok((id, session.key))
    }

    /// Create a local account and log it in. The registration counts as a
    /// successful login attempt.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        real_name: &str,
        origin: &str,
    ) -> AuthResult<IssuedSession> {
        let mut flow = LoginFlow::start(LoginMethod::Register, origin);
        let result = self
            .register_inner(&mut flow, username, password, real_name, origin)
            .await;
        let (account_id, key) = flow.finish(result)?;
        Ok(IssuedSession { key, account_id })
    }

    async fn register_inner(
        &self,
        flow: &mut LoginFlow<'_>,
        username: &str,
        password: &str,
        real_name: &str,
        origin: &str,
    ) -> AuthResult<(AccountId, SessionKey)> {
        self.require_mode(AccountMode::Local)?;
        validate_username(username)?;
        validate_password(password)?;
        validate_display_name(real_name)?;

        let password_hash = password::hash_blocking(password.to_string()).await?;
        flow.advance(LoginState::Verified);

        let guard = self.settings.guard;
        let username = username.to_string();
        let real_name = real_name.to_string();
        let origin = origin.to_string();
        let now = unix_millis();
        let (id, session) = self
            .db
            .transact(move |tx| {
                let id = accounts::register_local(tx, &username, &password_hash, &real_name)?;
                guard.record(tx, Some(id), &origin, true, now)?;
                let session = sessions::create(tx, id, &SessionSideData::default(), now)?;
                Ok((id, session))
            })
            .await?;
        tracing::info!(account_id = %id, "Registered local account");
        Ok((id, session.key))
    }

    /// Map a session key to its account. An unknown key is `Ok(None)`.
    pub async fn resolve_session(&self, key: &str) -> AuthResult<Option<AccountId>> {
        if key.is_empty() {
            return Ok(None);
        }
        let key = SessionKey::from_client(key);
        Ok(self
            .db
            .transact(move |tx| sessions::resolve(tx, &key))
            .await?)
    }

    /// Describe the session's account and mark the session as just seen.
    pub async fn session_info(&self, key: &str) -> AuthResult<Option<SessionInfo>> {
        if key.is_empty() {
            return Ok(None);
        }
        let key = SessionKey::from_client(key);
        let now = unix_millis();
        Ok(self
            .db
            .transact(move |tx| {
                let Some(id) = sessions::resolve(tx, &key)? else {
                    return Ok(None);
                };
                sessions::touch(tx, &key, now)?;
                Ok(accounts::get(tx, id)?.map(|account| SessionInfo {
                    account_id: account.id,
                    username: account.username().map(str::to_string),
                    sso: matches!(account.kind, AccountKind::SsoLinked { .. }),
                    display_name: account.display_name,
                }))
            })
            .await?)
    }

    /// Change the display name of the session's account.
    pub async fn update_profile(&self, key: &str, name: &str) -> AuthResult<()> {
        validate_display_name(name)?;
        let key = SessionKey::from_client(key);
        let name = name.to_string();
        let updated = self
            .db
            .transact(move |tx| {
                let Some(id) = sessions::resolve(tx, &key)? else {
                    return Ok(None);
                };
                accounts::update_display_name(tx, id, &name)?;
                Ok(Some(id))
            })
            .await?;
        match updated {
            Some(id) => {
                tracing::info!(account_id = %id, "Display name updated");
                Ok(())
            }
            None => Err(AuthError::InvalidSession),
        }
    }

    /// Replace the password of the session's local account.
    pub async fn update_password(&self, key: &str, new_password: &str) -> AuthResult<()> {
        self.require_mode(AccountMode::Local)?;
        validate_password(new_password)?;

        let Some(id) = self.resolve_session(key).await? else {
            return Err(AuthError::InvalidSession);
        };
        let password_hash = password::hash_blocking(new_password.to_string()).await?;
        let key = SessionKey::from_client(key);
        let still_valid = self
            .db
            .transact(move |tx| {
                // The session may have been evicted while hashing
                if sessions::resolve(tx, &key)? != Some(id) {
                    return Ok(false);
                }
                accounts::update_password_hash(tx, id, &password_hash)?;
                Ok(true)
            })
            .await?;
        if !still_valid {
            return Err(AuthError::InvalidSession);
        }
        tracing::info!(account_id = %id, "Password changed");
        Ok(())
    }

    /// End a session. Returns `false` if the key was not live.
    pub async fn logout(&self, key: &str) -> AuthResult<bool> {
        let key = SessionKey::from_client(key);
        Ok(self
            .db
            .transact(move |tx| sessions::delete(tx, &key))
            .await?)
    }

    /// Live sessions held by `account`
    pub async fn active_sessions(&self, account: AccountId) -> AuthResult<i64> {
        Ok(self
            .db
            .transact(move |tx| sessions::count(tx, account))
            .await?)
    }

    /// Deactivate or reactivate an account. Existing sessions keep resolving,
    /// but no new session is issued while disabled.
    pub async fn set_account_disabled(&self, account: AccountId, disabled: bool) -> AuthResult<()> {
        self.db
            .transact(move |tx| accounts::set_disabled(tx, account, disabled))
            .await?;
        tracing::info!(account_id = %account, disabled, "Account disabled flag changed");
        Ok(())
    }
}

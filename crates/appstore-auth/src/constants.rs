//! User-facing messages and input limits

/// Any infrastructure failure; detail goes to the log only
pub const MSG_INTERNAL: &str = "Internal server error";

pub const MSG_UNPARSEABLE: &str = "Server could not parse message";

pub const MSG_MISSING_FIELDS: &str = "Missing required fields";

pub const MSG_INVALID_PROVIDER: &str = "Invalid SSO provider";

pub const MSG_IDENTITY_REJECTED: &str = "Could not verify identity";

pub const MSG_INVALID_USERNAME: &str = "Invalid username";

pub const MSG_INVALID_PASSWORD: &str = "Invalid password";

pub const MSG_ACCOUNT_DISABLED: &str = "Account is disabled";

pub const MSG_USERNAME_TAKEN: &str = "This username is already taken";

pub const MSG_INVALID_SESSION: &str = "Invalid session key";

pub const MSG_CAPTCHA_REQUIRED: &str = "Too many login attempts, please complete the CAPTCHA";

pub const MSG_LOGIN_METHOD_UNAVAILABLE: &str = "This login method is not available";

pub const MSG_NAME_TOO_LONG: &str = "Name must be at most 128 characters";

pub const MSG_USERNAME_SHAPE: &str = "Username must be between 1 and 64 characters";

pub const MSG_PASSWORD_SHAPE: &str = "Password must be between 1 and 1024 bytes";

/// Display names, in characters
pub const MAX_DISPLAY_NAME_CHARS: usize = 128;

/// Usernames, in characters
pub const MAX_USERNAME_CHARS: usize = 64;

/// Service name reported by the health endpoint and telemetry
pub const SERVICE_NAME: &str = "appstore-auth";

/// Health status: success
pub const STATUS_OK: &str = "ok";

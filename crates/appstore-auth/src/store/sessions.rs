//! Session store
//!
//! At most [`MAX_SESSIONS_PER_ACCOUNT`] sessions live per account. Creation
//! counts, evicts the least recently seen session if the account is at the
//! cap, then inserts. Callers must run [`create`] inside one transaction
//! (see [`super::Database::transact`]) so the three steps are atomic.

use rand::Rng;
use rand::rngs::OsRng;
use rusqlite::{Connection, OptionalExtension, params};

use super::Result;
use super::accounts::AccountId;

pub const MAX_SESSIONS_PER_ACCOUNT: i64 = 5;

pub const SESSION_KEY_LEN: usize = 50;

const SESSION_KEY_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ-_";

/// Opaque bearer token identifying a session
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey(String);

impl SessionKey {
    /// Draw a fresh key from the OS random source.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = OsRng;
        let key = (0..SESSION_KEY_LEN)
            .map(|_| char::from(SESSION_KEY_ALPHABET[rng.gen_range(0..SESSION_KEY_ALPHABET.len())]))
            .collect();
        Self(key)
    }

    /// Wrap a key presented by a client. No validation is done; unknown keys
    /// simply fail to resolve.
    #[must_use]
    pub fn from_client(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey([REDACTED])")
    }
}

/// Upstream credentials kept alongside an SSO session
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SessionSideData {
    pub access_token: Option<String>,
    /// Absolute expiry of the access token, Unix seconds
    pub access_token_expires_at: Option<i64>,
}

impl std::fmt::Debug for SessionSideData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSideData")
            .field("has_access_token", &self.access_token.is_some())
            .field("access_token_expires_at", &self.access_token_expires_at)
            .finish()
    }
}

/// Result of creating a session
#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub key: SessionKey,
    /// Number of sessions evicted to make room (0 or 1)
    pub evicted: usize,
}

/// Issue a new session for `account`, evicting the least recently seen one
/// when the account already holds the maximum.
pub fn create(
    conn: &Connection,
    account: AccountId,
    side: &SessionSideData,
    now_ms: i64,
) -> Result<CreatedSession> {
    let live: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sessions WHERE account_id = ?1",
        params![account.0],
        |row| row.get(0),
    )?;

    let mut evicted = 0;
    if live >= MAX_SESSIONS_PER_ACCOUNT {
        // rowid breaks ties between sessions seen in the same millisecond
        evicted = conn.execute(
            "DELETE FROM sessions WHERE rowid = (
                SELECT rowid FROM sessions WHERE account_id = ?1
                ORDER BY last_seen ASC, rowid ASC LIMIT 1
            )",
            params![account.0],
        )?;
        tracing::debug!(account_id = %account, live, "Evicted least recently seen session");
    }

    let key = SessionKey::generate();
    conn.execute(
        "INSERT INTO sessions (session_key, account_id, created_at, last_seen, access_token, access_token_expires_at)
         VALUES (?1, ?2, ?3, ?3, ?4, ?5)",
        params![
            key.as_str(),
            account.0,
            now_ms,
            side.access_token,
            side.access_token_expires_at
        ],
    )?;

    Ok(CreatedSession { key, evicted })
}

/// Map a session key to its account. Does not update last-seen.
pub fn resolve(conn: &Connection, key: &SessionKey) -> Result<Option<AccountId>> {
    Ok(conn
        .query_row(
            "SELECT account_id FROM sessions WHERE session_key = ?1",
            params![key.as_str()],
            |row| row.get(0).map(AccountId),
        )
        .optional()?)
}

/// Record use of a session. Returns `false` if the key is unknown.
pub fn touch(conn: &Connection, key: &SessionKey, now_ms: i64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE sessions SET last_seen = MAX(last_seen, ?1) WHERE session_key = ?2",
        params![now_ms, key.as_str()],
    )?;
    Ok(changed == 1)
}

/// Delete a session. Returns `false` if the key is unknown.
pub fn delete(conn: &Connection, key: &SessionKey) -> Result<bool> {
    let changed = conn.execute(
        "DELETE FROM sessions WHERE session_key = ?1",
        params![key.as_str()],
    )?;
    Ok(changed == 1)
}

pub fn count(conn: &Connection, account: AccountId) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM sessions WHERE account_id = ?1",
        params![account.0],
        |row| row.get(0),
    )?)
}

pub fn side_data(conn: &Connection, key: &SessionKey) -> Result<Option<SessionSideData>> {
    Ok(conn
        .query_row(
            "SELECT access_token, access_token_expires_at FROM sessions WHERE session_key = ?1",
            params![key.as_str()],
            |row| {
                Ok(SessionSideData {
                    access_token: row.get(0)?,
                    access_token_expires_at: row.get(1)?,
                })
            },
        )
        .optional()?)
}

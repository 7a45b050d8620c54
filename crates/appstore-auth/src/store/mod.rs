//! SQLite persistence for accounts, sessions and login attempts
//!
//! All access goes through [`Database::transact`], which runs a closure as one
//! `IMMEDIATE` transaction on the blocking pool. SQLite takes the write lock at
//! `BEGIN IMMEDIATE`, so read-then-write sequences inside one unit of work
//! (session count, evict, insert) are serialized against each other.

pub mod accounts;
pub mod attempts;
mod error;
pub mod sessions;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rusqlite::{Connection, Transaction, TransactionBehavior};

pub use error::StoreError;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Extra time granted past the deadline before the caller stops waiting.
/// The worker itself rolls back at the deadline; this only covers the commit.
const COMMIT_GRACE: Duration = Duration::from_secs(1);

pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL CHECK (kind IN ('sso', 'local')),
    provider TEXT,
    subject TEXT,
    username TEXT UNIQUE,
    password_hash TEXT,
    display_name TEXT NOT NULL DEFAULT '',
    disabled INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    UNIQUE (provider, subject),
    CHECK (
        (kind = 'sso' AND provider IS NOT NULL AND subject IS NOT NULL
            AND username IS NULL AND password_hash IS NULL)
        OR
        (kind = 'local' AND username IS NOT NULL AND password_hash IS NOT NULL
            AND provider IS NULL AND subject IS NULL)
    )
);

CREATE TABLE IF NOT EXISTS sessions (
    session_key TEXT PRIMARY KEY,
    account_id INTEGER NOT NULL REFERENCES accounts(id),
    created_at INTEGER NOT NULL,
    last_seen INTEGER NOT NULL,
    access_token TEXT,
    access_token_expires_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_sessions_account ON sessions(account_id, last_seen);

CREATE TABLE IF NOT EXISTS login_attempts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER REFERENCES accounts(id),
    origin TEXT NOT NULL,
    success INTEGER NOT NULL,
    attempted_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_attempts_account ON login_attempts(account_id, attempted_at);
CREATE INDEX IF NOT EXISTS idx_attempts_origin ON login_attempts(origin, attempted_at);
";

/// Current time in milliseconds since the Unix epoch.
#[must_use]
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

/// Shared handle to the auth database
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    timeout: Duration,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open (or create) the database file and bring the schema up to date.
    pub fn open(path: &Path, timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        tracing::info!(path = %path.display(), "Opened auth database");
        Self::init(conn, timeout)
    }

    /// Private in-memory database, used by tests and throwaway deployments.
    pub fn open_in_memory(timeout: Duration) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, timeout)
    }

    fn init(conn: Connection, timeout: Duration) -> Result<Self> {
        conn.busy_timeout(timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            timeout,
        })
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `work` as a single transaction with the default deadline.
    pub async fn transact<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
    {
        self.transact_within(self.timeout, work).await
    }

    /// Run `work` as a single transaction that must reach commit within
    /// `timeout`. Any error from `work`, or a deadline that passes before
    /// commit, rolls the whole transaction back.
    pub async fn transact_within<T, F>(&self, timeout: Duration, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
    {
        let deadline = Instant::now() + timeout;
        let conn = Arc::clone(&self.conn);

        let handle = tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .try_lock_for(deadline.saturating_duration_since(Instant::now()))
                .ok_or(StoreError::Timeout(timeout))?;

            let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = work(&tx)?;

            if Instant::now() >= deadline {
                // Dropping the transaction rolls it back
                tracing::warn!(?timeout, "Storage deadline passed before commit; rolled back");
                return Err(StoreError::Timeout(timeout));
            }
            tx.commit()?;
            Ok(value)
        });

        match tokio::time::timeout(timeout + COMMIT_GRACE, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(StoreError::Worker(join.to_string())),
            Err(_) => Err(StoreError::Timeout(timeout)),
        }
    }
}

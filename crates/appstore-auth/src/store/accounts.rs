//! Account directory
//!
//! One table holds both account kinds. Uniqueness of `(provider, subject)` and
//! of `username` is enforced by SQLite constraints, so concurrent first logins
//! cannot create duplicates.

use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{Result, StoreError, unix_millis};

/// Internal account identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(pub i64);

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// How an account authenticates
#[derive(Clone, PartialEq, Eq)]
pub enum AccountKind {
    SsoLinked { provider: String, subject: String },
    LocalCredential { username: String, password_hash: String },
}

impl std::fmt::Debug for AccountKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SsoLinked { provider, subject } => f
                .debug_struct("SsoLinked")
                .field("provider", provider)
                .field("subject", subject)
                .finish(),
            Self::LocalCredential { username, .. } => f
                .debug_struct("LocalCredential")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub display_name: String,
    pub kind: AccountKind,
    pub disabled: bool,
}

impl Account {
    /// Local username, if this is a local-credential account
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        match &self.kind {
            AccountKind::LocalCredential { username, .. } => Some(username),
            AccountKind::SsoLinked { .. } => None,
        }
    }
}

const SELECT_ACCOUNT: &str =
    "SELECT id, kind, provider, subject, username, password_hash, display_name, disabled FROM accounts";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    let kind: String = row.get(1)?;
    let kind = match (
        kind.as_str(),
        row.get::<_, Option<String>>(2)?,
        row.get::<_, Option<String>>(3)?,
        row.get::<_, Option<String>>(4)?,
        row.get::<_, Option<String>>(5)?,
    ) {
        ("sso", Some(provider), Some(subject), _, _) => AccountKind::SsoLinked { provider, subject },
        ("local", _, _, Some(username), Some(password_hash)) => AccountKind::LocalCredential {
            username,
            password_hash,
        },
        _ => {
            return Err(rusqlite::Error::InvalidColumnType(
                1,
                "kind".into(),
                rusqlite::types::Type::Text,
            ));
        }
    };

    Ok(Account {
        id: AccountId(row.get(0)?),
        display_name: row.get(6)?,
        kind,
        disabled: row.get(7)?,
    })
}

fn query_one(conn: &Connection, clause: &str, params: impl rusqlite::Params) -> Result<Option<Account>> {
    let sql = format!("{SELECT_ACCOUNT} WHERE {clause}");
    Ok(conn.query_row(&sql, params, from_row).optional()?)
}

pub fn get(conn: &Connection, id: AccountId) -> Result<Option<Account>> {
    query_one(conn, "id = ?1", params![id.0])
}

/// Look up a local account by exact (case-sensitive) username.
pub fn find_by_username(conn: &Connection, username: &str) -> Result<Option<Account>> {
    query_one(conn, "username = ?1", params![username])
}

pub fn find_by_subject(conn: &Connection, provider: &str, subject: &str) -> Result<Option<Account>> {
    query_one(conn, "provider = ?1 AND subject = ?2", params![provider, subject])
}

/// Return the account linked to `(provider, subject)`, creating it on first
/// sight. The display name is only set at creation.
///
/// Returns the account and whether it was created by this call.
pub fn find_or_create_sso(
    conn: &Connection,
    provider: &str,
    subject: &str,
    display_name: &str,
) -> Result<(Account, bool)> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO accounts (kind, provider, subject, display_name, created_at)
         VALUES ('sso', ?1, ?2, ?3, ?4)",
        params![provider, subject, display_name, unix_millis()],
    )?;

    let account = find_by_subject(conn, provider, subject)?.ok_or_else(|| {
        StoreError::Corrupt(format!("account for {provider}/{subject} vanished after insert"))
    })?;
    Ok((account, inserted == 1))
}

/// Create a local account. A taken username yields [`StoreError::DuplicateUsername`].
pub fn register_local(
    conn: &Connection,
    username: &str,
    password_hash: &str,
    display_name: &str,
) -> Result<AccountId> {
    let result = conn.execute(
        "INSERT INTO accounts (kind, username, password_hash, display_name, created_at)
         VALUES ('local', ?1, ?2, ?3, ?4)",
        params![username, password_hash, display_name, unix_millis()],
    );

    match result {
        Ok(_) => Ok(AccountId(conn.last_insert_rowid())),
        Err(e) => {
            let err = StoreError::from(e);
            if err.is_constraint_violation() {
                Err(StoreError::DuplicateUsername)
            } else {
                Err(err)
            }
        }
    }
}

pub fn update_display_name(conn: &Connection, id: AccountId, display_name: &str) -> Result<()> {
    let changed = conn.execute(
        "UPDATE accounts SET display_name = ?1 WHERE id = ?2",
        params![display_name, id.0],
    )?;
    if changed == 0 {
        return Err(StoreError::AccountNotFound(id.0));
    }
    Ok(())
}

/// Replace the stored hash of a local account.
pub fn update_password_hash(conn: &Connection, id: AccountId, password_hash: &str) -> Result<()> {
    let changed = conn.execute(
        "UPDATE accounts SET password_hash = ?1 WHERE id = ?2 AND kind = 'local'",
        params![password_hash, id.0],
    )?;
    if changed == 0 {
        return Err(StoreError::AccountNotFound(id.0));
    }
    Ok(())
}

/// Flip the disabled flag. Accounts are never deleted.
pub fn set_disabled(conn: &Connection, id: AccountId, disabled: bool) -> Result<()> {
    let changed = conn.execute(
        "UPDATE accounts SET disabled = ?1 WHERE id = ?2",
        params![disabled, id.0],
    )?;
    if changed == 0 {
        return Err(StoreError::AccountNotFound(id.0));
    }
    Ok(())
}

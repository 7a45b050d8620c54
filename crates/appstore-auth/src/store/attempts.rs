//! Login attempt records
//!
//! Append-only. Old rows are never deleted; queries only look at the trailing
//! window they are given.

use rusqlite::{Connection, params};

use super::Result;
use super::accounts::AccountId;

/// Row id of a recorded attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptId(i64);

/// Append one attempt. `account` is `None` when the username did not resolve.
pub fn record(
    conn: &Connection,
    account: Option<AccountId>,
    origin: &str,
    success: bool,
    at_ms: i64,
) -> Result<AttemptId> {
    conn.execute(
        "INSERT INTO login_attempts (account_id, origin, success, attempted_at) VALUES (?1, ?2, ?3, ?4)",
        params![account.map(|a| a.0), origin, success, at_ms],
    )?;
    Ok(AttemptId(conn.last_insert_rowid()))
}

/// Flip a previously recorded attempt to successful.
pub fn mark_succeeded(conn: &Connection, attempt: AttemptId) -> Result<()> {
    conn.execute(
        "UPDATE login_attempts SET success = 1 WHERE id = ?1",
        params![attempt.0],
    )?;
    Ok(())
}

/// Attempts against `account` at or after `since_ms`
pub fn count_for_account_since(conn: &Connection, account: AccountId, since_ms: i64) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM login_attempts WHERE account_id = ?1 AND attempted_at >= ?2",
        params![account.0, since_ms],
        |row| row.get(0),
    )?)
}

/// Attempts from `origin` at or after `since_ms`
pub fn count_for_origin_since(conn: &Connection, origin: &str, since_ms: i64) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM login_attempts WHERE origin = ?1 AND attempted_at >= ?2",
        params![origin, since_ms],
        |row| row.get(0),
    )?)
}

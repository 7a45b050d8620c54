//! Brute-force guard for password logins
//!
//! Advisory only: a positive answer means the caller must pass a CAPTCHA
//! before the login proceeds. The guard never rejects anything by itself.

use std::time::Duration;

use rusqlite::Connection;

use crate::store::accounts::AccountId;
use crate::store::attempts::{self, AttemptId};
use crate::store;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);
pub const DEFAULT_THRESHOLD: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BruteForceGuard {
    window: Duration,
    threshold: u32,
}

impl Default for BruteForceGuard {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_THRESHOLD)
    }
}

impl BruteForceGuard {
    #[must_use]
    pub const fn new(window: Duration, threshold: u32) -> Self {
        Self { window, threshold }
    }

    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    #[must_use]
    pub const fn threshold(&self) -> u32 {
        self.threshold
    }

    fn window_start(&self, now_ms: i64) -> i64 {
        let window_ms = i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_sub(window_ms)
    }

    /// Whether either the account or the origin has more than `threshold`
    /// attempts inside the trailing window. Unknown accounts are judged on the
    /// origin alone.
    pub fn is_rate_limited(
        &self,
        conn: &Connection,
        account: Option<AccountId>,
        origin: &str,
        now_ms: i64,
    ) -> store::Result<bool> {
        let since = self.window_start(now_ms);
        let threshold = i64::from(self.threshold);

        let by_account = match account {
            Some(id) => attempts::count_for_account_since(conn, id, since)?,
            None => 0,
        };
        let by_origin = attempts::count_for_origin_since(conn, origin, since)?;

        let limited = by_account > threshold || by_origin > threshold;
        if limited {
            tracing::warn!(
                account_id = account.map(|a| a.0),
                origin,
                by_account,
                by_origin,
                threshold,
                "Login rate limit reached; CAPTCHA required"
            );
        }
        Ok(limited)
    }

    /// Record an attempt so the next evaluation includes it.
    pub fn record(
        &self,
        conn: &Connection,
        account: Option<AccountId>,
        origin: &str,
        success: bool,
        now_ms: i64,
    ) -> store::Result<()> {
        attempts::record(conn, account, origin, success, now_ms)?;
        Ok(())
    }

    /// Judge an attempt and record it as failed in one step.
    ///
    /// Run inside one transaction, so concurrent callers are serialised and
    /// each decision sees every attempt admitted before it. A login that goes
    /// on to succeed calls [`settle`](Self::settle) with the returned id.
    pub fn admit(
        &self,
        conn: &Connection,
        account: Option<AccountId>,
        origin: &str,
        now_ms: i64,
    ) -> store::Result<Admission> {
        let limited = self.is_rate_limited(conn, account, origin, now_ms)?;
        let attempt = attempts::record(conn, account, origin, false, now_ms)?;
        Ok(Admission { limited, attempt })
    }

    /// Mark an admitted attempt as successful.
    pub fn settle(&self, conn: &Connection, attempt: AttemptId) -> store::Result<()> {
        attempts::mark_succeeded(conn, attempt)
    }
}

/// Result of [`BruteForceGuard::admit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// A CAPTCHA must pass before the login proceeds
    pub limited: bool,
    /// The already recorded attempt
    pub attempt: AttemptId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::accounts;

    const HOUR_MS: i64 = 3_600_000;

    fn setup() -> (Connection, AccountId) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(crate::store::SCHEMA).unwrap();
        let id = accounts::register_local(&conn, "alice", "h", "").unwrap();
        (conn, id)
    }

    fn fail_n(guard: &BruteForceGuard, conn: &Connection, id: Option<AccountId>, origin: &str, n: usize, at: i64) {
        for _ in 0..n {
            guard.record(conn, id, origin, false, at).unwrap();
        }
    }

    #[test]
    fn test_nine_failures_not_limited() {
        let (conn, id) = setup();
        let guard = BruteForceGuard::default();
        fail_n(&guard, &conn, Some(id), "1.2.3.4", 9, 10 * HOUR_MS);
        assert!(!guard.is_rate_limited(&conn, Some(id), "1.2.3.4", 10 * HOUR_MS).unwrap());
    }

    #[test]
    fn test_ten_failures_is_boundary_eleven_limits() {
        let (conn, id) = setup();
        let guard = BruteForceGuard::default();
        fail_n(&guard, &conn, Some(id), "1.2.3.4", 10, 10 * HOUR_MS);
        assert!(!guard.is_rate_limited(&conn, Some(id), "1.2.3.4", 10 * HOUR_MS).unwrap());
        fail_n(&guard, &conn, Some(id), "1.2.3.4", 1, 10 * HOUR_MS);
        assert!(guard.is_rate_limited(&conn, Some(id), "1.2.3.4", 10 * HOUR_MS).unwrap());
    }

    #[test]
    fn test_account_limit_applies_from_any_origin() {
        let (conn, id) = setup();
        let guard = BruteForceGuard::default();
        for i in 0..11 {
            guard.record(&conn, Some(id), &format!("10.0.0.{i}"), false, HOUR_MS).unwrap();
        }
        assert!(guard.is_rate_limited(&conn, Some(id), "192.168.1.1", HOUR_MS).unwrap());
    }

    #[test]
    fn test_origin_limit_applies_to_unknown_accounts() {
        let (conn, id) = setup();
        let guard = BruteForceGuard::default();
        fail_n(&guard, &conn, None, "6.6.6.6", 11, HOUR_MS);
        assert!(guard.is_rate_limited(&conn, None, "6.6.6.6", HOUR_MS).unwrap());
        assert!(guard.is_rate_limited(&conn, Some(id), "6.6.6.6", HOUR_MS).unwrap());
        assert!(!guard.is_rate_limited(&conn, Some(id), "7.7.7.7", HOUR_MS).unwrap());
    }

    #[test]
    fn test_window_slides() {
        let (conn, id) = setup();
        let guard = BruteForceGuard::default();
        fail_n(&guard, &conn, Some(id), "1.2.3.4", 11, HOUR_MS);
        assert!(guard.is_rate_limited(&conn, Some(id), "1.2.3.4", 2 * HOUR_MS).unwrap());
        assert!(!guard.is_rate_limited(&conn, Some(id), "1.2.3.4", 2 * HOUR_MS + 1).unwrap());
    }

    #[test]
    fn test_admit_counts_itself_for_the_next_caller() {
        let (conn, id) = setup();
        let guard = BruteForceGuard::default();

        let verdicts: Vec<bool> = (0..12)
            .map(|_| guard.admit(&conn, Some(id), "1.2.3.4", HOUR_MS).unwrap().limited)
            .collect();

        // Eleven admitted before the twelfth pushes the count over ten
        assert!(verdicts[..11].iter().all(|limited| !limited));
        assert!(verdicts[11]);
        assert_eq!(attempts::count_for_account_since(&conn, id, 0).unwrap(), 12);
    }

    #[test]
    fn test_settle_keeps_attempt_counted() {
        let (conn, id) = setup();
        let guard = BruteForceGuard::new(DEFAULT_WINDOW, 1);

        let first = guard.admit(&conn, Some(id), "1.2.3.4", 0).unwrap();
        guard.settle(&conn, first.attempt).unwrap();
        assert!(!guard.admit(&conn, Some(id), "1.2.3.4", 0).unwrap().limited);
        assert!(guard.admit(&conn, Some(id), "1.2.3.4", 0).unwrap().limited);
    }

    #[test]
    fn test_successes_count_too() {
        let (conn, id) = setup();
        let guard = BruteForceGuard::new(DEFAULT_WINDOW, 2);
        for _ in 0..3 {
            guard.record(&conn, Some(id), "1.2.3.4", true, 0).unwrap();
        }
        assert!(guard.is_rate_limited(&conn, Some(id), "1.2.3.4", 0).unwrap());
    }
}

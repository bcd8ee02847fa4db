//! Referral Ledger v0.3.0
//!
//! Owns the `referral_codes` and `referrals` tables of the marketplace
//! database. Each user has one stable code; every redemption creates its own
//! referral row, so a referrer can collect any number of referrals.
//!
//! Record lifecycle: Pending (on redeem) → Completed (on confirmation). There
//! is no path back and no expiry.

use crate::error::{Result, RewardsError};
use crate::facts::{from_unix, to_unix, SqliteFactStore};
use crate::types::UserId;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

const CODE_PREFIX: &str = "USER";
const CODE_BODY_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferralStatus {
    Pending,
    Completed,
}

impl ReferralStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferralStatus::Pending => "pending",
            ReferralStatus::Completed => "completed",
        }
    }

    fn from_column(raw: &str) -> Self {
        if raw == "completed" {
            ReferralStatus::Completed
        } else {
            ReferralStatus::Pending
        }
    }
}

impl fmt::Display for ReferralStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One referral edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralRecord {
    pub referrer_id: UserId,
    pub referred_id: UserId,
    pub code: String,
    pub status: ReferralStatus,
    /// Reward paid to the referrer, minor units; 0 while pending
    pub reward_cents: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Canonical code for a user: `USER` + first 8 characters, uppercased
pub fn code_for_user(user_id: &str) -> String {
    let body: String = user_id
        .chars()
        .take(CODE_BODY_LEN)
        .collect::<String>()
        .to_uppercase();
    format!("{}{}", CODE_PREFIX, body)
}

fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

fn is_constraint(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Writes referral codes and records
pub struct ReferralLedger {
    conn: Arc<Mutex<Connection>>,
}

impl ReferralLedger {
    /// Share the fact store's connection; the tables live in the same database
    pub fn new(store: &SqliteFactStore) -> Self {
        Self { conn: store.conn() }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stored code for `user_id`, without creating one
    pub fn existing_code(&self, user_id: &str) -> Result<Option<String>> {
        let conn = self.lock();
        Ok(Self::lookup_code(&conn, user_id)?)
    }

    fn lookup_code(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<String>> {
        conn.query_row(
            "SELECT code FROM referral_codes WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()
    }

    /// Code for `user_id`, created on first call and stable afterwards.
    ///
    /// Two ids sharing their first 8 characters would map to the same code;
    /// the later one gets a numeric suffix.
    pub fn referral_code(&self, user_id: &str) -> Result<String> {
        if user_id.trim().is_empty() {
            return Err(RewardsError::not_found("user", user_id));
        }

        let conn = self.lock();
        if let Some(code) = Self::lookup_code(&conn, user_id)? {
            return Ok(code);
        }

        let base = code_for_user(user_id);
        let now = to_unix(Utc::now());
        let mut suffix = 1u32;
        loop {
            let candidate = if suffix == 1 {
                base.clone()
            } else {
                format!("{}{}", base, suffix)
            };

            match conn.execute(
                "INSERT INTO referral_codes (user_id, code, created_at) VALUES (?1, ?2, ?3)",
                params![user_id, &candidate, now],
            ) {
                Ok(_) => {
                    info!("Referral code {} issued to {}", candidate, user_id);
                    return Ok(candidate);
                }
                Err(e) if is_constraint(&e) => {
                    // Lost a race for our own row, or the code belongs to someone else
                    if let Some(code) = Self::lookup_code(&conn, user_id)? {
                        return Ok(code);
                    }
                    suffix += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Redeem `code` on behalf of `referred_id`, creating a Pending record
    pub fn redeem(&self, code: &str, referred_id: &str) -> Result<ReferralRecord> {
        if referred_id.trim().is_empty() {
            return Err(RewardsError::not_found("user", referred_id));
        }
        let code = normalize_code(code);
        let conn = self.lock();

        let referrer_id: String = conn
            .query_row(
                "SELECT user_id FROM referral_codes WHERE code = ?1",
                params![&code],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| RewardsError::not_found("referral code", &code))?;

        if referrer_id == referred_id {
            return Err(RewardsError::ReferralRejected(
                "users cannot redeem their own code".to_string(),
            ));
        }

        let now = Utc::now();
        let inserted = conn.execute(
            "INSERT INTO referrals (referrer_id, referred_id, code, status, reward_cents, created_at)
             VALUES (?1, ?2, ?3, 'pending', 0, ?4)",
            params![&referrer_id, referred_id, &code, to_unix(now)],
        );

        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint(&e) => {
                return Err(RewardsError::ReferralRejected(format!(
                    "user {} has already been referred",
                    referred_id
                )));
            }
            Err(e) => return Err(e.into()),
        }

        info!("Referral {} -> {} recorded as pending", referrer_id, referred_id);
        Ok(ReferralRecord {
            referrer_id,
            referred_id: referred_id.to_string(),
            code,
            status: ReferralStatus::Pending,
            reward_cents: 0,
            created_at: from_unix(to_unix(now)),
            completed_at: None,
        })
    }

    /// Confirm the pending referral of `referred_id` and record the reward
    pub fn complete(&self, referred_id: &str, reward_cents: u64) -> Result<ReferralRecord> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE referrals SET status = 'completed', reward_cents = ?2, completed_at = ?3
             WHERE referred_id = ?1 AND status = 'pending'",
            params![referred_id, reward_cents as i64, to_unix(Utc::now())],
        )?;

        let record = Self::record_for(&conn, referred_id)?
            .ok_or_else(|| RewardsError::not_found("referral", referred_id))?;

        if changed == 0 {
            return Err(RewardsError::ReferralRejected(format!(
                "referral of {} is already {}",
                referred_id, record.status
            )));
        }

        info!(
            "Referral {} -> {} completed, reward {}",
            record.referrer_id, record.referred_id, record.reward_cents
        );
        Ok(record)
    }

    /// The record where `referred_id` was referred, if any
    pub fn get(&self, referred_id: &str) -> Result<Option<ReferralRecord>> {
        let conn = self.lock();
        Ok(Self::record_for(&conn, referred_id)?)
    }

    /// All records created through `referrer_id`'s code, oldest first
    pub fn list_by_referrer(&self, referrer_id: &str) -> Result<Vec<ReferralRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT referrer_id, referred_id, code, status, reward_cents, created_at, completed_at
             FROM referrals WHERE referrer_id = ?1 ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![referrer_id], Self::map_record)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn record_for(conn: &Connection, referred_id: &str) -> rusqlite::Result<Option<ReferralRecord>> {
        conn.query_row(
            "SELECT referrer_id, referred_id, code, status, reward_cents, created_at, completed_at
             FROM referrals WHERE referred_id = ?1",
            params![referred_id],
            Self::map_record,
        )
        .optional()
    }

    fn map_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReferralRecord> {
        let status: String = row.get(3)?;
        let completed_at: Option<i64> = row.get(6)?;
        Ok(ReferralRecord {
            referrer_id: row.get(0)?,
            referred_id: row.get(1)?,
            code: row.get(2)?,
            status: ReferralStatus::from_column(&status),
            reward_cents: row.get::<_, i64>(4)?.max(0) as u64,
            created_at: from_unix(row.get(5)?),
            completed_at: completed_at.and_then(from_unix),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::FactStore;

    fn ledger() -> (SqliteFactStore, ReferralLedger) {
        let store = SqliteFactStore::open_in_memory().unwrap();
        let ledger = ReferralLedger::new(&store);
        (store, ledger)
    }

    #[test]
    fn test_code_format() {
        assert_eq!(code_for_user("abcdef123456"), "USERABCDEF12");
        assert_eq!(code_for_user("bob"), "USERBOB");
    }

    #[test]
    fn test_code_is_stable() {
        let (_store, ledger) = ledger();
        assert_eq!(ledger.existing_code("alice").unwrap(), None);
        let first = ledger.referral_code("alice").unwrap();
        let second = ledger.referral_code("alice").unwrap();
        assert_eq!(first, "USERALICE");
        assert_eq!(first, second);
        assert_eq!(ledger.existing_code("alice").unwrap(), Some(first));
    }

    #[test]
    fn test_colliding_prefixes_get_distinct_codes() {
        let (_store, ledger) = ledger();
        let a = ledger.referral_code("alexander-1").unwrap();
        let b = ledger.referral_code("alexander-2").unwrap();
        assert_ne!(a, b);
        assert_eq!(a, "USERALEXANDE");
        assert_eq!(b, "USERALEXANDE2");
    }

    #[test]
    fn test_redeem_creates_pending_and_counts_as_edge() {
        let (store, ledger) = ledger();
        let code = ledger.referral_code("alice").unwrap();

        let record = ledger.redeem(&code.to_lowercase(), "carol").unwrap();
        assert_eq!(record.referrer_id, "alice");
        assert_eq!(record.status, ReferralStatus::Pending);

        ledger.redeem(&code, "dave").unwrap();
        assert_eq!(store.referral_edges("alice").unwrap(), 2);
        assert_eq!(store.referral_totals("alice").unwrap().completed, 0);
    }

    #[test]
    fn test_redeem_rejections() {
        let (_store, ledger) = ledger();
        let code = ledger.referral_code("alice").unwrap();

        let unknown = ledger.redeem("USERNOBODY", "carol").unwrap_err();
        assert!(unknown.is_not_found());

        let own = ledger.redeem(&code, "alice").unwrap_err();
        assert!(matches!(own, RewardsError::ReferralRejected(_)));

        ledger.redeem(&code, "carol").unwrap();
        let bob_code = ledger.referral_code("bob").unwrap();
        let twice = ledger.redeem(&bob_code, "carol").unwrap_err();
        assert!(matches!(twice, RewardsError::ReferralRejected(_)));
        assert_eq!(ledger.get("carol").unwrap().unwrap().referrer_id, "alice");
    }

    #[test]
    fn test_redeem_blank_referred_user() {
        let (store, ledger) = ledger();
        let code = ledger.referral_code("alice").unwrap();

        for blank in ["", "   ", "\t"] {
            assert!(ledger.redeem(&code, blank).unwrap_err().is_not_found());
        }
        assert_eq!(store.referral_edges("alice").unwrap(), 0);
        assert!(ledger.list_by_referrer("alice").unwrap().is_empty());
    }

    #[test]
    fn test_complete_moves_forward_only() {
        let (store, ledger) = ledger();
        let code = ledger.referral_code("alice").unwrap();
        ledger.redeem(&code, "carol").unwrap();

        let done = ledger.complete("carol", 1_000).unwrap();
        assert_eq!(done.status, ReferralStatus::Completed);
        assert_eq!(done.reward_cents, 1_000);
        assert!(done.completed_at.is_some());

        let again = ledger.complete("carol", 9_999).unwrap_err();
        assert!(matches!(again, RewardsError::ReferralRejected(_)));
        assert_eq!(ledger.get("carol").unwrap().unwrap().reward_cents, 1_000);

        let totals = store.referral_totals("alice").unwrap();
        assert_eq!(totals.completed, 1);
        assert_eq!(totals.earnings_cents, 1_000);
    }

    #[test]
    fn test_complete_unknown_is_not_found() {
        let (_store, ledger) = ledger();
        assert!(ledger.complete("ghost", 100).unwrap_err().is_not_found());
    }

    #[test]
    fn test_list_by_referrer() {
        let (_store, ledger) = ledger();
        let code = ledger.referral_code("alice").unwrap();
        ledger.redeem(&code, "carol").unwrap();
        ledger.redeem(&code, "dave").unwrap();
        let records = ledger.list_by_referrer("alice").unwrap();
        let referred: Vec<&str> = records.iter().map(|r| r.referred_id.as_str()).collect();
        assert_eq!(referred, vec!["carol", "dave"]);
        assert!(ledger.list_by_referrer("bob").unwrap().is_empty());
    }
}

//! Unlock Registry v0.4.0
//!
//! Durable store of per-(user, achievement) progress rows and the one-time
//! unlock transition.
//!
//! ## Write rule
//!
//! An upsert applies only when the new value strictly exceeds the stored one,
//! or when it meets the target and the row is still locked. Rows are created
//! on first evaluation, never deleted, and `unlocked` never goes back to false.
//!
//! ## Concurrency
//!
//! [`SqliteUnlockRegistry`] uses optimistic compare-and-set: the UPDATE is
//! conditioned on the previously read `(progress_value, unlocked)`. A lost race
//! or a busy database rolls back and retries with doubling backoff, up to
//! `max_attempts`, then returns `TransientStorage`.
//! [`MemoryUnlockRegistry`] serializes each pair behind a striped mutex.
//!
//! [`UnlockRegistry::upsert_batch`] applies all of one user's measurements as
//! a unit: either every row is written or none is.
//!
//! v0.3.0: unlocked_at stored as unix millis; CHECK constraint ties it to `unlocked`.
//! v0.4.0: Per-user batch writes in one transaction; pooled connections.

use crate::config::UnlockConfig;
use crate::error::{Result, RewardsError};
use crate::types::{AchievementId, AchievementProgress};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// Result of one upsert call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Row as stored after the call
    pub progress: AchievementProgress,
    /// This call performed the false → true transition
    pub newly_unlocked: bool,
    /// Anything was written
    pub changed: bool,
}

/// One measurement in a batch write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub achievement_id: AchievementId,
    pub progress_value: u64,
    pub target: u64,
}

/// Durable, idempotent progress store
pub trait UnlockRegistry: Send + Sync {
    /// Record a progress measurement; see the module docs for the write rule
    fn upsert_progress(
        &self,
        user_id: &str,
        achievement_id: &str,
        progress_value: u64,
        target: u64,
    ) -> Result<UpsertOutcome>;

    /// Record several measurements for one user atomically. Outcomes come
    /// back in input order. On error nothing from the batch is stored.
    fn upsert_batch(&self, user_id: &str, updates: &[ProgressUpdate]) -> Result<Vec<UpsertOutcome>>;

    fn get(&self, user_id: &str, achievement_id: &str) -> Result<Option<AchievementProgress>>;

    fn list_for_user(&self, user_id: &str) -> Result<Vec<AchievementProgress>>;
}

// ============================================================================
// Write decision (shared by both registries)
// ============================================================================

/// What an upsert should do given the stored row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Unchanged(AchievementProgress),
    Insert(AchievementProgress),
    Update {
        previous: AchievementProgress,
        next: AchievementProgress,
    },
}

/// Current time truncated to the millisecond precision the registry stores
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    Utc.timestamp_millis_opt(now.timestamp_millis())
        .single()
        .unwrap_or(now)
}

/// Pure write rule
pub fn decide(
    current: Option<&AchievementProgress>,
    user_id: &str,
    achievement_id: &str,
    progress_value: u64,
    target: u64,
    now: DateTime<Utc>,
) -> Decision {
    let target = target.max(1);

    let Some(row) = current else {
        let unlocked = progress_value >= target;
        return Decision::Insert(AchievementProgress {
            user_id: user_id.to_string(),
            achievement_id: achievement_id.to_string(),
            progress_value,
            target,
            unlocked,
            unlocked_at: unlocked.then_some(now),
        });
    };

    let crosses = !row.unlocked && progress_value >= target;
    let advances = progress_value > row.progress_value;
    if !crosses && !advances {
        return Decision::Unchanged(row.clone());
    }

    let mut next = row.clone();
    next.progress_value = row.progress_value.max(progress_value);
    next.target = target;
    if crosses {
        next.unlocked = true;
        next.unlocked_at = Some(now);
    }

    Decision::Update {
        previous: row.clone(),
        next,
    }
}

impl Decision {
    fn into_outcome(self) -> UpsertOutcome {
        match self {
            Decision::Unchanged(progress) => UpsertOutcome {
                progress,
                newly_unlocked: false,
                changed: false,
            },
            Decision::Insert(progress) => UpsertOutcome {
                newly_unlocked: progress.unlocked,
                progress,
                changed: true,
            },
            Decision::Update { previous, next } => UpsertOutcome {
                newly_unlocked: !previous.unlocked && next.unlocked,
                progress: next,
                changed: true,
            },
        }
    }
}

fn stripe(key: &str, extra: Option<&str>, len: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    if let Some(extra) = extra {
        extra.hash(&mut hasher);
    }
    (hasher.finish() as usize) % len.max(1)
}

// ============================================================================
// SQLite registry
// ============================================================================

/// SQLite stores signed 64-bit integers; larger counts saturate
fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// SQLite-backed registry with compare-and-set writes.
///
/// On-disk registries keep a small pool of WAL connections; a user always
/// maps to the same one. In-memory registries have a single connection.
pub struct SqliteUnlockRegistry {
    conns: Vec<Mutex<Connection>>,
    max_attempts: u32,
    base_backoff: Duration,
}

impl SqliteUnlockRegistry {
    /// Open or create the registry database at a specific path
    pub fn open(path: &Path, config: &UnlockConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let first = Connection::open(path)?;
        first.pragma_update(None, "journal_mode", "WAL")?;
        Self::prepare(&first, config)?;

        let mut conns = vec![Mutex::new(first)];
        for _ in 1..config.connections.max(1) {
            let conn = Connection::open(path)?;
            conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
            conns.push(Mutex::new(conn));
        }
        debug!("Unlock registry at {} with {} connections", path.display(), conns.len());
        Ok(Self::with_pool(conns, config))
    }

    pub fn open_in_memory(config: &UnlockConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::prepare(&conn, config)?;
        Ok(Self::with_pool(vec![Mutex::new(conn)], config))
    }

    fn prepare(conn: &Connection, config: &UnlockConfig) -> Result<()> {
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS achievement_progress (
                user_id TEXT NOT NULL,
                achievement_id TEXT NOT NULL,
                progress_value INTEGER NOT NULL,
                target INTEGER NOT NULL,
                unlocked INTEGER NOT NULL DEFAULT 0,
                unlocked_at INTEGER,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, achievement_id),
                CHECK ((unlocked = 1) = (unlocked_at IS NOT NULL))
            );
            "#,
        )?;
        Ok(())
    }

    fn with_pool(conns: Vec<Mutex<Connection>>, config: &UnlockConfig) -> Self {
        Self {
            conns,
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
        }
    }

    /// Connection serving `user_id`
    fn conn_for(&self, user_id: &str) -> MutexGuard<'_, Connection> {
        let idx = stripe(user_id, None, self.conns.len());
        self.conns[idx]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_row(
        conn: &Connection,
        user_id: &str,
        achievement_id: &str,
    ) -> rusqlite::Result<Option<AchievementProgress>> {
        conn.query_row(
            "SELECT user_id, achievement_id, progress_value, target, unlocked, unlocked_at
             FROM achievement_progress WHERE user_id = ?1 AND achievement_id = ?2",
            params![user_id, achievement_id],
            Self::map_row,
        )
        .optional()
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AchievementProgress> {
        let unlocked_at: Option<i64> = row.get(5)?;
        Ok(AchievementProgress {
            user_id: row.get(0)?,
            achievement_id: row.get(1)?,
            progress_value: row.get::<_, i64>(2)?.max(0) as u64,
            target: row.get::<_, i64>(3)?.max(1) as u64,
            unlocked: row.get::<_, i64>(4)? != 0,
            unlocked_at: unlocked_at.and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        })
    }

    /// Apply a decision. `Ok(false)` means the compare-and-set lost.
    fn write(conn: &Connection, decision: &Decision) -> rusqlite::Result<bool> {
        let now = Utc::now().timestamp_millis();
        match decision {
            Decision::Unchanged(_) => Ok(true),
            Decision::Insert(row) => {
                let changed = conn.execute(
                    "INSERT INTO achievement_progress
                        (user_id, achievement_id, progress_value, target, unlocked, unlocked_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(user_id, achievement_id) DO NOTHING",
                    params![
                        &row.user_id,
                        &row.achievement_id,
                        to_sql_int(row.progress_value),
                        to_sql_int(row.target),
                        row.unlocked as i64,
                        row.unlocked_at.map(|t| t.timestamp_millis()),
                        now,
                    ],
                )?;
                Ok(changed == 1)
            }
            Decision::Update { previous, next } => {
                let changed = conn.execute(
                    "UPDATE achievement_progress
                     SET progress_value = ?3, target = ?4, unlocked = ?5, unlocked_at = ?6, updated_at = ?7
                     WHERE user_id = ?1 AND achievement_id = ?2
                       AND progress_value = ?8 AND unlocked = ?9",
                    params![
                        &next.user_id,
                        &next.achievement_id,
                        to_sql_int(next.progress_value),
                        to_sql_int(next.target),
                        next.unlocked as i64,
                        next.unlocked_at.map(|t| t.timestamp_millis()),
                        now,
                        to_sql_int(previous.progress_value),
                        previous.unlocked as i64,
                    ],
                )?;
                Ok(changed == 1)
            }
        }
    }

    /// One read-decide-write round for the whole batch inside a single
    /// IMMEDIATE transaction. `Ok(None)` means a row moved underneath us and
    /// the transaction was rolled back.
    fn attempt(
        &self,
        user_id: &str,
        updates: &[ProgressUpdate],
    ) -> rusqlite::Result<Option<Vec<UpsertOutcome>>> {
        let mut conn = self.conn_for(user_id);
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_millis();

        let mut outcomes = Vec::with_capacity(updates.len());
        for update in updates {
            let current = Self::read_row(&tx, user_id, &update.achievement_id)?;
            let decision = decide(
                current.as_ref(),
                user_id,
                &update.achievement_id,
                update.progress_value,
                update.target,
                now,
            );
            if !Self::write(&tx, &decision)? {
                // Dropping the transaction rolls it back
                return Ok(None);
            }
            outcomes.push(decision.into_outcome());
        }

        tx.commit()?;
        Ok(Some(outcomes))
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt.saturating_sub(1).min(10))
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
    )
}

impl UnlockRegistry for SqliteUnlockRegistry {
    fn upsert_progress(
        &self,
        user_id: &str,
        achievement_id: &str,
        progress_value: u64,
        target: u64,
    ) -> Result<UpsertOutcome> {
        let update = ProgressUpdate {
            achievement_id: achievement_id.to_string(),
            progress_value,
            target,
        };
        self.upsert_batch(user_id, std::slice::from_ref(&update))?
            .pop()
            .ok_or_else(|| RewardsError::not_found("achievement progress", achievement_id))
    }

    fn upsert_batch(&self, user_id: &str, updates: &[ProgressUpdate]) -> Result<Vec<UpsertOutcome>> {
        if updates.is_empty() {
            return Ok(Vec::new());
        }
        let mut last_reason = String::from("write conflict");

        for attempt in 1..=self.max_attempts {
            match self.attempt(user_id, updates) {
                Ok(Some(outcomes)) => return Ok(outcomes),
                Ok(None) => {
                    last_reason = "write conflict".to_string();
                }
                Err(e) if is_busy(&e) => {
                    last_reason = e.to_string();
                }
                Err(e) => return Err(e.into()),
            }

            debug!(
                "Unlock write for {} ({} rows) lost attempt {}/{}: {}",
                user_id,
                updates.len(),
                attempt,
                self.max_attempts,
                last_reason
            );
            if attempt < self.max_attempts {
                std::thread::sleep(self.backoff(attempt));
            }
        }

        warn!(
            "Unlock write for {} gave up after {} attempts",
            user_id, self.max_attempts
        );
        Err(RewardsError::TransientStorage {
            attempts: self.max_attempts,
            reason: last_reason,
        })
    }

    fn get(&self, user_id: &str, achievement_id: &str) -> Result<Option<AchievementProgress>> {
        let conn = self.conn_for(user_id);
        Ok(Self::read_row(&conn, user_id, achievement_id)?)
    }

    fn list_for_user(&self, user_id: &str) -> Result<Vec<AchievementProgress>> {
        let conn = self.conn_for(user_id);
        let mut stmt = conn.prepare(
            "SELECT user_id, achievement_id, progress_value, target, unlocked, unlocked_at
             FROM achievement_progress WHERE user_id = ?1 ORDER BY achievement_id",
        )?;
        let rows = stmt.query_map(params![user_id], Self::map_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

// ============================================================================
// In-memory registry
// ============================================================================

const STRIPES: usize = 16;

type Key = (String, String);
type Shard = HashMap<Key, AchievementProgress>;

/// Process-local registry. Each (user, achievement) pair hashes to one of a
/// fixed set of mutex-guarded shards, so distinct pairs rarely contend.
pub struct MemoryUnlockRegistry {
    shards: Vec<Mutex<Shard>>,
}

impl Default for MemoryUnlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryUnlockRegistry {
    pub fn new() -> Self {
        Self {
            shards: (0..STRIPES).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard_index(&self, user_id: &str, achievement_id: &str) -> usize {
        stripe(user_id, Some(achievement_id), self.shards.len())
    }

    fn lock_shard(&self, idx: usize) -> MutexGuard<'_, Shard> {
        self.shards[idx]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn apply(
        shard: &mut Shard,
        user_id: &str,
        achievement_id: &str,
        progress_value: u64,
        target: u64,
        now: DateTime<Utc>,
    ) -> UpsertOutcome {
        let key = (user_id.to_string(), achievement_id.to_string());
        let decision = decide(shard.get(&key), user_id, achievement_id, progress_value, target, now);

        match &decision {
            Decision::Insert(row) | Decision::Update { next: row, .. } => {
                shard.insert(key, row.clone());
            }
            Decision::Unchanged(_) => {}
        }
        decision.into_outcome()
    }
}

impl UnlockRegistry for MemoryUnlockRegistry {
    fn upsert_progress(
        &self,
        user_id: &str,
        achievement_id: &str,
        progress_value: u64,
        target: u64,
    ) -> Result<UpsertOutcome> {
        let mut shard = self.lock_shard(self.shard_index(user_id, achievement_id));
        Ok(Self::apply(
            &mut shard,
            user_id,
            achievement_id,
            progress_value,
            target,
            now_millis(),
        ))
    }

    fn upsert_batch(&self, user_id: &str, updates: &[ProgressUpdate]) -> Result<Vec<UpsertOutcome>> {
        // Take every involved shard up front, in index order
        let wanted: BTreeSet<usize> = updates
            .iter()
            .map(|u| self.shard_index(user_id, &u.achievement_id))
            .collect();
        let mut held: BTreeMap<usize, MutexGuard<'_, Shard>> = wanted
            .into_iter()
            .map(|idx| (idx, self.lock_shard(idx)))
            .collect();

        let now = now_millis();
        let mut outcomes = Vec::with_capacity(updates.len());
        for update in updates {
            let idx = self.shard_index(user_id, &update.achievement_id);
            let Some(shard) = held.get_mut(&idx) else {
                continue;
            };
            outcomes.push(Self::apply(
                shard,
                user_id,
                &update.achievement_id,
                update.progress_value,
                update.target,
                now,
            ));
        }
        Ok(outcomes)
    }

    fn get(&self, user_id: &str, achievement_id: &str) -> Result<Option<AchievementProgress>> {
        let key = (user_id.to_string(), achievement_id.to_string());
        Ok(self
            .lock_shard(self.shard_index(user_id, achievement_id))
            .get(&key)
            .cloned())
    }

    fn list_for_user(&self, user_id: &str) -> Result<Vec<AchievementProgress>> {
        let mut out: Vec<AchievementProgress> = self
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .values()
                    .filter(|p| p.user_id == user_id)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        out.sort_by(|a, b| a.achievement_id.cmp(&b.achievement_id));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn registries() -> Vec<(&'static str, Box<dyn UnlockRegistry>)> {
        vec![
            ("memory", Box::new(MemoryUnlockRegistry::new())),
            (
                "sqlite",
                Box::new(SqliteUnlockRegistry::open_in_memory(&UnlockConfig::default()).unwrap()),
            ),
        ]
    }

    #[test]
    fn test_decide_insert_below_target() {
        let now = now_millis();
        let decision = decide(None, "u", "a", 2, 5, now);
        match decision {
            Decision::Insert(row) => {
                assert_eq!(row.progress_value, 2);
                assert!(!row.unlocked);
                assert!(row.unlocked_at.is_none());
            }
            other => panic!("expected insert, got {:?}", other),
        }
    }

    #[test]
    fn test_decide_no_regression() {
        let now = now_millis();
        let row = match decide(None, "u", "a", 4, 10, now) {
            Decision::Insert(row) => row,
            other => panic!("expected insert, got {:?}", other),
        };
        assert!(matches!(decide(Some(&row), "u", "a", 3, 10, now), Decision::Unchanged(_)));
        assert!(matches!(decide(Some(&row), "u", "a", 4, 10, now), Decision::Unchanged(_)));
    }

    #[test]
    fn test_decide_crossing_with_lowered_target() {
        let now = now_millis();
        let row = match decide(None, "u", "a", 4, 10, now) {
            Decision::Insert(row) => row,
            other => panic!("expected insert, got {:?}", other),
        };
        // Same value, but the catalog target dropped to 3
        match decide(Some(&row), "u", "a", 4, 3, now) {
            Decision::Update { next, .. } => {
                assert!(next.unlocked);
                assert_eq!(next.unlocked_at, Some(now));
                assert!(next.progress_value >= next.target);
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn test_unlock_transition_happens_once() {
        for (name, registry) in registries() {
            let first = registry.upsert_progress("u1", "first-sale", 0, 1).unwrap();
            assert!(first.changed, "{}", name);
            assert!(!first.newly_unlocked, "{}", name);

            let crossed = registry.upsert_progress("u1", "first-sale", 1, 1).unwrap();
            assert!(crossed.newly_unlocked, "{}", name);
            let unlocked_at = crossed.progress.unlocked_at;
            assert!(unlocked_at.is_some(), "{}", name);

            let again = registry.upsert_progress("u1", "first-sale", 1, 1).unwrap();
            assert!(!again.newly_unlocked, "{}", name);
            assert!(!again.changed, "{}", name);

            let stored = registry.get("u1", "first-sale").unwrap().unwrap();
            assert!(stored.unlocked, "{}", name);
            assert_eq!(stored.unlocked_at, unlocked_at, "{}", name);
        }
    }

    #[test]
    fn test_progress_keeps_growing_after_unlock() {
        for (name, registry) in registries() {
            let crossed = registry.upsert_progress("u1", "sales", 5, 5).unwrap();
            assert!(crossed.newly_unlocked, "{}", name);

            let more = registry.upsert_progress("u1", "sales", 9, 5).unwrap();
            assert!(more.changed, "{}", name);
            assert!(!more.newly_unlocked, "{}", name);
            assert_eq!(more.progress.progress_value, 9, "{}", name);
            assert_eq!(more.progress.unlocked_at, crossed.progress.unlocked_at, "{}", name);

            // Facts shrank; stored value does not
            let less = registry.upsert_progress("u1", "sales", 2, 5).unwrap();
            assert!(!less.changed, "{}", name);
            let stored = registry.get("u1", "sales").unwrap().unwrap();
            assert_eq!(stored.progress_value, 9, "{}", name);
            assert!(stored.unlocked, "{}", name);
        }
    }

    #[test]
    fn test_list_for_user_is_scoped_and_sorted() {
        for (name, registry) in registries() {
            registry.upsert_progress("u1", "b", 1, 5).unwrap();
            registry.upsert_progress("u1", "a", 1, 5).unwrap();
            registry.upsert_progress("u2", "a", 1, 5).unwrap();

            let rows = registry.list_for_user("u1").unwrap();
            let ids: Vec<&str> = rows.iter().map(|r| r.achievement_id.as_str()).collect();
            assert_eq!(ids, vec!["a", "b"], "{}", name);
            assert!(registry.list_for_user("nobody").unwrap().is_empty(), "{}", name);
        }
    }

    #[test]
    fn test_memory_registry_concurrent_crossing_unlocks_once() {
        let registry = Arc::new(MemoryUnlockRegistry::new());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.upsert_progress("u1", "first-sale", 1, 1).unwrap().newly_unlocked
                })
            })
            .collect();

        let unlocked = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&newly| newly)
            .count();
        assert_eq!(unlocked, 1);
    }

    #[test]
    fn test_sqlite_registries_on_same_file_unlock_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rewards.db");
        let config = UnlockConfig::default();

        // Create the schema before the race
        SqliteUnlockRegistry::open(&path, &config).unwrap();

        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let path = path.clone();
                let config = config.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let registry = SqliteUnlockRegistry::open(&path, &config).unwrap();
                    barrier.wait();
                    registry.upsert_progress("u1", "first-sale", 1, 1).unwrap()
                })
            })
            .collect();

        let outcomes: Vec<UpsertOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(outcomes.iter().filter(|o| o.newly_unlocked).count(), 1);

        let registry = SqliteUnlockRegistry::open(&path, &config).unwrap();
        let stored = registry.get("u1", "first-sale").unwrap().unwrap();
        let winner = outcomes.iter().find(|o| o.newly_unlocked).unwrap();
        assert_eq!(stored.unlocked_at, winner.progress.unlocked_at);
    }

    #[test]
    fn test_stale_compare_and_set_is_rejected() {
        let registry = SqliteUnlockRegistry::open_in_memory(&UnlockConfig::default()).unwrap();
        registry.upsert_progress("u1", "sales", 3, 10).unwrap();
        let stale = registry.get("u1", "sales").unwrap().unwrap();

        // Someone else advances the row
        registry.upsert_progress("u1", "sales", 6, 10).unwrap();

        let decision = decide(Some(&stale), "u1", "sales", 5, 10, now_millis());
        let conn = registry.conn_for("u1");
        assert!(!SqliteUnlockRegistry::write(&conn, &decision).unwrap());
    }

    #[test]
    fn test_busy_database_surfaces_transient_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rewards.db");
        let config = UnlockConfig {
            max_attempts: 3,
            base_backoff_ms: 1,
            busy_timeout_ms: 10,
            connections: 2,
        };
        let registry = SqliteUnlockRegistry::open(&path, &config).unwrap();

        let blocker = Connection::open(&path).unwrap();
        blocker.execute_batch("BEGIN EXCLUSIVE;").unwrap();

        let err = registry.upsert_progress("u1", "first-sale", 1, 1).unwrap_err();
        assert!(err.is_transient(), "unexpected error: {}", err);
        if let RewardsError::TransientStorage { attempts, .. } = err {
            assert_eq!(attempts, 3);
        }

        blocker.execute_batch("COMMIT;").unwrap();
        let outcome = registry.upsert_progress("u1", "first-sale", 1, 1).unwrap();
        assert!(outcome.newly_unlocked);
    }

    fn update(achievement_id: &str, progress_value: u64, target: u64) -> ProgressUpdate {
        ProgressUpdate {
            achievement_id: achievement_id.to_string(),
            progress_value,
            target,
        }
    }

    #[test]
    fn test_batch_outcomes_follow_input_order() {
        for (name, registry) in registries() {
            registry.upsert_progress("u1", "b", 1, 1).unwrap();
            let outcomes = registry
                .upsert_batch("u1", &[update("c", 2, 5), update("b", 1, 1), update("a", 3, 3)])
                .unwrap();

            let ids: Vec<&str> = outcomes.iter().map(|o| o.progress.achievement_id.as_str()).collect();
            assert_eq!(ids, vec!["c", "b", "a"], "{}", name);
            assert!(!outcomes[0].newly_unlocked, "{}", name);
            assert!(!outcomes[1].changed, "{}", name);
            assert!(outcomes[2].newly_unlocked, "{}", name);
            assert_eq!(registry.list_for_user("u1").unwrap().len(), 3, "{}", name);
            assert!(registry.upsert_batch("u1", &[]).unwrap().is_empty(), "{}", name);
        }
    }

    #[test]
    fn test_failed_batch_stores_nothing() {
        let registry = SqliteUnlockRegistry::open_in_memory(&UnlockConfig::default()).unwrap();
        registry
            .conn_for("u1")
            .execute_batch(
                "CREATE TRIGGER reject_second BEFORE INSERT ON achievement_progress
                 WHEN NEW.achievement_id = 'second'
                 BEGIN SELECT RAISE(ABORT, 'write refused'); END;",
            )
            .unwrap();

        let batch = [update("first", 1, 1), update("second", 1, 1)];
        assert!(registry.upsert_batch("u1", &batch).is_err());
        assert_eq!(registry.get("u1", "first").unwrap(), None);
        assert!(registry.list_for_user("u1").unwrap().is_empty());

        registry
            .conn_for("u1")
            .execute_batch("DROP TRIGGER reject_second;")
            .unwrap();
        let outcomes = registry.upsert_batch("u1", &batch).unwrap();
        assert!(outcomes.iter().all(|o| o.newly_unlocked));
    }

    #[test]
    fn test_busy_batch_is_transient_and_leaves_no_rows() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rewards.db");
        let config = UnlockConfig {
            max_attempts: 2,
            base_backoff_ms: 1,
            busy_timeout_ms: 10,
            connections: 1,
        };
        let registry = SqliteUnlockRegistry::open(&path, &config).unwrap();

        let blocker = Connection::open(&path).unwrap();
        blocker.execute_batch("BEGIN EXCLUSIVE;").unwrap();
        let err = registry
            .upsert_batch("u1", &[update("a", 1, 1), update("b", 1, 1)])
            .unwrap_err();
        assert!(err.is_transient(), "unexpected error: {}", err);
        blocker.execute_batch("COMMIT;").unwrap();

        assert!(registry.list_for_user("u1").unwrap().is_empty());
    }

    #[test]
    fn test_progress_beyond_i64_saturates() {
        let registry = SqliteUnlockRegistry::open_in_memory(&UnlockConfig::default()).unwrap();
        let outcome = registry.upsert_progress("u1", "sales", u64::MAX, 10).unwrap();
        assert!(outcome.newly_unlocked);

        let stored = registry.get("u1", "sales").unwrap().unwrap();
        assert_eq!(stored.progress_value, i64::MAX as u64);
        assert!(stored.unlocked);
        assert_eq!(to_sql_int(u64::MAX), i64::MAX);
        assert_eq!(to_sql_int(42), 42);
    }

    #[test]
    fn test_pooled_registry_serves_users_in_parallel() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rewards.db");
        let registry = Arc::new(SqliteUnlockRegistry::open(&path, &UnlockConfig::default()).unwrap());
        assert_eq!(registry.conns.len(), 4);

        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let user = format!("user-{}", i);
                    barrier.wait();
                    registry
                        .upsert_batch(&user, &[update("a", 1, 1), update("b", 1, 2), update("c", 0, 1)])
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            let outcomes = handle.join().unwrap();
            assert_eq!(outcomes.iter().filter(|o| o.newly_unlocked).count(), 1);
        }
        for i in 0..8 {
            let rows = registry.list_for_user(&format!("user-{}", i)).unwrap();
            assert_eq!(rows.len(), 3);
        }
    }
}

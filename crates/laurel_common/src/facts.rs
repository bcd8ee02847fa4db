//! Fact Store v0.3.0 - read access to marketplace facts
//!
//! The marketplace database is the system of record for orders, reviews,
//! referrals and accounts. The engine only ever reads it through
//! [`FactStore`]. [`SqliteFactStore`] is the SQLite-backed adapter used by
//! laureld; its ingest helpers exist for loading mirrors and fixtures.
//!
//! Schema:
//! - users: id, created_at
//! - orders: buyer, seller, status, total (minor units), created/delivered times
//! - reviews: author, seller, rating
//! - referral_codes / referrals: written by the referral ledger
//!
//! All timestamps are unix seconds.
//! v0.3.0: Batch activity queries for leaderboards (one query per metric).
//! v0.4.0: On-disk stores read through a small pool of WAL connections.

use crate::error::Result;
use crate::types::{ActivityCounts, UserId};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Order status counted as completed
pub const STATUS_DELIVERED: &str = "delivered";

/// SQLite keeps host parameters bounded; IN lists are chunked to this size
const BATCH_CHUNK: usize = 500;

/// Read-only connections opened next to the primary for on-disk stores
const READER_CONNECTIONS: usize = 4;

// ============================================================================
// Query types
// ============================================================================

/// Delivered-order aggregate for a seller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderTotals {
    pub count: u64,
    /// Sum of order totals in minor currency units
    pub total_cents: u64,
}

/// Which party of an order the activity is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buyer,
    Seller,
}

impl OrderSide {
    fn column(&self) -> &'static str {
        match self {
            OrderSide::Buyer => "buyer_id",
            OrderSide::Seller => "seller_id",
        }
    }
}

/// Shape of an activity-count query for a leaderboard scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityQuery {
    /// Only count activity at or after this instant
    pub since: Option<DateTime<Utc>>,
    pub side: OrderSide,
    pub include_reviews: bool,
    pub include_referrals: bool,
}

impl Default for ActivityQuery {
    fn default() -> Self {
        Self {
            since: None,
            side: OrderSide::Buyer,
            include_reviews: true,
            include_referrals: true,
        }
    }
}

/// Referral aggregate for a referrer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReferralTotals {
    pub total: u64,
    pub completed: u64,
    /// Sum of reward amounts in minor currency units
    pub earnings_cents: u64,
}

// ============================================================================
// FactStore trait
// ============================================================================

/// Read-only access to marketplace facts.
///
/// Unknown users are not an error: every count is zero and timestamps are None.
pub trait FactStore: Send + Sync {
    /// Delivered orders where `seller_id` is the seller
    fn delivered_sales(&self, seller_id: &str) -> Result<OrderTotals>;

    /// Five-star reviews received by `seller_id`
    fn five_star_reviews(&self, seller_id: &str) -> Result<u64>;

    /// Referral edges (any status) where `referrer_id` is the referrer
    fn referral_edges(&self, referrer_id: &str) -> Result<u64>;

    fn account_created_at(&self, user_id: &str) -> Result<Option<DateTime<Utc>>>;

    /// Delivered sales completed within `window` of order creation
    fn fast_deliveries(&self, seller_id: &str, window: Duration) -> Result<u64>;

    /// Delivered orders where `buyer_id` is the buyer
    fn delivered_purchases(&self, buyer_id: &str) -> Result<u64>;

    /// Reviews written by `user_id`
    fn reviews_given(&self, user_id: &str) -> Result<u64>;

    fn referral_totals(&self, referrer_id: &str) -> Result<ReferralTotals>;

    /// Accounts eligible for ranking, oldest first
    fn candidate_users(&self, limit: usize) -> Result<Vec<UserId>>;

    /// Activity counts for many users in a fixed number of queries.
    /// Users with no activity may be absent from the map.
    fn batch_activity(
        &self,
        users: &[UserId],
        query: &ActivityQuery,
    ) -> Result<HashMap<UserId, ActivityCounts>>;

    /// Account creation times for many users. Unknown users are absent.
    fn batch_created_at(&self, users: &[UserId]) -> Result<HashMap<UserId, DateTime<Utc>>>;

    /// Single-user convenience over [`FactStore::batch_activity`]
    fn activity_counts(&self, user_id: &str, query: &ActivityQuery) -> Result<ActivityCounts> {
        let users = vec![user_id.to_string()];
        Ok(self
            .batch_activity(&users, query)?
            .remove(user_id)
            .unwrap_or_default())
    }
}

// ============================================================================
// Ingest records
// ============================================================================

/// Order row for the mirror
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub buyer_id: String,
    pub seller_id: String,
    pub status: String,
    pub total_cents: u64,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl NewOrder {
    /// A delivered order, delivered `delivery_secs` after creation
    pub fn delivered(
        buyer_id: &str,
        seller_id: &str,
        total_cents: u64,
        created_at: DateTime<Utc>,
        delivery_secs: i64,
    ) -> Self {
        Self {
            buyer_id: buyer_id.to_string(),
            seller_id: seller_id.to_string(),
            status: STATUS_DELIVERED.to_string(),
            total_cents,
            created_at,
            delivered_at: Some(created_at + chrono::Duration::seconds(delivery_secs)),
        }
    }
}

/// Review row for the mirror
#[derive(Debug, Clone)]
pub struct NewReview {
    pub author_id: String,
    pub seller_id: String,
    pub rating: u8,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// SQLite adapter
// ============================================================================

pub(crate) fn to_unix(ts: DateTime<Utc>) -> i64 {
    ts.timestamp()
}

pub(crate) fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

fn count(value: i64) -> u64 {
    value.max(0) as u64
}

/// SQLite-backed fact store.
///
/// Ingest and the referral ledger share the primary connection. Fact reads
/// rotate over the reader pool; an in-memory store has no pool and reads
/// through the primary.
pub struct SqliteFactStore {
    conn: Arc<Mutex<Connection>>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
    db_path: Option<PathBuf>,
}

impl SqliteFactStore {
    /// Open or create the fact database at a specific path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(2))?;

        let mut store = Self {
            conn: Arc::new(Mutex::new(conn)),
            readers: Vec::new(),
            next_reader: AtomicUsize::new(0),
            db_path: Some(path.to_path_buf()),
        };
        store.init_schema()?;

        for _ in 0..READER_CONNECTIONS {
            let reader = Connection::open(path)?;
            reader.busy_timeout(Duration::from_secs(2))?;
            reader.pragma_update(None, "query_only", true)?;
            store.readers.push(Mutex::new(reader));
        }
        Ok(store)
    }

    /// Private in-memory database (tests, demos)
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
            readers: Vec::new(),
            next_reader: AtomicUsize::new(0),
            db_path: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Shared connection handle, used by the referral ledger
    pub fn conn(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Next pooled reader, or the primary when there is no pool
    fn reader(&self) -> MutexGuard<'_, Connection> {
        if self.readers.is_empty() {
            return self.lock();
        }
        let idx = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        self.readers[idx]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS orders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                buyer_id TEXT NOT NULL,
                seller_id TEXT NOT NULL,
                status TEXT NOT NULL,
                total_cents INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                delivered_at INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_orders_seller ON orders(seller_id, status);
            CREATE INDEX IF NOT EXISTS idx_orders_buyer ON orders(buyer_id, status);

            CREATE TABLE IF NOT EXISTS reviews (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                author_id TEXT NOT NULL,
                seller_id TEXT NOT NULL,
                rating INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_reviews_seller ON reviews(seller_id, rating);
            CREATE INDEX IF NOT EXISTS idx_reviews_author ON reviews(author_id);

            CREATE TABLE IF NOT EXISTS referral_codes (
                user_id TEXT PRIMARY KEY,
                code TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS referrals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                referrer_id TEXT NOT NULL,
                referred_id TEXT NOT NULL UNIQUE,
                code TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('pending', 'completed')),
                reward_cents INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                completed_at INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_referrals_referrer ON referrals(referrer_id, status);
            "#,
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Ingest
    // ------------------------------------------------------------------------

    pub fn insert_user(&self, user_id: &str, created_at: DateTime<Utc>) -> Result<()> {
        self.lock().execute(
            "INSERT OR REPLACE INTO users (id, created_at) VALUES (?1, ?2)",
            params![user_id, to_unix(created_at)],
        )?;
        Ok(())
    }

    pub fn insert_order(&self, order: &NewOrder) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO orders (buyer_id, seller_id, status, total_cents, created_at, delivered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &order.buyer_id,
                &order.seller_id,
                &order.status,
                order.total_cents as i64,
                to_unix(order.created_at),
                order.delivered_at.map(to_unix),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_review(&self, review: &NewReview) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO reviews (author_id, seller_id, rating, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                &review.author_id,
                &review.seller_id,
                review.rating as i64,
                to_unix(review.created_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    // ------------------------------------------------------------------------
    // Batch helpers
    // ------------------------------------------------------------------------

    /// Run a `SELECT user, COUNT(*) ... GROUP BY user` over chunked IN lists.
    /// `sql` must contain `{ids}` where the placeholder list goes; ?1 is `since`.
    fn grouped_counts(
        conn: &Connection,
        sql: &str,
        since: i64,
        users: &[UserId],
    ) -> Result<HashMap<UserId, u64>> {
        let mut out = HashMap::new();
        for chunk in users.chunks(BATCH_CHUNK) {
            let placeholders = (2..chunk.len() + 2)
                .map(|i| format!("?{}", i))
                .collect::<Vec<_>>()
                .join(", ");
            let query = sql.replace("{ids}", &placeholders);

            let mut values: Vec<Value> = Vec::with_capacity(chunk.len() + 1);
            values.push(Value::Integer(since));
            values.extend(chunk.iter().map(|id| Value::Text(id.clone())));

            let mut stmt = conn.prepare(&query)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (user, n) = row?;
                out.insert(user, count(n));
            }
        }
        Ok(out)
    }
}

impl FactStore for SqliteFactStore {
    fn delivered_sales(&self, seller_id: &str) -> Result<OrderTotals> {
        let conn = self.reader();
        let (n, sum) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(total_cents), 0)
             FROM orders WHERE seller_id = ?1 AND status = ?2",
            params![seller_id, STATUS_DELIVERED],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;
        Ok(OrderTotals {
            count: count(n),
            total_cents: count(sum),
        })
    }

    fn five_star_reviews(&self, seller_id: &str) -> Result<u64> {
        let n: i64 = self.reader().query_row(
            "SELECT COUNT(*) FROM reviews WHERE seller_id = ?1 AND rating = 5",
            params![seller_id],
            |row| row.get(0),
        )?;
        Ok(count(n))
    }

    fn referral_edges(&self, referrer_id: &str) -> Result<u64> {
        let n: i64 = self.reader().query_row(
            "SELECT COUNT(*) FROM referrals WHERE referrer_id = ?1",
            params![referrer_id],
            |row| row.get(0),
        )?;
        Ok(count(n))
    }

    fn account_created_at(&self, user_id: &str) -> Result<Option<DateTime<Utc>>> {
        let secs: Option<i64> = self
            .reader()
            .query_row(
                "SELECT created_at FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(secs.and_then(from_unix))
    }

    fn fast_deliveries(&self, seller_id: &str, window: Duration) -> Result<u64> {
        let n: i64 = self.reader().query_row(
            "SELECT COUNT(*) FROM orders
             WHERE seller_id = ?1 AND status = ?2
               AND delivered_at IS NOT NULL
               AND delivered_at - created_at <= ?3",
            params![seller_id, STATUS_DELIVERED, window.as_secs() as i64],
            |row| row.get(0),
        )?;
        Ok(count(n))
    }

    fn delivered_purchases(&self, buyer_id: &str) -> Result<u64> {
        let n: i64 = self.reader().query_row(
            "SELECT COUNT(*) FROM orders WHERE buyer_id = ?1 AND status = ?2",
            params![buyer_id, STATUS_DELIVERED],
            |row| row.get(0),
        )?;
        Ok(count(n))
    }

    fn reviews_given(&self, user_id: &str) -> Result<u64> {
        let n: i64 = self.reader().query_row(
            "SELECT COUNT(*) FROM reviews WHERE author_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count(n))
    }

    fn referral_totals(&self, referrer_id: &str) -> Result<ReferralTotals> {
        let (total, completed, earnings) = self.reader().query_row(
            "SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(reward_cents), 0)
             FROM referrals WHERE referrer_id = ?1",
            params![referrer_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )?;
        Ok(ReferralTotals {
            total: count(total),
            completed: count(completed),
            earnings_cents: count(earnings),
        })
    }

    fn candidate_users(&self, limit: usize) -> Result<Vec<UserId>> {
        let conn = self.reader();
        let mut stmt =
            conn.prepare("SELECT id FROM users ORDER BY created_at ASC, id ASC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, String>(0))?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    fn batch_activity(
        &self,
        users: &[UserId],
        query: &ActivityQuery,
    ) -> Result<HashMap<UserId, ActivityCounts>> {
        if users.is_empty() {
            return Ok(HashMap::new());
        }

        let since = query.since.map(to_unix).unwrap_or(i64::MIN);
        let conn = self.reader();

        let side = query.side.column();
        let orders_sql = format!(
            "SELECT {side}, COUNT(*) FROM orders
             WHERE status = 'delivered'
               AND COALESCE(delivered_at, created_at) >= ?1
               AND {side} IN ({{ids}})
             GROUP BY {side}",
            side = side
        );
        let orders = Self::grouped_counts(&conn, &orders_sql, since, users)?;

        let reviews = if query.include_reviews {
            Self::grouped_counts(
                &conn,
                "SELECT author_id, COUNT(*) FROM reviews
                 WHERE created_at >= ?1 AND author_id IN ({ids})
                 GROUP BY author_id",
                since,
                users,
            )?
        } else {
            HashMap::new()
        };

        let referrals = if query.include_referrals {
            Self::grouped_counts(
                &conn,
                "SELECT referrer_id, COUNT(*) FROM referrals
                 WHERE status = 'completed'
                   AND COALESCE(completed_at, created_at) >= ?1
                   AND referrer_id IN ({ids})
                 GROUP BY referrer_id",
                since,
                users,
            )?
        } else {
            HashMap::new()
        };

        debug!(
            "Batch activity for {} users: {} with orders, {} with reviews, {} with referrals",
            users.len(),
            orders.len(),
            reviews.len(),
            referrals.len()
        );

        let mut out = HashMap::with_capacity(users.len());
        for user in users {
            let counts = ActivityCounts {
                delivered_orders: orders.get(user).copied().unwrap_or(0),
                reviews_given: reviews.get(user).copied().unwrap_or(0),
                completed_referrals: referrals.get(user).copied().unwrap_or(0),
            };
            out.insert(user.clone(), counts);
        }
        Ok(out)
    }

    fn batch_created_at(&self, users: &[UserId]) -> Result<HashMap<UserId, DateTime<Utc>>> {
        let conn = self.reader();
        let mut out = HashMap::with_capacity(users.len());

        for chunk in users.chunks(BATCH_CHUNK) {
            let placeholders = (1..=chunk.len())
                .map(|i| format!("?{}", i))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "SELECT id, created_at FROM users WHERE id IN ({})",
                placeholders
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (id, secs) = row?;
                if let Some(ts) = from_unix(secs) {
                    out.insert(id, ts);
                }
            }
        }
        Ok(out)
    }
}

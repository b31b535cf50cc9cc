//! Database operations for Syndicast
//!
//! SQLite-backed persistence for slots, worker registrations and the
//! append-only posting history. Suppression and rate-ledger state is
//! deliberately not persisted; it is rebuilt from live traffic after a
//! restart.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;

use async_trait::async_trait;

use crate::dispatch::HistorySink;
use crate::error::{DbError, Result, SyndicastError};
use crate::scheduler::SlotStore;
use crate::types::{ContentSlot, DestinationId, PostingAttempt, SlotId, WorkerId, WorkerRegistration};

/// Aggregated attempt counts per worker.
#[derive(Debug, Clone)]
pub struct WorkerStats {
    pub worker_id: WorkerId,
    pub attempts: i64,
    pub successes: i64,
    pub failures: i64,
    pub last_attempt_at: Option<i64>,
}

/// Aggregated attempt counts per destination.
#[derive(Debug, Clone)]
pub struct DestinationStats {
    pub destination: DestinationId,
    pub attempts: i64,
    pub successes: i64,
    pub failures: i64,
    pub last_attempt_at: Option<i64>,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(db_path: &str) -> Result<Self> {
        // An in-memory SQLite database exists per connection, so the pool
        // must not open a second one.
        if db_path == ":memory:" {
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await
                .map_err(DbError::SqlxError)?;
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(DbError::MigrationError)?;
            return Ok(Self { pool });
        }

        // Expand path and create parent directories
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // mode=rwc creates the database file if it doesn't exist
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    /// Create a slot together with its destination list.
    pub async fn create_slot(&self, slot: &ContentSlot) -> Result<()> {
        if slot.content.is_empty() {
            return Err(SyndicastError::InvalidInput(
                "slot content is empty".to_string(),
            ));
        }
        if slot.destinations.is_empty() {
            return Err(SyndicastError::InvalidInput(
                "slot has no destinations".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        sqlx::query(
            r#"
            INSERT INTO slots (id, owner, content, interval_secs, last_sent_at, active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(slot.id.as_str())
        .bind(&slot.owner)
        .bind(&slot.content)
        .bind(slot.interval_secs)
        .bind(slot.last_sent_at)
        .bind(if slot.active { 1 } else { 0 })
        .bind(slot.created_at)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        for (position, dest) in slot.destinations.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO slot_destinations (slot_id, destination, position)
                VALUES (?, ?, ?)
                "#,
            )
            .bind(slot.id.as_str())
            .bind(dest.as_str())
            .bind(position as i64)
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;
        }

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(())
    }

    /// Get a slot by ID, with destinations in declared order.
    pub async fn get_slot(&self, id: &SlotId) -> Result<Option<ContentSlot>> {
        let row = sqlx::query(
            r#"
            SELECT id, owner, content, interval_secs, last_sent_at, active, created_at
            FROM slots WHERE id = ?
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        match row {
            Some(r) => {
                let destinations = self.slot_destinations(id).await?;
                Ok(Some(row_to_slot(&r, destinations)))
            }
            None => Ok(None),
        }
    }

    /// List all slots, newest first.
    pub async fn list_slots(&self) -> Result<Vec<ContentSlot>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner, content, interval_secs, last_sent_at, active, created_at
            FROM slots
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let mut slots = Vec::with_capacity(rows.len());
        for r in rows {
            let id = SlotId(r.get("id"));
            let destinations = self.slot_destinations(&id).await?;
            slots.push(row_to_slot(&r, destinations));
        }
        Ok(slots)
    }

    /// Pause or resume a slot. Slots are never deleted.
    pub async fn set_slot_active(&self, id: &SlotId, active: bool) -> Result<()> {
        sqlx::query("UPDATE slots SET active = ? WHERE id = ?")
            .bind(if active { 1 } else { 0 })
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }

    async fn slot_destinations(&self, id: &SlotId) -> Result<Vec<DestinationId>> {
        let rows = sqlx::query(
            r#"
            SELECT destination FROM slot_destinations
            WHERE slot_id = ?
            ORDER BY position
            "#,
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| DestinationId(r.get("destination")))
            .collect())
    }

    /// Register a worker identity, updating limit overrides on conflict.
    pub async fn upsert_worker(&self, reg: &WorkerRegistration, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workers (id, handle, hourly_limit, daily_limit, registered_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                handle = excluded.handle,
                hourly_limit = excluded.hourly_limit,
                daily_limit = excluded.daily_limit
            "#,
        )
        .bind(reg.id.0)
        .bind(&reg.handle)
        .bind(reg.hourly_limit.map(|v| v as i64))
        .bind(reg.daily_limit.map(|v| v as i64))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;
        Ok(())
    }

    pub async fn list_registered_workers(&self) -> Result<Vec<WorkerRegistration>> {
        let rows = sqlx::query(
            r#"
            SELECT id, handle, hourly_limit, daily_limit
            FROM workers
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| WorkerRegistration {
                id: WorkerId(r.get("id")),
                handle: r.get("handle"),
                hourly_limit: r.get::<Option<i64>, _>("hourly_limit").map(|v| v as u32),
                daily_limit: r.get::<Option<i64>, _>("daily_limit").map(|v| v as u32),
            })
            .collect())
    }

    /// Most recent posting attempts, newest first.
    pub async fn recent_attempts(&self, limit: usize) -> Result<Vec<PostingAttempt>> {
        let rows = sqlx::query(
            r#"
            SELECT id, slot_id, destination, worker_id, attempted_at, success, failure_kind, detail
            FROM posting_attempts
            ORDER BY attempted_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| PostingAttempt {
                id: Some(r.get("id")),
                slot_id: SlotId(r.get("slot_id")),
                destination: DestinationId(r.get("destination")),
                worker_id: WorkerId(r.get("worker_id")),
                attempted_at: r.get("attempted_at"),
                success: r.get::<i32, _>("success") != 0,
                failure_kind: r.get("failure_kind"),
                detail: r.get("detail"),
            })
            .collect())
    }

    /// Attempt counts aggregated per worker.
    pub async fn worker_stats(&self) -> Result<Vec<WorkerStats>> {
        let rows = sqlx::query(
            r#"
            SELECT worker_id,
                   COUNT(*) AS attempts,
                   SUM(success) AS successes,
                   MAX(attempted_at) AS last_attempt_at
            FROM posting_attempts
            GROUP BY worker_id
            ORDER BY worker_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| {
                let attempts: i64 = r.get("attempts");
                let successes: i64 = r.get::<Option<i64>, _>("successes").unwrap_or(0);
                WorkerStats {
                    worker_id: WorkerId(r.get("worker_id")),
                    attempts,
                    successes,
                    failures: attempts - successes,
                    last_attempt_at: r.get("last_attempt_at"),
                }
            })
            .collect())
    }

    /// Attempt counts aggregated per destination.
    pub async fn destination_stats(&self) -> Result<Vec<DestinationStats>> {
        let rows = sqlx::query(
            r#"
            SELECT destination,
                   COUNT(*) AS attempts,
                   SUM(success) AS successes,
                   MAX(attempted_at) AS last_attempt_at
            FROM posting_attempts
            GROUP BY destination
            ORDER BY destination
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| {
                let attempts: i64 = r.get("attempts");
                let successes: i64 = r.get::<Option<i64>, _>("successes").unwrap_or(0);
                DestinationStats {
                    destination: DestinationId(r.get("destination")),
                    attempts,
                    successes,
                    failures: attempts - successes,
                    last_attempt_at: r.get("last_attempt_at"),
                }
            })
            .collect())
    }
}

fn row_to_slot(r: &sqlx::sqlite::SqliteRow, destinations: Vec<DestinationId>) -> ContentSlot {
    ContentSlot {
        id: SlotId(r.get("id")),
        owner: r.get("owner"),
        content: r.get("content"),
        destinations,
        interval_secs: r.get("interval_secs"),
        last_sent_at: r.get("last_sent_at"),
        active: r.get::<i32, _>("active") != 0,
        created_at: r.get("created_at"),
    }
}

#[async_trait]
impl SlotStore for Database {
    async fn list_due_slots(&self, now: i64) -> Result<Vec<ContentSlot>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner, content, interval_secs, last_sent_at, active, created_at
            FROM slots
            WHERE active = 1
              AND (last_sent_at IS NULL OR last_sent_at + interval_secs <= ?)
            ORDER BY created_at
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let mut slots = Vec::with_capacity(rows.len());
        for r in rows {
            let id = SlotId(r.get("id"));
            let destinations = self.slot_destinations(&id).await?;
            slots.push(row_to_slot(&r, destinations));
        }
        Ok(slots)
    }

    async fn advance_slot(&self, id: &SlotId, now: i64) -> Result<()> {
        sqlx::query("UPDATE slots SET last_sent_at = ? WHERE id = ?")
            .bind(now)
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }
}

#[async_trait]
impl HistorySink for Database {
    async fn append_attempt(&self, attempt: &PostingAttempt) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO posting_attempts
                (slot_id, destination, worker_id, attempted_at, success, failure_kind, detail)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(attempt.slot_id.as_str())
        .bind(attempt.destination.as_str())
        .bind(attempt.worker_id.0)
        .bind(attempt.attempted_at)
        .bind(if attempt.success { 1 } else { 0 })
        .bind(&attempt.failure_kind)
        .bind(&attempt.detail)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;
        Ok(())
    }
}

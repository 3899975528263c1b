//! Leased job queues.
//!
//! A received message stays invisible to other consumers for the visibility
//! timeout. It is removed only by [`JobQueue::delete`] with the receipt of
//! its current lease; otherwise it becomes visible again when the lease
//! expires.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::QueueError;

pub type Result<T> = std::result::Result<T, QueueError>;

/// Idle long-polls re-check the queue at this interval.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Opaque handle naming one lease of one message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(pub String);

impl ReceiptHandle {
    fn fresh() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeasedMessage {
    pub message_id: String,
    pub receipt: ReceiptHandle,
    pub body: String,
    pub attributes: BTreeMap<String, String>,
    /// Times this message has been received, including this lease.
    pub receive_count: u32,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Lease up to `max` visible messages, waiting up to `wait` for the first
    /// one to arrive.
    async fn receive(&self, max: usize, wait: Duration, visibility: Duration) -> Result<Vec<LeasedMessage>>;

    async fn delete(&self, receipt: &ReceiptHandle) -> Result<()>;
}

// ============================================================================
// SQLite
// ============================================================================

/// Queue table in SQLite. Claims happen in one transaction per receive.
pub struct SqliteJobQueue {
    pool: SqlitePool,
    max_receive_count: Option<u32>,
}

impl SqliteJobQueue {
    pub async fn open(path: &Path, max_receive_count: Option<u32>) -> Result<Self> {
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&url)
            .await?;
        let queue = Self::from_pool(pool, max_receive_count);
        queue.initialize_tables().await?;
        Ok(queue)
    }

    /// `max_receive_count` enables redrive: a message received that many
    /// times moves to `dead_letter` instead of being leased again.
    pub fn from_pool(pool: SqlitePool, max_receive_count: Option<u32>) -> Self {
        Self {
            pool,
            max_receive_count,
        }
    }

    pub async fn initialize_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL UNIQUE,
                body TEXT NOT NULL,
                attributes TEXT NOT NULL DEFAULT '{}',
                visible_at INTEGER NOT NULL,
                receive_count INTEGER NOT NULL DEFAULT 0,
                receipt TEXT,
                sent_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_queue_visible ON job_queue(visible_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dead_letter (
                message_id TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                attributes TEXT NOT NULL,
                receive_count INTEGER NOT NULL,
                moved_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Enqueue a message; returns its id.
    pub async fn send(&self, body: &str, attributes: &BTreeMap<String, String>) -> Result<String> {
        let message_id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO job_queue (message_id, body, attributes, visible_at, sent_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message_id)
        .bind(body)
        .bind(serde_json::to_string(attributes)?)
        .bind(Utc::now().timestamp_millis())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        debug!(message_id = %message_id, "message sent");
        Ok(message_id)
    }

    pub async fn dead_letter_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM dead_letter")
            .fetch_one(&self.pool)
            .await?)
    }

    /// Messages still on the queue, leased or not.
    pub async fn depth(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM job_queue")
            .fetch_one(&self.pool)
            .await?)
    }

    async fn claim(&self, max: usize, visibility: Duration) -> Result<Vec<LeasedMessage>> {
        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        if let Some(limit) = self.max_receive_count {
            let moved = sqlx::query(
                r#"
                INSERT OR REPLACE INTO dead_letter (message_id, body, attributes, receive_count, moved_at)
                SELECT message_id, body, attributes, receive_count, ?
                FROM job_queue
                WHERE visible_at <= ? AND receive_count >= ?
                "#,
            )
            .bind(Utc::now().to_rfc3339())
            .bind(now)
            .bind(i64::from(limit))
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if moved > 0 {
                sqlx::query("DELETE FROM job_queue WHERE visible_at <= ? AND receive_count >= ?")
                    .bind(now)
                    .bind(i64::from(limit))
                    .execute(&mut *tx)
                    .await?;
                warn!(moved, max_receive_count = limit, "moved messages to dead letter table");
            }
        }

        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM job_queue
            WHERE visible_at <= ?
            ORDER BY id ASC
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(max as i64)
        .fetch_all(&mut *tx)
        .await?;

        let visible_at = now + visibility.as_millis() as i64;
        let mut leased = Vec::with_capacity(ids.len());
        for id in ids {
            let receipt = ReceiptHandle::fresh();
            let rows_affected = sqlx::query(
                r#"
                UPDATE job_queue
                SET visible_at = ?,
                    receive_count = receive_count + 1,
                    receipt = ?
                WHERE id = ? AND visible_at <= ?
                "#,
            )
            .bind(visible_at)
            .bind(receipt.as_str())
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if rows_affected == 0 {
                // Claimed by another consumer.
                continue;
            }

            let (message_id, body, attributes, receive_count): (String, String, String, i64) =
                sqlx::query_as(
                    "SELECT message_id, body, attributes, receive_count FROM job_queue WHERE id = ?",
                )
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;

            leased.push(LeasedMessage {
                message_id,
                receipt,
                body,
                attributes: serde_json::from_str(&attributes)?,
                receive_count: u32::try_from(receive_count).unwrap_or(u32::MAX),
            });
        }

        tx.commit().await?;
        Ok(leased)
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn receive(&self, max: usize, wait: Duration, visibility: Duration) -> Result<Vec<LeasedMessage>> {
        let deadline = Instant::now() + wait;
        loop {
            let leased = self.claim(max, visibility).await?;
            let now = Instant::now();
            if !leased.is_empty() || now >= deadline {
                if !leased.is_empty() {
                    info!(count = leased.len(), "leased messages");
                }
                return Ok(leased);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn delete(&self, receipt: &ReceiptHandle) -> Result<()> {
        let rows_affected = sqlx::query("DELETE FROM job_queue WHERE receipt = ?")
            .bind(receipt.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();
        if rows_affected == 0 {
            return Err(QueueError::UnknownReceipt(receipt.0.clone()));
        }
        Ok(())
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Clone)]
struct Entry {
    message_id: String,
    body: String,
    attributes: BTreeMap<String, String>,
    visible_at: Instant,
    receive_count: u32,
    receipt: Option<ReceiptHandle>,
}

/// Queue held in memory for tests. Uses tokio's clock, so paused-time tests
/// can expire leases with `tokio::time::advance`.
#[derive(Default)]
pub struct InMemoryJobQueue {
    entries: Mutex<Vec<Entry>>,
    deletes: Mutex<Vec<ReceiptHandle>>,
    arrived: Notify,
    next_id: Mutex<u64>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&self, body: impl Into<String>) -> String {
        self.send_with_attributes(body, BTreeMap::new())
    }

    pub fn send_with_attributes(&self, body: impl Into<String>, attributes: BTreeMap<String, String>) -> String {
        let message_id = {
            let mut next = lock(&self.next_id);
            *next += 1;
            format!("msg-{}", *next)
        };
        lock(&self.entries).push(Entry {
            message_id: message_id.clone(),
            body: body.into(),
            attributes,
            visible_at: Instant::now(),
            receive_count: 0,
            receipt: None,
        });
        self.arrived.notify_waiters();
        message_id
    }

    /// Every receipt passed to `delete`, in call order.
    pub fn deletes(&self) -> Vec<ReceiptHandle> {
        lock(&self.deletes).clone()
    }

    /// Messages still on the queue, leased or not.
    pub fn depth(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn receive_count(&self, message_id: &str) -> Option<u32> {
        lock(&self.entries)
            .iter()
            .find(|e| e.message_id == message_id)
            .map(|e| e.receive_count)
    }

    fn claim(&self, max: usize, visibility: Duration) -> Vec<LeasedMessage> {
        let now = Instant::now();
        let mut entries = lock(&self.entries);
        entries
            .iter_mut()
            .filter(|e| e.visible_at <= now)
            .take(max)
            .map(|entry| {
                let receipt = ReceiptHandle::fresh();
                entry.visible_at = now + visibility;
                entry.receive_count += 1;
                entry.receipt = Some(receipt.clone());
                LeasedMessage {
                    message_id: entry.message_id.clone(),
                    receipt,
                    body: entry.body.clone(),
                    attributes: entry.attributes.clone(),
                    receive_count: entry.receive_count,
                }
            })
            .collect()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn receive(&self, max: usize, wait: Duration, visibility: Duration) -> Result<Vec<LeasedMessage>> {
        let deadline = Instant::now() + wait;
        loop {
            let arrived = self.arrived.notified();
            let leased = self.claim(max, visibility);
            let now = Instant::now();
            if !leased.is_empty() || now >= deadline {
                return Ok(leased);
            }
            tokio::select! {
                _ = arrived => {}
                _ = tokio::time::sleep(POLL_INTERVAL.min(deadline - now)) => {}
            }
        }
    }

    async fn delete(&self, receipt: &ReceiptHandle) -> Result<()> {
        lock(&self.deletes).push(receipt.clone());
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|e| e.receipt.as_ref() != Some(receipt));
        if entries.len() == before {
            return Err(QueueError::UnknownReceipt(receipt.0.clone()));
        }
        Ok(())
    }
}

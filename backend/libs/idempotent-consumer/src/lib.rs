//! # Idempotent Inbox Library
//!
//! Provides at-least-once Kafka consumption with consumer-side deduplication
//! using PostgreSQL as persistent idempotency tracking storage. Paired with
//! the transactional outbox on the producer side, this gives the two-service
//! pipeline reliable delivery without requiring Kafka exactly-once transactions.
//!
//! ## Problem
//!
//! Without persistent idempotency tracking:
//! - **Service restarts**: in-memory dedup state is lost, events reprocessed
//! - **Rebalances**: new consumer instances reprocess the same events
//! - **Duplicates**: at-least-once Kafka delivery causes duplicate side effects
//!
//! ## Solution
//!
//! Every consumed event is written to an `inbox_messages` row, keyed by its
//! unique `event_id`, before any business handler runs:
//!
//! 1. Consumer reads a Kafka message and calls [`InboxProcessor::intake`],
//!    which inserts a `pending` row (`event_id` UNIQUE, duplicates are a no-op).
//! 2. The Kafka offset is committed only after the insert returns successfully
//!    — never before.
//! 3. A background sweep picks up `pending` rows (first attempt, no backoff)
//!    and `failed` rows still within their retry budget and retry age window,
//!    dispatches them to the handler registered for their `event_type`, and
//!    marks them `processed` or `failed` (incrementing `retry_count`).
//!
//! This is deliberately **at-least-once with idempotent handlers**, not
//! exactly-once: a handler may in rare cases run more than once if the
//! process crashes between a successful handler call and the `mark_processed`
//! write. Handlers are expected to be idempotent themselves (e.g. `GetByOrderID`
//! checks before inserting a payment), matching how the message broker already
//! delivers at-least-once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

mod error;
pub mod metrics;

pub use error::{IdempotencyError, IdempotencyResult};

/// Inbox row status, mirroring the outbox side's three-state lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboxStatus {
    Pending,
    Processed,
    Failed,
}

impl InboxStatus {
    fn as_db_str(&self) -> &'static str {
        match self {
            InboxStatus::Pending => "pending",
            InboxStatus::Processed => "processed",
            InboxStatus::Failed => "failed",
        }
    }

    fn from_db_str(s: &str) -> Self {
        match s {
            "processed" => InboxStatus::Processed,
            "failed" => InboxStatus::Failed,
            _ => InboxStatus::Pending,
        }
    }
}

/// A single consumed event tracked in the inbox table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxMessage {
    pub id: Uuid,
    /// Unique id carried by the message itself (the producer's outbox event id).
    pub event_id: String,
    /// Fully qualified event type (e.g. "order.created", "payment.completed").
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: InboxStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
}

/// Repository trait for inbox persistence. Abstracted for testing.
#[async_trait]
pub trait InboxRepository: Send + Sync {
    /// Insert a new `pending` row for this event. Returns `false` (no error)
    /// if `event_id` already exists — that's the expected outcome for a
    /// redelivered message, not a failure.
    async fn try_insert(
        &self,
        event_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
        max_retries: i32,
    ) -> IdempotencyResult<bool>;

    /// Pending rows, oldest first.
    async fn get_pending(&self, limit: i32) -> IdempotencyResult<Vec<InboxMessage>>;

    /// Failed rows still inside their retry budget and not older than `max_age`.
    async fn get_failed_retriable(
        &self,
        max_age: Duration,
        limit: i32,
    ) -> IdempotencyResult<Vec<InboxMessage>>;

    async fn mark_processed(&self, id: Uuid) -> IdempotencyResult<()>;

    async fn mark_failed(&self, id: Uuid, error: &str) -> IdempotencyResult<()>;

    /// Delete processed rows older than `retention`, returning rows removed.
    async fn cleanup_processed(&self, retention: Duration) -> IdempotencyResult<u64>;
}

fn row_to_message(row: sqlx::postgres::PgRow) -> Result<InboxMessage, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    Ok(InboxMessage {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        status: InboxStatus::from_db_str(&status_str),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        processed_at: row.try_get("processed_at")?,
        retry_count: row.try_get("retry_count")?,
        max_retries: row.try_get("max_retries")?,
        last_error: row.try_get("last_error")?,
    })
}

/// SQLx-backed inbox repository.
pub struct SqlxInboxRepository {
    pool: PgPool,
}

impl SqlxInboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InboxRepository for SqlxInboxRepository {
    async fn try_insert(
        &self,
        event_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
        max_retries: i32,
    ) -> IdempotencyResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO inbox_messages (
                id, event_id, event_type, payload, status,
                created_at, updated_at, retry_count, max_retries
            ) VALUES ($1, $2, $3, $4, 'pending', NOW(), NOW(), 0, $5)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(event_id)
        .bind(event_type)
        .bind(payload)
        .bind(max_retries)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            debug!(event_id = %event_id, event_type = %event_type, "Inbox message accepted");
        } else {
            debug!(event_id = %event_id, "Inbox message already present, skipping intake");
        }
        Ok(inserted)
    }

    async fn get_pending(&self, limit: i32) -> IdempotencyResult<Vec<InboxMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_id, event_type, payload, status,
                   created_at, updated_at, processed_at, retry_count, max_retries, last_error
            FROM inbox_messages
            WHERE status = 'pending'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(row_to_message)
            .collect::<Result<Vec<_>, sqlx::Error>>()?)
    }

    async fn get_failed_retriable(
        &self,
        max_age: Duration,
        limit: i32,
    ) -> IdempotencyResult<Vec<InboxMessage>> {
        let max_age_secs = max_age.as_secs() as i64;
        let rows = sqlx::query(
            r#"
            SELECT id, event_id, event_type, payload, status,
                   created_at, updated_at, processed_at, retry_count, max_retries, last_error
            FROM inbox_messages
            WHERE status = 'failed'
              AND retry_count < max_retries
              AND created_at >= NOW() - make_interval(secs => $1)
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(max_age_secs as f64)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(row_to_message)
            .collect::<Result<Vec<_>, sqlx::Error>>()?)
    }

    async fn mark_processed(&self, id: Uuid) -> IdempotencyResult<()> {
        sqlx::query(
            r#"
            UPDATE inbox_messages
            SET status = 'processed', processed_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> IdempotencyResult<()> {
        sqlx::query(
            r#"
            UPDATE inbox_messages
            SET status = 'failed', retry_count = retry_count + 1, last_error = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cleanup_processed(&self, retention: Duration) -> IdempotencyResult<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention)
                .map_err(|e| IdempotencyError::Other(anyhow::anyhow!("bad retention: {e}")))?;

        let result = sqlx::query("DELETE FROM inbox_messages WHERE status = 'processed' AND processed_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// A handler processes one inbox message's payload. Handlers are keyed by
/// `event_type` in the processor's registry and must be safe to call more
/// than once for the same message (at-least-once delivery).
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
pub type InboxHandler = Arc<dyn Fn(InboxMessage) -> HandlerFuture + Send + Sync>;

/// Background processor that sweeps pending and retriable-failed inbox rows
/// and dispatches them to registered handlers.
pub struct InboxProcessor<R: InboxRepository> {
    repository: Arc<R>,
    handlers: HashMap<String, InboxHandler>,
    batch_size: i32,
    poll_interval: Duration,
    max_retry_age: Duration,
    metrics: Option<metrics::InboxMetrics>,
}

impl<R: InboxRepository> InboxProcessor<R> {
    pub fn new(repository: Arc<R>, batch_size: i32, poll_interval: Duration, max_retry_age: Duration) -> Self {
        Self {
            repository,
            handlers: HashMap::new(),
            batch_size,
            poll_interval,
            max_retry_age,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: metrics::InboxMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register the handler invoked for messages with this `event_type`.
    pub fn register<F>(&mut self, event_type: &str, handler: F)
    where
        F: Fn(InboxMessage) -> HandlerFuture + Send + Sync + 'static,
    {
        self.handlers.insert(event_type.to_string(), Arc::new(handler));
    }

    /// Insert a new message into the inbox. Call this from the Kafka consumer
    /// loop and only commit the offset once this returns `Ok`.
    pub async fn intake(
        &self,
        event_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
        max_retries: i32,
    ) -> IdempotencyResult<bool> {
        self.repository
            .try_insert(event_id, event_type, payload, max_retries)
            .await
    }

    /// Run the sweep loop forever. Spawn as a background task.
    pub async fn start(&self) {
        info!(
            batch_size = self.batch_size,
            poll_interval_secs = self.poll_interval.as_secs(),
            max_retry_age_secs = self.max_retry_age.as_secs(),
            "Inbox processor starting"
        );

        loop {
            match self.process_batch().await {
                Ok(count) if count > 0 => info!(processed_count = count, "Processed inbox messages"),
                Ok(_) => debug!("No inbox messages to process"),
                Err(e) => error!(error = ?e, "Inbox processor error"),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn process_batch(&self) -> IdempotencyResult<i32> {
        let pending = self.repository.get_pending(self.batch_size).await?;
        let mut processed = self.dispatch_all(pending).await;

        let remaining = self.batch_size - processed;
        if remaining > 0 {
            let failed = self
                .repository
                .get_failed_retriable(self.max_retry_age, remaining)
                .await?;
            processed += self.dispatch_all(failed).await;
        }

        Ok(processed)
    }

    async fn dispatch_all(&self, messages: Vec<InboxMessage>) -> i32 {
        let mut processed = 0;
        for message in messages {
            let Some(handler) = self.handlers.get(&message.event_type) else {
                warn!(event_type = %message.event_type, id = %message.id, "No handler registered, marking failed");
                let _ = self
                    .repository
                    .mark_failed(message.id, "no handler registered for event_type")
                    .await;
                continue;
            };

            match handler(message.clone()).await {
                Ok(()) => {
                    if let Err(e) = self.repository.mark_processed(message.id).await {
                        error!(id = %message.id, error = ?e, "Handler succeeded but mark_processed failed");
                    } else {
                        processed += 1;
                        if let Some(metrics) = &self.metrics {
                            metrics.processed.inc();
                        }
                    }
                }
                Err(e) => {
                    warn!(id = %message.id, event_type = %message.event_type, error = ?e, "Inbox handler failed");
                    if let Err(mark_err) = self.repository.mark_failed(message.id, &e.to_string()).await {
                        error!(id = %message.id, error = ?mark_err, "Failed to mark message as failed");
                    }
                    if let Some(metrics) = &self.metrics {
                        metrics.failed.inc();
                    }
                }
            }
        }
        processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockRepo {
        pending: std::sync::Mutex<Vec<InboxMessage>>,
        processed: AtomicUsize,
        failed: AtomicUsize,
    }

    fn sample(event_type: &str) -> InboxMessage {
        InboxMessage {
            id: Uuid::now_v7(),
            event_id: "evt-1".to_string(),
            event_type: event_type.to_string(),
            payload: serde_json::json!({}),
            status: InboxStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            processed_at: None,
            retry_count: 0,
            max_retries: 5,
            last_error: None,
        }
    }

    #[async_trait]
    impl InboxRepository for MockRepo {
        async fn try_insert(
            &self,
            _event_id: &str,
            _event_type: &str,
            _payload: &serde_json::Value,
            _max_retries: i32,
        ) -> IdempotencyResult<bool> {
            Ok(true)
        }

        async fn get_pending(&self, limit: i32) -> IdempotencyResult<Vec<InboxMessage>> {
            let mut guard = self.pending.lock().unwrap();
            let drained: Vec<_> = guard.drain(..guard.len().min(limit as usize)).collect();
            Ok(drained)
        }

        async fn get_failed_retriable(
            &self,
            _max_age: Duration,
            _limit: i32,
        ) -> IdempotencyResult<Vec<InboxMessage>> {
            Ok(vec![])
        }

        async fn mark_processed(&self, _id: Uuid) -> IdempotencyResult<()> {
            self.processed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn mark_failed(&self, _id: Uuid, _error: &str) -> IdempotencyResult<()> {
            self.failed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn cleanup_processed(&self, _retention: Duration) -> IdempotencyResult<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn dispatches_to_registered_handler() {
        let repo = Arc::new(MockRepo {
            pending: std::sync::Mutex::new(vec![sample("order.created")]),
            processed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        });
        let mut processor = InboxProcessor::new(repo.clone(), 10, Duration::from_secs(1), Duration::from_secs(120));
        processor.register("order.created", |_msg| Box::pin(async { Ok(()) }));

        let count = processor.process_batch().await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(repo.processed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn marks_failed_when_no_handler_registered() {
        let repo = Arc::new(MockRepo {
            pending: std::sync::Mutex::new(vec![sample("unknown.event")]),
            processed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        });
        let processor = InboxProcessor::new(repo.clone(), 10, Duration::from_secs(1), Duration::from_secs(120));

        let count = processor.process_batch().await.unwrap();
        assert_eq!(count, 0);
        assert_eq!(repo.failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn marks_failed_when_handler_errors() {
        let repo = Arc::new(MockRepo {
            pending: std::sync::Mutex::new(vec![sample("payment.failed")]),
            processed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        });
        let mut processor = InboxProcessor::new(repo.clone(), 10, Duration::from_secs(1), Duration::from_secs(120));
        processor.register("payment.failed", |_msg| {
            Box::pin(async { Err(anyhow::anyhow!("boom")) })
        });

        let count = processor.process_batch().await.unwrap();
        assert_eq!(count, 0);
        assert_eq!(repo.failed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn status_db_roundtrip() {
        assert_eq!(InboxStatus::Pending.as_db_str(), "pending");
        assert_eq!(InboxStatus::from_db_str("processed"), InboxStatus::Processed);
        assert_eq!(InboxStatus::from_db_str("failed"), InboxStatus::Failed);
        assert_eq!(InboxStatus::from_db_str("garbage"), InboxStatus::Pending);
    }
}

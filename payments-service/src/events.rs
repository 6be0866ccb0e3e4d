use serde::{Deserialize, Serialize};
use sqlx::{Postgres, Transaction};
use transactional_outbox::{publish_event, OutboxResult, SqlxOutboxRepository};
use uuid::Uuid;

/// Thin wrapper around [`publish_event`] that gives the macro's internal `?`
/// a concrete `OutboxResult` to unwind into, independent of whatever error
/// type the calling handler uses.
pub async fn emit(
    tx: &mut Transaction<'_, Postgres>,
    outbox_repo: &SqlxOutboxRepository,
    aggregate_type: &str,
    aggregate_id: Uuid,
    event_type: &str,
    payload: impl Serialize,
    max_retries: i32,
) -> OutboxResult<()> {
    publish_event!(tx, outbox_repo, aggregate_type, aggregate_id, event_type, payload, max_retries)
}

/// Payload consumed from `order.created` on the `orders-events` topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedPayload {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub amount: f64,
    pub currency: String,
}

/// Payload emitted as `payment.completed` on the `payments-events` topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCompletedPayload {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub amount: f64,
    pub currency: String,
    pub transaction_id: Uuid,
}

/// Payload emitted as `payment.failed` on the `payments-events` topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentFailedPayload {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub amount: f64,
    pub currency: String,
    pub error_message: String,
}

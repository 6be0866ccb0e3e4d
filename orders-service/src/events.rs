use serde::{Deserialize, Serialize};
use sqlx::{Postgres, Transaction};
use transactional_outbox::{publish_event, OutboxResult, SqlxOutboxRepository};
use uuid::Uuid;

/// Thin wrapper around [`publish_event`] that gives the macro's internal `?`
/// a concrete `OutboxResult` to unwind into, independent of whatever error
/// type the calling handler or processor uses.
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

/// Payload emitted as `order.created` on the `orders-events` topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedPayload {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub amount: f64,
    pub currency: String,
}

/// Payload emitted as `order.updated` on the `orders-events` topic whenever
/// the order's status changes after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderUpdatedPayload {
    pub order_id: Uuid,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload consumed from `payment.completed` on the `payments-events` topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCompletedPayload {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub amount: f64,
    pub currency: String,
    pub transaction_id: Uuid,
}

/// Payload consumed from `payment.failed` on the `payments-events` topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentFailedPayload {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub amount: f64,
    pub currency: String,
    pub error_message: String,
}

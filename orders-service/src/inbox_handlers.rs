use std::sync::Arc;

use idempotent_consumer::{InboxMessage, InboxProcessor, SqlxInboxRepository};
use serde_json::json;
use sqlx::PgPool;
use tracing::{info, warn};
use transactional_outbox::SqlxOutboxRepository;

use crate::events::{self, OrderUpdatedPayload, PaymentCompletedPayload, PaymentFailedPayload};
use crate::push::PushManager;
use crate::repository::OrdersRepository;

/// Registers the handlers Orders binds on its inbox: `payment.completed`
/// transitions an order to `paid`, `payment.failed` transitions it to
/// `payment_failed`. Both run inside one transaction alongside the
/// `order.updated` outbox event, matching the idempotency contract every
/// inbox handler must honor: re-check entity state before mutating it, since
/// the bus delivers at-least-once.
pub fn register(
    processor: &mut InboxProcessor<SqlxInboxRepository>,
    pool: PgPool,
    orders_repo: Arc<dyn OrdersRepository>,
    outbox_repo: Arc<SqlxOutboxRepository>,
    push_manager: Arc<PushManager>,
    outbox_max_retries: i32,
) {
    {
        let pool = pool.clone();
        let orders_repo = Arc::clone(&orders_repo);
        let outbox_repo = Arc::clone(&outbox_repo);
        let push_manager = Arc::clone(&push_manager);
        processor.register("payment.completed", move |msg: InboxMessage| {
            let pool = pool.clone();
            let orders_repo = Arc::clone(&orders_repo);
            let outbox_repo = Arc::clone(&outbox_repo);
            let push_manager = Arc::clone(&push_manager);
            Box::pin(async move {
                handle_payment_completed(msg, pool, orders_repo, outbox_repo, push_manager, outbox_max_retries).await
            })
        });
    }

    {
        let pool = pool.clone();
        let orders_repo = Arc::clone(&orders_repo);
        let outbox_repo = Arc::clone(&outbox_repo);
        let push_manager = Arc::clone(&push_manager);
        processor.register("payment.failed", move |msg: InboxMessage| {
            let pool = pool.clone();
            let orders_repo = Arc::clone(&orders_repo);
            let outbox_repo = Arc::clone(&outbox_repo);
            let push_manager = Arc::clone(&push_manager);
            Box::pin(async move {
                handle_payment_failed(msg, pool, orders_repo, outbox_repo, push_manager, outbox_max_retries).await
            })
        });
    }
}

async fn handle_payment_completed(
    msg: InboxMessage,
    pool: PgPool,
    orders_repo: Arc<dyn OrdersRepository>,
    outbox_repo: Arc<SqlxOutboxRepository>,
    push_manager: Arc<PushManager>,
    outbox_max_retries: i32,
) -> anyhow::Result<()> {
    let payload: PaymentCompletedPayload = serde_json::from_value(msg.payload)?;

    let mut tx = pool.begin().await?;
    let Some(mut order) = orders_repo.get_by_id_tx(&mut tx, payload.order_id).await? else {
        warn!(order_id = %payload.order_id, "payment.completed for unknown order, dropping");
        tx.rollback().await?;
        return Ok(());
    };

    if !order.is_created() {
        // Already transitioned by an earlier delivery of this event.
        info!(order_id = %order.id, status = ?order.status, "order already past `created`, skipping duplicate payment.completed");
        tx.rollback().await?;
        return Ok(());
    }

    order.mark_paid(payload.payment_id)?;
    orders_repo.update(&mut tx, &order).await?;

    let updated = OrderUpdatedPayload {
        order_id: order.id,
        status: order.status.as_db_str().to_string(),
        payment_id: order.payment_id,
        reason: None,
    };
    events::emit(
        &mut tx,
        &outbox_repo,
        "order",
        order.id,
        "order.updated",
        updated,
        outbox_max_retries,
    )
    .await?;

    tx.commit().await?;

    push_manager
        .publish(
            order.user_id,
            "order-update",
            json!({ "order_id": order.id, "status": order.status.as_db_str() }),
        )
        .await?;

    info!(order_id = %order.id, "order marked paid");
    Ok(())
}

async fn handle_payment_failed(
    msg: InboxMessage,
    pool: PgPool,
    orders_repo: Arc<dyn OrdersRepository>,
    outbox_repo: Arc<SqlxOutboxRepository>,
    push_manager: Arc<PushManager>,
    outbox_max_retries: i32,
) -> anyhow::Result<()> {
    let payload: PaymentFailedPayload = serde_json::from_value(msg.payload)?;

    let mut tx = pool.begin().await?;
    let Some(mut order) = orders_repo.get_by_id_tx(&mut tx, payload.order_id).await? else {
        warn!(order_id = %payload.order_id, "payment.failed for unknown order, dropping");
        tx.rollback().await?;
        return Ok(());
    };

    if !order.is_created() {
        info!(order_id = %order.id, status = ?order.status, "order already past `created`, skipping duplicate payment.failed");
        tx.rollback().await?;
        return Ok(());
    }

    order.mark_payment_failed(payload.error_message.clone())?;
    orders_repo.update(&mut tx, &order).await?;

    let updated = OrderUpdatedPayload {
        order_id: order.id,
        status: order.status.as_db_str().to_string(),
        payment_id: None,
        reason: Some(payload.error_message),
    };
    events::emit(
        &mut tx,
        &outbox_repo,
        "order",
        order.id,
        "order.updated",
        updated,
        outbox_max_retries,
    )
    .await?;

    tx.commit().await?;

    push_manager
        .publish(
            order.user_id,
            "order-update",
            json!({ "order_id": order.id, "status": order.status.as_db_str(), "reason": order.error_reason }),
        )
        .await?;

    warn!(order_id = %order.id, "order marked payment_failed");
    Ok(())
}

use std::sync::Arc;

use idempotent_consumer::{InboxMessage, InboxProcessor, SqlxInboxRepository};
use sqlx::PgPool;
use tracing::{info, warn};
use transactional_outbox::SqlxOutboxRepository;
use uuid::Uuid;

use crate::domain::Payment;
use crate::events::{self, OrderCreatedPayload, PaymentCompletedPayload, PaymentFailedPayload};
use crate::repository::{AccountsRepository, PaymentsRepository};

/// Registers the one handler Payments binds on its inbox: `order.created`
/// drives the full settlement attempt for the order's payment, following
/// the same anchor-on-`order_id` idempotency contract described on
/// [`PaymentsRepository::get_by_order_id_tx`] so a redelivered event never
/// mints a second payment.
pub fn register(
    processor: &mut InboxProcessor<SqlxInboxRepository>,
    pool: PgPool,
    payments_repo: Arc<dyn PaymentsRepository>,
    accounts_repo: Arc<dyn AccountsRepository>,
    outbox_repo: Arc<SqlxOutboxRepository>,
    outbox_max_retries: i32,
) {
    processor.register("order.created", move |msg: InboxMessage| {
        let pool = pool.clone();
        let payments_repo = Arc::clone(&payments_repo);
        let accounts_repo = Arc::clone(&accounts_repo);
        let outbox_repo = Arc::clone(&outbox_repo);
        Box::pin(async move {
            handle_order_created(msg, pool, payments_repo, accounts_repo, outbox_repo, outbox_max_retries).await
        })
    });
}

async fn handle_order_created(
    msg: InboxMessage,
    pool: PgPool,
    payments_repo: Arc<dyn PaymentsRepository>,
    accounts_repo: Arc<dyn AccountsRepository>,
    outbox_repo: Arc<SqlxOutboxRepository>,
    outbox_max_retries: i32,
) -> anyhow::Result<()> {
    let order_event: OrderCreatedPayload = serde_json::from_value(msg.payload)?;

    info!(
        order_id = %order_event.order_id,
        user_id = %order_event.user_id,
        amount = order_event.amount,
        "processing order created event"
    );

    let mut tx = pool.begin().await?;

    let mut payment = match payments_repo.get_by_order_id_tx(&mut tx, order_event.order_id).await? {
        Some(existing) => {
            info!(payment_id = %existing.id, status = ?existing.status, "found existing payment for order");
            existing
        }
        None => {
            let payment = Payment::new(
                order_event.order_id,
                order_event.user_id,
                order_event.amount,
                order_event.currency.clone(),
            );
            payments_repo.insert(&mut tx, &payment).await?;
            info!(payment_id = %payment.id, "created new payment");
            payment
        }
    };

    if !payment.is_pending() {
        // Already settled by an earlier delivery of this event.
        info!(payment_id = %payment.id, status = ?payment.status, "payment already settled, skipping duplicate order.created");
        tx.rollback().await?;
        return Ok(());
    }

    let outcome = settle(&mut tx, &accounts_repo, &payment).await?;

    match outcome {
        Outcome::Retry(reason) => {
            // Commit as-is: the payment stays `pending` and the account
            // debit never happened. Returning an error here leaves the
            // inbox message `failed`-retriable, so the processor's backoff
            // sweep picks it up again instead of this being treated as a
            // terminal outcome.
            tx.commit().await?;
            info!(payment_id = %payment.id, %reason, "payment retry scheduled");
            anyhow::bail!("insufficient funds, will retry later: {reason}");
        }
        Outcome::Completed(transaction_id) => {
            payment.complete(transaction_id);
            payments_repo.update(&mut tx, &payment).await?;

            let completed = PaymentCompletedPayload {
                payment_id: payment.id,
                order_id: payment.order_id,
                user_id: payment.user_id,
                amount: payment.amount,
                currency: payment.currency.clone(),
                transaction_id,
            };
            events::emit(
                &mut tx,
                &outbox_repo,
                "payment",
                payment.id,
                "payment.completed",
                completed,
                outbox_max_retries,
            )
            .await?;
            tx.commit().await?;
            info!(payment_id = %payment.id, %transaction_id, "payment completed");
        }
        Outcome::Failed(reason) => {
            payment.fail(reason.clone());
            payments_repo.update(&mut tx, &payment).await?;

            let failed = PaymentFailedPayload {
                payment_id: payment.id,
                order_id: payment.order_id,
                user_id: payment.user_id,
                amount: payment.amount,
                currency: payment.currency.clone(),
                error_message: reason.clone(),
            };
            events::emit(
                &mut tx,
                &outbox_repo,
                "payment",
                payment.id,
                "payment.failed",
                failed,
                outbox_max_retries,
            )
            .await?;
            tx.commit().await?;
            warn!(payment_id = %payment.id, %reason, "payment failed");
        }
    }

    Ok(())
}

enum Outcome {
    Completed(Uuid),
    Failed(String),
    Retry(String),
}

/// Mirrors the settlement decision table: a timed-out payment or a missing
/// account fail outright, insufficient funds leaves the payment pending for
/// a later retry, and anything else debits the account and completes.
async fn settle(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    accounts_repo: &Arc<dyn AccountsRepository>,
    payment: &Payment,
) -> anyhow::Result<Outcome> {
    if payment.is_timed_out() {
        return Ok(Outcome::Failed("Payment timed out".to_string()));
    }

    let Some(mut account) = accounts_repo.get_by_user_id_tx(tx, payment.user_id).await? else {
        return Ok(Outcome::Failed("User account not found".to_string()));
    };

    if !account.has_sufficient_funds(payment.amount) {
        return Ok(Outcome::Retry(format!(
            "Insufficient funds: balance {:.2}, required {:.2}",
            account.balance, payment.amount
        )));
    }

    account.debit(payment.amount)?;
    accounts_repo.update(tx, &account).await?;

    info!(
        user_id = %payment.user_id,
        new_balance = account.balance,
        "debited account for payment"
    );

    Ok(Outcome::Completed(Uuid::now_v7()))
}

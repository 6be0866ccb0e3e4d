use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::domain::{Payment, PaymentStatus};

/// Persistence boundary for payments. The `order_id` column carries a unique
/// index, so `get_by_order_id` doubles as the idempotency anchor that keeps
/// `order.created` redeliveries from minting a second payment for the same
/// order.
#[async_trait]
pub trait PaymentsRepository: Send + Sync {
    async fn insert(&self, tx: &mut Transaction<'_, Postgres>, payment: &Payment) -> Result<(), sqlx::Error>;
    async fn update(&self, tx: &mut Transaction<'_, Postgres>, payment: &Payment) -> Result<(), sqlx::Error>;
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Payment>, sqlx::Error>;
    async fn get_by_order_id(&self, order_id: Uuid) -> Result<Option<Payment>, sqlx::Error>;
    async fn get_by_order_id_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        order_id: Uuid,
    ) -> Result<Option<Payment>, sqlx::Error>;
}

pub struct SqlxPaymentsRepository {
    pool: PgPool,
}

impl SqlxPaymentsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_payment(row: sqlx::postgres::PgRow) -> Result<Payment, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    Ok(Payment {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        user_id: row.try_get("user_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        status: PaymentStatus::from_db_str(&status_str),
        error_message: row.try_get("error_message")?,
        transaction_id: row.try_get("transaction_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl PaymentsRepository for SqlxPaymentsRepository {
    async fn insert(&self, tx: &mut Transaction<'_, Postgres>, payment: &Payment) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                id, order_id, user_id, amount, currency, status, error_message, transaction_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(payment.id)
        .bind(payment.order_id)
        .bind(payment.user_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.status.as_db_str())
        .bind(&payment.error_message)
        .bind(payment.transaction_id)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn update(&self, tx: &mut Transaction<'_, Postgres>, payment: &Payment) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE payments
            SET status = $2, error_message = $3, transaction_id = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(payment.id)
        .bind(payment.status.as_db_str())
        .bind(&payment.error_message)
        .bind(payment.transaction_id)
        .bind(payment.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Payment>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_payment).transpose()
    }

    async fn get_by_order_id(&self, order_id: Uuid) -> Result<Option<Payment>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM payments WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_payment).transpose()
    }

    async fn get_by_order_id_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        order_id: Uuid,
    ) -> Result<Option<Payment>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM payments WHERE order_id = $1 FOR UPDATE")
            .bind(order_id)
            .fetch_optional(&mut **tx)
            .await?;
        row.map(row_to_payment).transpose()
    }
}

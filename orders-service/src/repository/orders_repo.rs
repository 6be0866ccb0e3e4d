use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::domain::{Order, OrderStatus};

/// Persistence boundary for orders. Methods that accept a transaction must
/// be called from within one already opened by the caller, so the order
/// mutation commits atomically with whatever outbox event accompanies it.
#[async_trait]
pub trait OrdersRepository: Send + Sync {
    async fn insert(&self, tx: &mut Transaction<'_, Postgres>, order: &Order) -> Result<(), sqlx::Error>;
    async fn update(&self, tx: &mut Transaction<'_, Postgres>, order: &Order) -> Result<(), sqlx::Error>;
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Order>, sqlx::Error>;
    async fn get_by_id_tx(&self, tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<Option<Order>, sqlx::Error>;
}

pub struct SqlxOrdersRepository {
    pool: PgPool,
}

impl SqlxOrdersRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_order(row: sqlx::postgres::PgRow) -> Result<Order, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    Ok(Order {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        status: OrderStatus::from_db_str(&status_str),
        payment_id: row.try_get("payment_id")?,
        error_reason: row.try_get("error_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl OrdersRepository for SqlxOrdersRepository {
    async fn insert(&self, tx: &mut Transaction<'_, Postgres>, order: &Order) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, user_id, amount, currency, status, payment_id, error_reason, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.amount)
        .bind(&order.currency)
        .bind(order.status.as_db_str())
        .bind(order.payment_id)
        .bind(&order.error_reason)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn update(&self, tx: &mut Transaction<'_, Postgres>, order: &Order) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, payment_id = $3, error_reason = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(order.id)
        .bind(order.status.as_db_str())
        .bind(order.payment_id)
        .bind(&order.error_reason)
        .bind(order.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Order>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_order).transpose()
    }

    async fn get_by_id_tx(&self, tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<Option<Order>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        row.map(row_to_order).transpose()
    }
}

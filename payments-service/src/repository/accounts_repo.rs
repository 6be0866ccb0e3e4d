use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::domain::Account;

/// Persistence boundary for accounts. The `_tx` variants lock the row with
/// `FOR UPDATE` so a debit and its balance check happen under the same
/// transaction that holds the payment they're settling, closing the race a
/// plain read-then-write would leave open between two concurrent payments
/// against the same account.
#[async_trait]
pub trait AccountsRepository: Send + Sync {
    async fn insert(&self, tx: &mut Transaction<'_, Postgres>, account: &Account) -> Result<(), sqlx::Error>;
    async fn update(&self, tx: &mut Transaction<'_, Postgres>, account: &Account) -> Result<(), sqlx::Error>;
    async fn get_by_user_id(&self, user_id: Uuid) -> Result<Option<Account>, sqlx::Error>;
    async fn get_by_user_id_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> Result<Option<Account>, sqlx::Error>;
}

pub struct SqlxAccountsRepository {
    pool: PgPool,
}

impl SqlxAccountsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_account(row: sqlx::postgres::PgRow) -> Result<Account, sqlx::Error> {
    Ok(Account {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        balance: row.try_get("balance")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl AccountsRepository for SqlxAccountsRepository {
    async fn insert(&self, tx: &mut Transaction<'_, Postgres>, account: &Account) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, user_id, balance, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(account.id)
        .bind(account.user_id)
        .bind(account.balance)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn update(&self, tx: &mut Transaction<'_, Postgres>, account: &Account) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET balance = $2, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(account.id)
        .bind(account.balance)
        .bind(account.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn get_by_user_id(&self, user_id: Uuid) -> Result<Option<Account>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM accounts WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_account).transpose()
    }

    async fn get_by_user_id_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> Result<Option<Account>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM accounts WHERE user_id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .await?;
        row.map(row_to_account).transpose()
    }
}

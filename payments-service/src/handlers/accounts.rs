use actix_web::{web, HttpResponse};
use error_handling::ServiceError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::Account;
use crate::handlers::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub initial_balance: f64,
}

#[derive(Debug, Deserialize)]
pub struct TopUpRequest {
    pub amount: f64,
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub balance: f64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            user_id: account.user_id,
            balance: account.balance,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

/// `POST /payments-api/accounts`. Creates a zero-balance account for
/// `user_id`, optionally crediting `initial_balance` in the same
/// transaction so the account never transiently exists underfunded.
pub async fn create_account(
    state: web::Data<AppState>,
    body: web::Json<CreateAccountRequest>,
) -> Result<HttpResponse, ServiceError> {
    let mut account = Account::new(body.user_id);
    if body.initial_balance > 0.0 {
        account
            .credit(body.initial_balance)
            .map_err(|e| ServiceError::BadRequest(e.to_string()))?;
    }

    let mut tx = state
        .pool
        .begin()
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    state
        .accounts_repo
        .insert(&mut tx, &account)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    tx.commit().await.map_err(|e| ServiceError::Database(e.to_string()))?;

    Ok(HttpResponse::Created().json(AccountResponse::from(account)))
}

/// `POST /payments-api/accounts/{user_id}/topup`. Credits an existing account.
pub async fn topup_account(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<TopUpRequest>,
) -> Result<HttpResponse, ServiceError> {
    let user_id = path.into_inner();

    let mut tx = state
        .pool
        .begin()
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    let mut account = state
        .accounts_repo
        .get_by_user_id_tx(&mut tx, user_id)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?
        .ok_or_else(|| ServiceError::NotFound(format!("account for user {user_id} not found")))?;

    account
        .credit(body.amount)
        .map_err(|e| ServiceError::BadRequest(e.to_string()))?;

    state
        .accounts_repo
        .update(&mut tx, &account)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    tx.commit().await.map_err(|e| ServiceError::Database(e.to_string()))?;

    Ok(HttpResponse::Ok().json(AccountResponse::from(account)))
}

pub async fn get_account(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ServiceError> {
    let user_id = path.into_inner();
    let account = state
        .accounts_repo
        .get_by_user_id(user_id)
        .await
        .map_err(ServiceError::from)?
        .ok_or_else(|| ServiceError::NotFound(format!("account for user {user_id} not found")))?;

    Ok(HttpResponse::Ok().json(AccountResponse::from(account)))
}

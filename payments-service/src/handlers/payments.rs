use actix_web::{web, HttpResponse};
use error_handling::ServiceError;
use serde::Serialize;
use serde_json::json;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::Payment;
use crate::handlers::AppState;

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub amount: f64,
    pub currency: String,
    pub status: String,
    pub error_message: Option<String>,
    pub transaction_id: Option<Uuid>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            id: payment.id,
            order_id: payment.order_id,
            user_id: payment.user_id,
            amount: payment.amount,
            currency: payment.currency,
            status: payment.status.as_db_str().to_string(),
            error_message: payment.error_message,
            transaction_id: payment.transaction_id,
            created_at: payment.created_at,
            updated_at: payment.updated_at,
        }
    }
}

#[instrument(skip(state))]
pub async fn get_payment(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ServiceError> {
    let payment_id = path.into_inner();
    let payment = state
        .payments_repo
        .get_by_id(payment_id)
        .await
        .map_err(ServiceError::from)?
        .ok_or_else(|| ServiceError::NotFound(format!("payment {payment_id} not found")))?;

    Ok(HttpResponse::Ok().json(PaymentResponse::from(payment)))
}

#[instrument(skip(state))]
pub async fn get_payment_by_order(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ServiceError> {
    let order_id = path.into_inner();
    let payment = state
        .payments_repo
        .get_by_order_id(order_id)
        .await
        .map_err(ServiceError::from)?
        .ok_or_else(|| ServiceError::NotFound(format!("no payment for order {order_id}")))?;

    Ok(HttpResponse::Ok().json(PaymentResponse::from(payment)))
}

pub async fn info() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "service": "payments-service",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

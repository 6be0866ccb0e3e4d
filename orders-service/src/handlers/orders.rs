use actix_web::{web, HttpResponse};
use error_handling::ServiceError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};
use transactional_outbox::SqlxOutboxRepository;
use uuid::Uuid;

use crate::domain::{amount, Order};
use crate::events::{self, OrderCreatedPayload};
use crate::push::PushManager;
use crate::repository::OrdersRepository;

pub struct AppState {
    pub pool: sqlx::PgPool,
    pub orders_repo: std::sync::Arc<dyn OrdersRepository>,
    pub outbox_repo: std::sync::Arc<SqlxOutboxRepository>,
    pub push_manager: std::sync::Arc<PushManager>,
    pub outbox_max_retries: i32,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: f64,
    pub currency: String,
    pub status: String,
    pub payment_id: Option<Uuid>,
    pub error_reason: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            amount: order.amount,
            currency: order.currency,
            status: order.status.as_db_str().to_string(),
            payment_id: order.payment_id,
            error_reason: order.error_reason,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

/// `POST /orders-api/orders`. Draws an amount from the crypto-seeded
/// generator, inserts the order and its `order.created` outbox event in one
/// transaction.
#[instrument(skip(state))]
pub async fn create_order(
    state: web::Data<AppState>,
    body: web::Json<CreateOrderRequest>,
) -> Result<HttpResponse, ServiceError> {
    let generated_amount = amount::generate_amount();
    let order = Order::new(body.user_id, generated_amount);

    let mut tx = state
        .pool
        .begin()
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    state
        .orders_repo
        .insert(&mut tx, &order)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    let payload = OrderCreatedPayload {
        order_id: order.id,
        user_id: order.user_id,
        amount: order.amount,
        currency: order.currency.clone(),
    };

    events::emit(
        &mut tx,
        &state.outbox_repo,
        "order",
        order.id,
        "order.created",
        payload,
        state.outbox_max_retries,
    )
    .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    tx.commit().await.map_err(|e| ServiceError::Database(e.to_string()))?;

    info!(order_id = %order.id, user_id = %order.user_id, "order created");
    Ok(HttpResponse::Created().json(OrderResponse::from(order)))
}

#[instrument(skip(state))]
pub async fn get_order(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ServiceError> {
    let order_id = path.into_inner();
    let order = state
        .orders_repo
        .get_by_id(order_id)
        .await
        .map_err(ServiceError::from)?
        .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))?;

    Ok(HttpResponse::Ok().json(OrderResponse::from(order)))
}

/// `POST /orders-api/orders/{id}/complete`. Admin action: `paid` -> `completed`.
#[instrument(skip(state))]
pub async fn complete_order(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ServiceError> {
    let order_id = path.into_inner();

    let mut tx = state
        .pool
        .begin()
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    let mut order = state
        .orders_repo
        .get_by_id_tx(&mut tx, order_id)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?
        .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))?;

    order
        .mark_completed()
        .map_err(|e| ServiceError::Conflict(e.to_string()))?;

    state
        .orders_repo
        .update(&mut tx, &order)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    let updated_payload = crate::events::OrderUpdatedPayload {
        order_id: order.id,
        status: order.status.as_db_str().to_string(),
        payment_id: order.payment_id,
        reason: None,
    };
    events::emit(
        &mut tx,
        &state.outbox_repo,
        "order",
        order.id,
        "order.updated",
        updated_payload,
        state.outbox_max_retries,
    )
    .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    tx.commit().await.map_err(|e| ServiceError::Database(e.to_string()))?;

    state
        .push_manager
        .publish(
            order.user_id,
            "order-update",
            json!({ "order_id": order.id, "status": order.status.as_db_str() }),
        )
        .await
        .map_err(|e| ServiceError::InternalError(e.to_string()))?;

    info!(order_id = %order.id, "order completed");
    Ok(HttpResponse::Ok().json(OrderResponse::from(order)))
}

/// `POST /orders-api/orders/{id}/cancel`. Admin action: any non-terminal
/// status -> `cancelled`.
#[instrument(skip(state))]
pub async fn cancel_order(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ServiceError> {
    let order_id = path.into_inner();

    let mut tx = state
        .pool
        .begin()
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    let mut order = state
        .orders_repo
        .get_by_id_tx(&mut tx, order_id)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?
        .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))?;

    order
        .mark_cancelled("cancelled by admin".to_string())
        .map_err(|e| ServiceError::Conflict(e.to_string()))?;

    state
        .orders_repo
        .update(&mut tx, &order)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    let updated_payload = crate::events::OrderUpdatedPayload {
        order_id: order.id,
        status: order.status.as_db_str().to_string(),
        payment_id: order.payment_id,
        reason: order.error_reason.clone(),
    };
    events::emit(
        &mut tx,
        &state.outbox_repo,
        "order",
        order.id,
        "order.updated",
        updated_payload,
        state.outbox_max_retries,
    )
    .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    tx.commit().await.map_err(|e| ServiceError::Database(e.to_string()))?;

    state
        .push_manager
        .publish(
            order.user_id,
            "order-update",
            json!({ "order_id": order.id, "status": order.status.as_db_str() }),
        )
        .await
        .map_err(|e| ServiceError::InternalError(e.to_string()))?;

    info!(order_id = %order.id, "order cancelled");
    Ok(HttpResponse::Ok().json(OrderResponse::from(order)))
}

pub async fn info() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "service": "orders-service",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

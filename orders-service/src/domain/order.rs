use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of an Order. `completed` and `cancelled` are terminal; every
/// other transition not listed in `Order`'s methods is a programming error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    PaymentPending,
    Paid,
    PaymentFailed,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::PaymentPending => "payment_pending",
            OrderStatus::Paid => "paid",
            OrderStatus::PaymentFailed => "payment_failed",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_db_str(s: &str) -> Self {
        match s {
            "payment_pending" => OrderStatus::PaymentPending,
            "paid" => OrderStatus::Paid,
            "payment_failed" => OrderStatus::PaymentFailed,
            "completed" => OrderStatus::Completed,
            "cancelled" => OrderStatus::Cancelled,
            _ => OrderStatus::Created,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: f64,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_id: Option<Uuid>,
    pub error_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Error returned when a caller attempts a transition the state table in
/// §4.D doesn't allow. Callers should treat this as a programming error,
/// not something to retry.
#[derive(Debug, thiserror::Error)]
pub enum OrderTransitionError {
    #[error("order {id} is in terminal status {status:?}, cannot transition")]
    Terminal { id: Uuid, status: OrderStatus },
    #[error("order {id} is not in `created` status, cannot record payment outcome")]
    NotAwaitingPayment { id: Uuid },
    #[error("order {id} is not `paid`, cannot complete")]
    NotPaid { id: Uuid },
}

impl Order {
    /// Create a new order for `user_id`. Amount and currency are supplied by
    /// the caller (the HTTP handler draws the amount from the crypto-seeded
    /// generator in [`crate::domain::amount`]).
    pub fn new(user_id: Uuid, amount: f64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            user_id,
            amount,
            currency: "USD".to_string(),
            status: OrderStatus::Created,
            payment_id: None,
            error_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_paid(&mut self, payment_id: Uuid) -> Result<(), OrderTransitionError> {
        if self.status != OrderStatus::Created {
            return Err(OrderTransitionError::NotAwaitingPayment { id: self.id });
        }
        self.status = OrderStatus::Paid;
        self.payment_id = Some(payment_id);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_payment_failed(&mut self, reason: String) -> Result<(), OrderTransitionError> {
        if self.status != OrderStatus::Created {
            return Err(OrderTransitionError::NotAwaitingPayment { id: self.id });
        }
        self.status = OrderStatus::PaymentFailed;
        self.error_reason = Some(reason);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_completed(&mut self) -> Result<(), OrderTransitionError> {
        if self.status != OrderStatus::Paid {
            return Err(OrderTransitionError::NotPaid { id: self.id });
        }
        self.status = OrderStatus::Completed;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_cancelled(&mut self, reason: String) -> Result<(), OrderTransitionError> {
        if self.status.is_terminal() {
            return Err(OrderTransitionError::Terminal {
                id: self.id,
                status: self.status,
            });
        }
        self.status = OrderStatus::Cancelled;
        self.error_reason = Some(reason);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn is_created(&self) -> bool {
        self.status == OrderStatus::Created
    }

    pub fn is_paid(&self) -> bool {
        self.status == OrderStatus::Paid
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_order_is_created_in_usd() {
        let user_id = Uuid::now_v7();
        let order = Order::new(user_id, 250.75);

        assert_eq!(order.user_id, user_id);
        assert_eq!(order.currency, "USD");
        assert_eq!(order.status, OrderStatus::Created);
        assert!(order.payment_id.is_none());
        assert!((Utc::now() - order.created_at).num_seconds() < 1);
    }

    #[test]
    fn state_transitions_happy_path() {
        let mut order = Order::new(Uuid::now_v7(), 500.0);
        let payment_id = Uuid::now_v7();

        order.mark_paid(payment_id).unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.payment_id, Some(payment_id));

        order.mark_completed().unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
    }

    #[test]
    fn failure_and_cancellation_record_a_reason() {
        let mut order = Order::new(Uuid::now_v7(), 500.0);
        order.mark_payment_failed("insufficient funds".to_string()).unwrap();
        assert_eq!(order.status, OrderStatus::PaymentFailed);
        assert_eq!(order.error_reason.as_deref(), Some("insufficient funds"));

        let mut cancellable = Order::new(Uuid::now_v7(), 500.0);
        cancellable.mark_cancelled("customer request".to_string()).unwrap();
        assert_eq!(cancellable.status, OrderStatus::Cancelled);
    }

    #[test]
    fn cannot_transition_out_of_a_terminal_status() {
        let mut order = Order::new(Uuid::now_v7(), 500.0);
        order.mark_cancelled("test".to_string()).unwrap();

        let err = order.mark_cancelled("again".to_string()).unwrap_err();
        assert!(matches!(err, OrderTransitionError::Terminal { .. }));
    }

    #[test]
    fn cannot_record_payment_outcome_twice() {
        let mut order = Order::new(Uuid::now_v7(), 500.0);
        order.mark_paid(Uuid::now_v7()).unwrap();

        let err = order.mark_payment_failed("late".to_string()).unwrap_err();
        assert!(matches!(err, OrderTransitionError::NotAwaitingPayment { .. }));
    }

    #[test]
    fn status_db_roundtrip() {
        assert_eq!(OrderStatus::Created.as_db_str(), "created");
        assert_eq!(OrderStatus::from_db_str("paid"), OrderStatus::Paid);
        assert_eq!(OrderStatus::from_db_str("garbage"), OrderStatus::Created);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const TIMEOUT_MILLIS: i64 = 15_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_db_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn from_db_str(s: &str) -> Self {
        match s {
            "completed" => PaymentStatus::Completed,
            "failed" => PaymentStatus::Failed,
            _ => PaymentStatus::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub amount: f64,
    pub currency: String,
    pub status: PaymentStatus,
    pub error_message: Option<String>,
    pub transaction_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(order_id: Uuid, user_id: Uuid, amount: f64, currency: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            order_id,
            user_id,
            amount,
            currency,
            status: PaymentStatus::Pending,
            error_message: None,
            transaction_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A payment sitting in `pending` for longer than 15s is treated as
    /// timed out before any account lookup is attempted, so a stuck account
    /// lookup or a slow retry loop can never complete a stale payment.
    ///
    /// Compared in milliseconds, not `num_seconds()`: `chrono::Duration`
    /// truncates toward zero, so a payment 15.1s old would otherwise report
    /// `num_seconds() == 15` and fail to trip the boundary.
    pub fn is_timed_out(&self) -> bool {
        Utc::now().signed_duration_since(self.created_at).num_milliseconds() > TIMEOUT_MILLIS
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, PaymentStatus::Pending)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, PaymentStatus::Completed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, PaymentStatus::Failed)
    }

    pub fn complete(&mut self, transaction_id: Uuid) {
        self.status = PaymentStatus::Completed;
        self.transaction_id = Some(transaction_id);
        self.error_message = None;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, error_message: impl Into<String>) {
        self.status = PaymentStatus::Failed;
        self.error_message = Some(error_message.into());
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn payment_aged(seconds: i64) -> Payment {
        let mut p = Payment::new(Uuid::now_v7(), Uuid::now_v7(), 42.0, "USD".to_string());
        p.created_at = Utc::now() - Duration::seconds(seconds);
        p
    }

    fn payment_aged_millis(millis: i64) -> Payment {
        let mut p = Payment::new(Uuid::now_v7(), Uuid::now_v7(), 42.0, "USD".to_string());
        p.created_at = Utc::now() - Duration::milliseconds(millis);
        p
    }

    #[test]
    fn new_payment_is_pending() {
        let p = Payment::new(Uuid::now_v7(), Uuid::now_v7(), 10.0, "USD".to_string());
        assert!(p.is_pending());
        assert!(p.transaction_id.is_none());
    }

    #[test]
    fn not_timed_out_just_created() {
        let p = payment_aged(0);
        assert!(!p.is_timed_out());
    }

    #[test]
    fn not_timed_out_at_14_9_seconds() {
        let p = payment_aged_millis(14_900);
        assert!(!p.is_timed_out());
    }

    #[test]
    fn timed_out_at_15_1_seconds() {
        let p = payment_aged_millis(15_100);
        assert!(p.is_timed_out());
    }

    #[test]
    fn timed_out_past_15_seconds() {
        let p = payment_aged(16);
        assert!(p.is_timed_out());
    }

    #[test]
    fn timed_out_long_stale() {
        let p = payment_aged(3600);
        assert!(p.is_timed_out());
    }

    #[test]
    fn complete_records_transaction_id() {
        let mut p = Payment::new(Uuid::now_v7(), Uuid::now_v7(), 10.0, "USD".to_string());
        let tx_id = Uuid::now_v7();
        p.complete(tx_id);
        assert!(p.is_completed());
        assert_eq!(p.transaction_id, Some(tx_id));
    }

    #[test]
    fn fail_records_reason() {
        let mut p = Payment::new(Uuid::now_v7(), Uuid::now_v7(), 10.0, "USD".to_string());
        p.fail("User account not found");
        assert!(p.is_failed());
        assert_eq!(p.error_message.as_deref(), Some("User account not found"));
    }

    #[test]
    fn status_db_roundtrip() {
        for status in [PaymentStatus::Pending, PaymentStatus::Completed, PaymentStatus::Failed] {
            assert_eq!(PaymentStatus::from_db_str(status.as_db_str()), status);
        }
    }
}

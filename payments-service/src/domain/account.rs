use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq)]
pub enum AccountError {
    #[error("amount must be positive")]
    NonPositiveAmount,
    #[error("insufficient funds: balance {balance:.2}, required {required:.2}")]
    InsufficientFunds { balance: f64, required: f64 },
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: Uuid,
    pub user_id: Uuid,
    pub balance: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            user_id,
            balance: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_sufficient_funds(&self, amount: f64) -> bool {
        self.balance >= amount
    }

    pub fn credit(&mut self, amount: f64) -> Result<(), AccountError> {
        if amount <= 0.0 {
            return Err(AccountError::NonPositiveAmount);
        }
        self.balance += amount;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn debit(&mut self, amount: f64) -> Result<(), AccountError> {
        if amount <= 0.0 {
            return Err(AccountError::NonPositiveAmount);
        }
        if !self.has_sufficient_funds(amount) {
            return Err(AccountError::InsufficientFunds {
                balance: self.balance,
                required: amount,
            });
        }
        self.balance -= amount;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_account_has_zero_balance() {
        let acc = Account::new(Uuid::now_v7());
        assert_eq!(acc.balance, 0.0);
    }

    #[test]
    fn credit_increases_balance() {
        let mut acc = Account::new(Uuid::now_v7());
        acc.credit(100.0).unwrap();
        assert_eq!(acc.balance, 100.0);
    }

    #[test]
    fn credit_rejects_non_positive_amount() {
        let mut acc = Account::new(Uuid::now_v7());
        assert_eq!(acc.credit(0.0), Err(AccountError::NonPositiveAmount));
        assert_eq!(acc.credit(-5.0), Err(AccountError::NonPositiveAmount));
    }

    #[test]
    fn debit_decreases_balance_when_sufficient() {
        let mut acc = Account::new(Uuid::now_v7());
        acc.credit(100.0).unwrap();
        acc.debit(40.0).unwrap();
        assert_eq!(acc.balance, 60.0);
    }

    #[test]
    fn debit_fails_on_insufficient_funds() {
        let mut acc = Account::new(Uuid::now_v7());
        acc.credit(10.0).unwrap();
        let err = acc.debit(50.0).unwrap_err();
        assert_eq!(
            err,
            AccountError::InsufficientFunds { balance: 10.0, required: 50.0 }
        );
        assert_eq!(acc.balance, 10.0);
    }

    #[test]
    fn has_sufficient_funds_is_inclusive() {
        let mut acc = Account::new(Uuid::now_v7());
        acc.credit(50.0).unwrap();
        assert!(acc.has_sufficient_funds(50.0));
        assert!(!acc.has_sufficient_funds(50.01));
    }
}

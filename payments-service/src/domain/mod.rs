pub mod account;
pub mod payment;

pub use account::{Account, AccountError};
pub use payment::{Payment, PaymentStatus};

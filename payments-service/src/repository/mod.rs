pub mod accounts_repo;
pub mod payments_repo;

pub use accounts_repo::{AccountsRepository, SqlxAccountsRepository};
pub use payments_repo::{PaymentsRepository, SqlxPaymentsRepository};

use std::sync::Arc;

use crate::repository::{AccountsRepository, PaymentsRepository};

pub mod accounts;
pub mod docs;
pub mod payments;

pub struct AppState {
    pub pool: sqlx::PgPool,
    pub payments_repo: Arc<dyn PaymentsRepository>,
    pub accounts_repo: Arc<dyn AccountsRepository>,
    pub outbox_repo: Arc<transactional_outbox::SqlxOutboxRepository>,
}

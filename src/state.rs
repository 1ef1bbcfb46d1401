use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::Config;
use crate::external::{IdentityProvider, MediaStore, PaymentGateway, PushNotifier};

pub type DbPool = Pool<SqliteConnectionManager>;

/// Runtime context built once at start-up and shared by every handler and sweeper.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub identity: Arc<dyn IdentityProvider>,
    pub media: Arc<dyn MediaStore>,
    pub push: Arc<dyn PushNotifier>,
    pub payments: Arc<dyn PaymentGateway>,
}

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod platform;
pub mod services;

use config::Config;
use services::flows::FlowController;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Arc<Config>,
    pub flows: Arc<FlowController>,
}

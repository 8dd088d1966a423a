use axum::{routing::post, Router};

use super::webhook::receive_update;
use crate::AppState;

pub fn create_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/webhook", post(receive_update))
        .with_state(state)
}

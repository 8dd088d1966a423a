use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::platform::types::Update;
use crate::AppState;

const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Update intake. The platform retries non-2xx responses, so handling
/// errors are logged and swallowed; only a bad secret is refused.
pub async fn receive_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> StatusCode {
    let expected = &state.config.telegram.webhook_secret;
    if !expected.is_empty() {
        let presented = headers
            .get(SECRET_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if presented != expected {
            tracing::warn!("webhook update with bad secret token rejected");
            return StatusCode::FORBIDDEN;
        }
    }

    let update_id = update.update_id;
    let Some(event) = update.into_event() else {
        tracing::debug!(update_id, "update carried nothing actionable");
        return StatusCode::OK;
    };

    if let Err(e) = state.flows.handle(event).await {
        tracing::error!(update_id, error = %e, "update handling failed");
    }

    StatusCode::OK
}

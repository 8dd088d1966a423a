use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    // Recoverable validation errors (reprompt in place)
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Pack name length invalid")]
    NameLengthInvalid,
    #[error("Background mode not supported by the renderer")]
    UnsupportedBackground,

    // Limit errors (flow ends with explanation)
    #[error("Pack creation quota exceeded")]
    QuotaExceeded,
    #[error("Pack is at its item capacity")]
    CapacityExceeded,
    #[error("Feature requires a paid tier")]
    NotEntitled,

    // Lookup errors
    #[error("Pack not found")]
    PackNotFound,
    #[error("Item not found")]
    ItemNotFound,
    #[error("User not found")]
    UserNotFound,
    #[error("A pack with that name already exists")]
    DuplicateName,

    // Authorization errors (terminal, no state change)
    #[error("Not authorized")]
    NotAuthorized,
    #[error("Owner-only feature")]
    OwnerOnly,

    // Flow errors
    #[error("Another flow is already in progress")]
    FlowInProgress,
    #[error("No flow is in progress")]
    NoActiveFlow,

    // Platform / consistency errors
    #[error("Platform call failed: {0}")]
    PlatformFailure(String),
    #[error("Local state may be inconsistent with the platform: {0}")]
    InconsistentState(String),
    #[error("Import snapshot invalid: {0}")]
    InvalidSnapshot(String),

    // Ambient errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Text sent back to the user in chat when a flow hits this error.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation(msg) => msg.clone(),
            AppError::NameLengthInvalid => "That name length is not allowed; please resend.".into(),
            AppError::UnsupportedBackground => {
                "That background mode is not supported here; pick another.".into()
            }
            AppError::QuotaExceeded => {
                "You have used up your free pack quota. /bpack unlocks more.".into()
            }
            AppError::CapacityExceeded => "This pack is at its item limit.".into(),
            AppError::NotEntitled => "This feature requires a paid tier. See /bpack.".into(),
            AppError::PackNotFound => "Pack not found.".into(),
            AppError::ItemNotFound => "That item is not in the pack.".into(),
            AppError::UserNotFound => "Unknown user.".into(),
            AppError::DuplicateName => "A pack with that name already exists; pick another.".into(),
            AppError::NotAuthorized | AppError::OwnerOnly => "Unauthorized.".into(),
            AppError::FlowInProgress => {
                "You already have a flow in progress. Finish it or /cancel first.".into()
            }
            AppError::NoActiveFlow => "Nothing to do right now. See /help.".into(),
            AppError::PlatformFailure(_) => {
                "Telegram rejected the operation; nothing was changed. Try again later.".into()
            }
            AppError::InconsistentState(_) => {
                "The operation may have partially applied; the operators have been notified.".into()
            }
            AppError::InvalidSnapshot(msg) => format!("Import rejected: {}", msg),
            AppError::Database(_) | AppError::Http(_) | AppError::Internal(_) => {
                "Something went wrong on our side. Try again later.".into()
            }
        }
    }

}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            // 400 Bad Request
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NameLengthInvalid
            | AppError::UnsupportedBackground
            | AppError::InvalidSnapshot(_) => (StatusCode::BAD_REQUEST, self.to_string()),

            // 401/403
            AppError::NotAuthorized | AppError::OwnerOnly => {
                (StatusCode::FORBIDDEN, self.to_string())
            }

            // 404 Not Found
            AppError::PackNotFound | AppError::ItemNotFound | AppError::UserNotFound => {
                (StatusCode::NOT_FOUND, self.to_string())
            }

            // 409 Conflict
            AppError::DuplicateName
            | AppError::FlowInProgress
            | AppError::NoActiveFlow
            | AppError::QuotaExceeded
            | AppError::CapacityExceeded
            | AppError::NotEntitled => (StatusCode::CONFLICT, self.to_string()),

            // 502 upstream
            AppError::PlatformFailure(e) => {
                tracing::error!("Platform failure: {}", e);
                (StatusCode::BAD_GATEWAY, "Platform call failed".to_string())
            }

            // 500 Internal Server Error
            AppError::InconsistentState(e) => {
                tracing::error!("Inconsistent state: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Inconsistent state".to_string(),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                )
            }
            AppError::Http(e) => {
                tracing::error!("HTTP client error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Upstream error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

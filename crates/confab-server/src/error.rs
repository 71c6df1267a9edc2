use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use confab_call::CallError;
use confab_chat::ChatError;
use confab_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Call(#[from] CallError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),

            ServerError::Chat(ChatError::InvalidMembership(_)) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ServerError::Chat(ChatError::Store(StoreError::NotFound)) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            // Retryable by the client with backoff.
            ServerError::Chat(ChatError::Store(
                StoreError::SessionUnavailable(_) | StoreError::NoActiveSession,
            )) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            ServerError::Chat(ChatError::Store(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".to_string())
            }

            ServerError::Call(CallError::NotFound) => (StatusCode::NOT_FOUND, self.to_string()),
            // Expected race outcomes, surfaced as conflicts rather than
            // failures.
            ServerError::Call(
                CallError::CallerBusy(_)
                | CallError::ReceiverBusy(_)
                | CallError::InvalidTransition { .. }
                | CallError::CallAlreadyEnded { .. },
            ) => (StatusCode::CONFLICT, self.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use cafe_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    /// The sender (or watcher) is not a registered cafe client.
    #[error("Client not found")]
    ClientNotFound,

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Storage failure: {0}")]
    StorageFailure(String),

    /// Mid-stream query error or an unframeable result.
    #[error("Stream aborted: {0}")]
    StreamAborted(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        ServerError::StorageFailure(e.to_string())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::ClientNotFound => return StatusCode::FORBIDDEN.into_response(),
            ServerError::MalformedInput(_) => StatusCode::BAD_REQUEST,
            ServerError::StorageFailure(_) => {
                tracing::error!(error = %self, "Storage failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ServerError::StreamAborted(_) => StatusCode::BAD_REQUEST,
            ServerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServerError::Conflict(_) => StatusCode::CONFLICT,
        };

        (status, self.to_string()).into_response()
    }
}

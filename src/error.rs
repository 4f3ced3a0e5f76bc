use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;

// Define our custom error type
#[derive(Debug)]
pub enum AppError {
    Internal(anyhow::Error),
    YtDlp(String),
    BadRequest(String),
    NotFound(String),
    /// Rejected because a download is already in flight (single-flight orchestrator).
    Busy(String),
    /// The run was cancelled. Signalled as a failure from the extractor, but the
    /// orchestrator maps it to the Cancelled state, never to Error.
    Cancelled,
}

// This implementation allows us to convert our AppError into a valid HTTP response.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Internal(e) => {
                // Log the full error for debugging
                tracing::error!("Internal server error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred".to_string(),
                )
            }
            AppError::YtDlp(e) => (StatusCode::BAD_REQUEST, format!("yt-dlp error: {}", e)),
            AppError::BadRequest(e) => (StatusCode::BAD_REQUEST, e),
            AppError::NotFound(e) => (StatusCode::NOT_FOUND, e),
            AppError::Busy(e) => (StatusCode::CONFLICT, e),
            AppError::Cancelled => (StatusCode::CONFLICT, "Download cancelled".to_string()),
        };

        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Internal(e) => write!(f, "{}", e),
            AppError::YtDlp(e) => write!(f, "yt-dlp error: {}", e),
            AppError::BadRequest(e) | AppError::NotFound(e) | AppError::Busy(e) => {
                write!(f, "{}", e)
            }
            AppError::Cancelled => write!(f, "Download cancelled"),
        }
    }
}

// This allows us to use the `?` operator to automatically convert
// any error that implements `std::error::Error` into our `AppError::Internal`.
impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Internal(err.into())
    }
}

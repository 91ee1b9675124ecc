//! Mapping of service errors to HTTP responses.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::PinglimitError;

impl PinglimitError {
    /// HTTP status for this error.
    ///
    /// Validation failures are 400; anything else is a server fault.
    pub fn status_code(&self) -> StatusCode {
        if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for PinglimitError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Malformed or incomplete limits bodies on the admin API.
impl From<JsonRejection> for PinglimitError {
    fn from(rejection: JsonRejection) -> Self {
        PinglimitError::InvalidLimits(rejection.body_text())
    }
}

impl From<PathRejection> for PinglimitError {
    fn from(rejection: PathRejection) -> Self {
        PinglimitError::InvalidClient(rejection.body_text())
    }
}

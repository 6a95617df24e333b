use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::StaffbookError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

/// A failed request. Carries the status it maps to and the JSON body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            body: ErrorResponse {
                error: message.into(),
                details: Vec::new(),
            },
        }
    }
}

impl From<StaffbookError> for ApiError {
    fn from(err: StaffbookError) -> Self {
        let (status, details) = match &err {
            StaffbookError::Validation(errors) => {
                (StatusCode::BAD_REQUEST, errors.messages().to_vec())
            }
            StaffbookError::NotFound(_) => (StatusCode::NOT_FOUND, Vec::new()),
            StaffbookError::Conflict(_) => (StatusCode::CONFLICT, Vec::new()),
            _ => {
                log::error!("Request failed: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, Vec::new())
            }
        };
        ApiError {
            status,
            body: ErrorResponse {
                error: err.to_string(),
                details,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

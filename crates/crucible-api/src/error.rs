use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::NOT_FOUND, message: msg.into() }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::BAD_REQUEST, message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::INTERNAL_SERVER_ERROR, message: msg.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<crucible_store::StoreError> for ApiError {
    fn from(e: crucible_store::StoreError) -> Self {
        ApiError::internal(e.to_string())
    }
}

impl From<crucible_queue::QueueError> for ApiError {
    fn from(e: crucible_queue::QueueError) -> Self {
        ApiError::internal(e.to_string())
    }
}

impl From<crucible_bus::BusError> for ApiError {
    fn from(e: crucible_bus::BusError) -> Self {
        ApiError::internal(e.to_string())
    }
}

//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use backend::BackendError;
use checkout::CheckoutError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Checkout attempt error.
    Checkout(CheckoutError),
    /// Remote collaborator error.
    Backend(BackendError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Checkout(err) => checkout_error_to_response(err),
            ApiError::Backend(err) => backend_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn checkout_error_to_response(err: CheckoutError) -> (StatusCode, String) {
    let status = match &err {
        CheckoutError::InvalidState { .. }
        | CheckoutError::AlreadyInProgress(_)
        | CheckoutError::NotAvailable(_)
        | CheckoutError::StockNotSecured(_)
        | CheckoutError::ReservationExpired(_)
        | CheckoutError::Cancelled => StatusCode::CONFLICT,
        CheckoutError::IntentFailed(_) => StatusCode::BAD_GATEWAY,
        CheckoutError::PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
    };
    (status, err.to_string())
}

fn backend_error_to_response(err: BackendError) -> (StatusCode, String) {
    match &err {
        BackendError::OfferNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        BackendError::NoActiveLock(_) => (StatusCode::CONFLICT, err.to_string()),
        BackendError::Database(_) | BackendError::Serialization(_) => {
            tracing::error!(error = %err, "backend failure");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
        _ => (StatusCode::BAD_GATEWAY, err.to_string()),
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError::Checkout(err)
    }
}

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        ApiError::Backend(err)
    }
}

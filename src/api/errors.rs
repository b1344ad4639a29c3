//! API Error Handling
//!
//! Structured error responses with proper HTTP status codes and request tracking.

use crate::errors::{MinesError, SettlementError, StoreError};
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

/// Top-level API error response with request tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: String,
    pub error: ErrorBody,
}

/// Error body with structured information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error code (INVALID_BET, ILLEGAL_MOVE, UNAUTHENTICATED, etc.)
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API error types with request tracking
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub request_id: String,
}

impl ApiError {
    fn new(request_id: String, status: StatusCode, code: &'static str, message: String) -> Self {
        Self {
            status,
            code,
            message,
            details: None,
            request_id,
        }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(request_id: String, message: String) -> Self {
        Self::new(request_id, StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// Malformed or mistyped JSON body
    pub fn from_rejection(request_id: String, rejection: JsonRejection) -> Self {
        Self::bad_request(request_id, rejection.body_text())
    }

    pub fn internal_error(request_id: String, message: String) -> Self {
        Self::new(request_id, StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    /// Map a game error onto its HTTP status and error code
    pub fn from_mines(request_id: String, err: MinesError) -> Self {
        let message = err.to_string();
        match err {
            MinesError::InvalidBet(_) => {
                Self::new(request_id, StatusCode::BAD_REQUEST, "INVALID_BET", message)
            }
            MinesError::InsufficientFunds { required, available } => Self::new(
                request_id,
                StatusCode::UNPROCESSABLE_ENTITY,
                "INSUFFICIENT_FUNDS",
                message,
            )
            .with_details(json!({ "required": required, "available": available })),
            MinesError::IllegalMove(_) => {
                Self::new(request_id, StatusCode::CONFLICT, "ILLEGAL_MOVE", message)
            }
            MinesError::Unauthenticated => {
                Self::new(request_id, StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", message)
            }
            MinesError::InvalidConfiguration(_) => {
                Self::new(request_id, StatusCode::BAD_REQUEST, "INVALID_CONFIGURATION", message)
            }
            MinesError::Store(StoreError::AccountNotFound(_)) => {
                Self::new(request_id, StatusCode::NOT_FOUND, "ACCOUNT_NOT_FOUND", message)
            }
            MinesError::Store(StoreError::AccountExists(_)) => {
                Self::new(request_id, StatusCode::CONFLICT, "ACCOUNT_EXISTS", message)
            }
            MinesError::Store(StoreError::Unavailable(_))
            | MinesError::Settlement(SettlementError::DebitFailed {
                source: StoreError::Unavailable(_),
                ..
            }) => Self::new(
                request_id,
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                message,
            ),
            MinesError::Settlement(SettlementError::CreditUnresolved {
                round_id,
                amount,
                attempts,
                ..
            }) => Self::new(
                request_id,
                StatusCode::SERVICE_UNAVAILABLE,
                "CREDIT_PENDING",
                message,
            )
            .with_details(json!({ "round_id": round_id, "amount": amount, "attempts": attempts })),
            MinesError::Store(_) | MinesError::Settlement(_) | MinesError::Configuration(_) => {
                Self::internal_error(request_id, message)
            }
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.request_id, self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(request_id = %self.request_id, code = self.code, "{}", self.message);
        }

        let body = Json(ErrorResponse {
            request_id: self.request_id,
            error: ErrorBody {
                code: self.code.to_string(),
                message: self.message,
                details: self.details,
            },
        });

        (self.status, body).into_response()
    }
}

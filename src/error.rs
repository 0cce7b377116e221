use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, ApiError>;

/// Error codes for categorizing errors
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum ErrorCode {
    // Authorization errors (2xxx)
    #[serde(rename = "AUTHZ_2002")]
    ResourceAccessDenied,

    // Validation errors (3xxx)
    #[serde(rename = "VAL_3001")]
    InvalidInput,
    #[serde(rename = "VAL_3005")]
    InvalidAmount,
    #[serde(rename = "VAL_3009")]
    ReserveProofRejected,

    // Resource errors (4xxx)
    #[serde(rename = "RES_4001")]
    NotFound,
    #[serde(rename = "RES_4003")]
    Conflict,

    // Business logic errors (5xxx)
    #[serde(rename = "BIZ_5007")]
    OrderNotOpen,

    // Database errors (7xxx)
    #[serde(rename = "DB_7002")]
    QueryFailed,

    // External service errors (8xxx)
    #[serde(rename = "EXT_8003")]
    ExternalServiceError,

    // Internal errors (9xxx)
    #[serde(rename = "INT_9999")]
    InternalServerError,
}

impl ErrorCode {
    /// Get numeric code
    pub fn code(&self) -> u16 {
        match self {
            ErrorCode::ResourceAccessDenied => 2002,
            ErrorCode::InvalidInput => 3001,
            ErrorCode::InvalidAmount => 3005,
            ErrorCode::ReserveProofRejected => 3009,
            ErrorCode::NotFound => 4001,
            ErrorCode::Conflict => 4003,
            ErrorCode::OrderNotOpen => 5007,
            ErrorCode::QueryFailed => 7002,
            ErrorCode::ExternalServiceError => 8003,
            ErrorCode::InternalServerError => 9999,
        }
    }

    /// Get user-friendly message
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::ResourceAccessDenied => "Access to this resource is denied",
            ErrorCode::InvalidInput => "Invalid input provided",
            ErrorCode::InvalidAmount => "Invalid amount provided",
            ErrorCode::ReserveProofRejected => "Battery reserve proof was rejected",
            ErrorCode::NotFound => "The requested resource was not found",
            ErrorCode::Conflict => "A conflict occurred with an existing resource",
            ErrorCode::OrderNotOpen => "Only open orders can be modified",
            ErrorCode::QueryFailed => "Database query failed",
            ErrorCode::ExternalServiceError => "External service error occurred",
            ErrorCode::InternalServerError => "An internal server error occurred",
        }
    }
}

/// Structured error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
    pub request_id: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub code_number: u16,
    pub message: String,
    pub details: Option<String>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A status-guarded write found the row in a different state than expected.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("{1}")]
    WithCode(ErrorCode, String),
}

impl ApiError {
    /// Create error with specific error code
    pub fn with_code(code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError::WithCode(code, message.into())
    }

    /// Helper: Resource not found
    pub fn not_found(resource: &str) -> Self {
        ApiError::NotFound(format!("{} not found", resource))
    }

    /// Helper: status guard failed on an order
    pub fn order_not_open(order_id: impl std::fmt::Display) -> Self {
        ApiError::WithCode(
            ErrorCode::OrderNotOpen,
            format!("Order {} is not in Created status", order_id),
        )
    }

    /// True when the error came from a failed compare-and-swap status transition
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ApiError::Conflict(_) | ApiError::WithCode(ErrorCode::OrderNotOpen, _)
        )
    }

    fn error_code(&self) -> ErrorCode {
        match self {
            ApiError::Forbidden(_) => ErrorCode::ResourceAccessDenied,
            ApiError::Validation(_) => ErrorCode::InvalidInput,
            ApiError::NotFound(_) => ErrorCode::NotFound,
            ApiError::Conflict(_) => ErrorCode::Conflict,
            ApiError::Database(_) => ErrorCode::QueryFailed,
            ApiError::ExternalService(_) => ErrorCode::ExternalServiceError,
            ApiError::Internal(_) => ErrorCode::InternalServerError,
            ApiError::WithCode(code, _) => *code,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Forbidden(_) | ApiError::WithCode(ErrorCode::ResourceAccessDenied, _) => {
                StatusCode::FORBIDDEN
            }

            ApiError::Validation(_)
            | ApiError::WithCode(ErrorCode::InvalidInput, _)
            | ApiError::WithCode(ErrorCode::InvalidAmount, _)
            | ApiError::WithCode(ErrorCode::ReserveProofRejected, _) => StatusCode::BAD_REQUEST,

            ApiError::NotFound(_) | ApiError::WithCode(ErrorCode::NotFound, _) => {
                StatusCode::NOT_FOUND
            }

            ApiError::Conflict(_)
            | ApiError::WithCode(ErrorCode::Conflict, _)
            | ApiError::WithCode(ErrorCode::OrderNotOpen, _) => StatusCode::CONFLICT,

            ApiError::ExternalService(_) => StatusCode::BAD_GATEWAY,

            ApiError::Database(_)
            | ApiError::Internal(_)
            | ApiError::WithCode(_, _) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn log_error(&self, request_id: &str) {
        match self.status_code() {
            status if status.is_server_error() => {
                error!(request_id = %request_id, error = %self, "Server error occurred");
            }
            status if status.is_client_error() => {
                warn!(request_id = %request_id, error = %self, "Client error occurred");
            }
            _ => {}
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();
        let status = self.status_code();
        let code = self.error_code();

        self.log_error(&request_id);

        let details = match &self {
            // Storage internals stay in the logs
            ApiError::Database(_) | ApiError::Internal(_) => None,
            other => Some(other.to_string()),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code,
                code_number: code.code(),
                message: match &self {
                    ApiError::WithCode(_, msg) => msg.clone(),
                    _ => code.message().to_string(),
                },
                details,
            },
            request_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(error_response)).into_response()
    }
}

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::money::MoneyError;
use crate::gateway::GatewayError;
use crate::ports::RepositoryError;
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Payment signature verification failed")]
    SignatureMismatch { payment_id: Option<Uuid> },

    #[error("Verification abandoned after {attempts} attempts")]
    VerificationExhausted { payment_id: Uuid, attempts: i32 },

    #[error("Refund rejected by gateway: {0}")]
    RefundRejected(String),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// The charge succeeded but the follow-up booking/subscription update did not.
    #[error("Payment {payment_id} captured but reconciliation failed: {message}")]
    Reconciliation { payment_id: Uuid, message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
            AppError::SignatureMismatch { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidState(_) => StatusCode::CONFLICT,
            AppError::VerificationExhausted { .. } | AppError::RefundRejected(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::GatewayUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Reconciliation { .. } | AppError::Database(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::InvalidAmount(_) => "INVALID_AMOUNT",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InvalidState(_) => "INVALID_STATE",
            AppError::SignatureMismatch { .. } => "SIGNATURE_MISMATCH",
            AppError::VerificationExhausted { .. } => "VERIFICATION_ATTEMPTS_EXHAUSTED",
            AppError::RefundRejected(_) => "REFUND_REJECTED",
            AppError::GatewayUnavailable(_) => "GATEWAY_UNAVAILABLE",
            AppError::Reconciliation { .. } => "RECONCILIATION_FAILED",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn payment_id(&self) -> Option<Uuid> {
        match self {
            AppError::SignatureMismatch { payment_id } => *payment_id,
            AppError::VerificationExhausted { payment_id, .. }
            | AppError::Reconciliation { payment_id, .. } => Some(*payment_id),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = json!({
            "error": self.to_string(),
            "code": self.code(),
            "status": status.as_u16(),
        });
        if let Some(payment_id) = self.payment_id() {
            body["paymentId"] = json!(payment_id);
        }

        (status, Json(body)).into_response()
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<MoneyError> for AppError {
    fn from(err: MoneyError) -> Self {
        AppError::InvalidAmount(err.to_string())
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => AppError::NotFound(what),
            other => AppError::Database(other.to_string()),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidId(_) => AppError::Validation(err.to_string()),
            other => AppError::GatewayUnavailable(other.to_string()),
        }
    }
}

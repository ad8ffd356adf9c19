//! Payment gateway boundary.

pub mod razorpay;
pub mod signature;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub use razorpay::RazorpayClient;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("gateway request timed out")]
    Timeout,
    #[error("gateway unreachable: {0}")]
    Unavailable(String),
    #[error("gateway rejected request ({status}): {code}: {description}")]
    Rejected {
        status: u16,
        code: String,
        description: String,
    },
    #[error("gateway circuit breaker is open")]
    CircuitOpen,
    #[error("invalid response from gateway: {0}")]
    InvalidResponse(String),
    #[error("malformed gateway id '{0}'")]
    InvalidId(String),
}

impl GatewayError {
    /// Failures that say nothing about the request itself and may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Timeout | GatewayError::Unavailable(_) => true,
            GatewayError::Rejected { status, .. } => *status >= 500 || *status == 429,
            GatewayError::CircuitOpen
            | GatewayError::InvalidResponse(_)
            | GatewayError::InvalidId(_) => false,
        }
    }
}

pub type Notes = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateOrderRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub receipt: String,
    pub notes: Notes,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub receipt: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayPaymentStatus {
    Created,
    Authorized,
    Captured,
    Refunded,
    Failed,
}

impl GatewayPaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayPaymentStatus::Created => "created",
            GatewayPaymentStatus::Authorized => "authorized",
            GatewayPaymentStatus::Captured => "captured",
            GatewayPaymentStatus::Refunded => "refunded",
            GatewayPaymentStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GatewayPayment {
    pub id: String,
    pub order_id: Option<String>,
    pub status: GatewayPaymentStatus,
    pub amount: i64,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefundRequest {
    pub amount_minor: i64,
    pub notes: Notes,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GatewayRefund {
    pub id: String,
    pub amount: i64,
    #[serde(default)]
    pub status: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(&self, request: &CreateOrderRequest)
        -> Result<GatewayOrder, GatewayError>;

    async fn fetch_payment(&self, gateway_payment_id: &str)
        -> Result<GatewayPayment, GatewayError>;

    async fn refund(
        &self,
        gateway_payment_id: &str,
        request: &RefundRequest,
    ) -> Result<GatewayRefund, GatewayError>;

    /// Public key the client needs to open the checkout widget.
    fn client_key(&self) -> &str;

    /// "closed" or "open".
    fn circuit_state(&self) -> &'static str;
}

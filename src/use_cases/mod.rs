//! Application use cases. Each one owns its ports behind `Arc<dyn ...>` and
//! exposes a single `execute`-style entry point.

pub mod create_order;
pub mod gateway_webhook;
pub mod reconcile;
pub mod refund_payment;
pub mod reverify_payment;
pub mod verify_payment;

pub use create_order::{CouponInput, CreateOrder, CreateOrderInput, CreateOrderOutput};
pub use gateway_webhook::{GatewayWebhook, WebhookOutcome};
pub use reconcile::{ReconcileError, Reconciler};
pub use refund_payment::{RefundInput, RefundOutput, RefundPayment};
pub use reverify_payment::{ReverifyInput, ReverifyOutput, ReverifyPayment};
pub use verify_payment::{VerifyPayment, VerifyPaymentInput, VerifyPaymentOutput};

use crate::domain::PaymentRecord;
use crate::error::AppError;

pub const ADMIN_ROLE: &str = "admin";

/// Authenticated identity forwarded by the upstream auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub role: Option<String>,
}

impl Caller {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: None,
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Some(ADMIN_ROLE.to_string()),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some(ADMIN_ROLE)
    }

    pub fn ensure_can_access(&self, record: &PaymentRecord) -> Result<(), AppError> {
        if self.is_admin() || record.user_id == self.user_id {
            return Ok(());
        }
        Err(AppError::Forbidden(format!(
            "payment {} belongs to another user",
            record.id
        )))
    }
}

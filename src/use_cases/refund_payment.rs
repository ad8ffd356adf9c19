//! Refunds. The record is claimed before the gateway is called and only
//! moves to `refunded` after the gateway confirms.

use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::money::{from_minor_units, to_minor_units};
use crate::domain::{PaymentRecord, PaymentStatus, PaymentTransition};
use crate::error::AppError;
use crate::gateway::{GatewayError, Notes, PaymentGateway, RefundRequest};
use crate::ports::{PaymentRepository, TransitionOutcome};
use crate::validation::{sanitize_string, validate_max_len, REASON_MAX_LEN};

/// A refund claim older than this is considered abandoned and may be retaken.
pub const REFUND_CLAIM_STALE_AFTER_SECS: i64 = 900;

#[derive(Debug, Clone)]
pub struct RefundInput {
    pub payment_id: Uuid,
    pub amount: Option<BigDecimal>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefundOutput {
    pub payment_id: Uuid,
    pub refund_id: String,
    #[schema(value_type = String)]
    pub amount: BigDecimal,
    pub status: PaymentStatus,
}

pub struct RefundPayment {
    payments: Arc<dyn PaymentRepository>,
    gateway: Arc<dyn PaymentGateway>,
}

impl RefundPayment {
    pub fn new(payments: Arc<dyn PaymentRepository>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { payments, gateway }
    }

    pub async fn execute(&self, input: RefundInput) -> Result<RefundOutput, AppError> {
        let reason = input
            .reason
            .as_deref()
            .map(sanitize_string)
            .filter(|r| !r.is_empty());
        if let Some(reason) = &reason {
            validate_max_len("reason", reason, REASON_MAX_LEN)?;
        }

        let record = self
            .payments
            .get_by_id(input.payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("payment {}", input.payment_id)))?;

        if record.status != PaymentStatus::Paid {
            return Err(AppError::InvalidState(format!(
                "payment {} is {}, only paid payments can be refunded",
                record.id, record.status
            )));
        }
        let Some(gateway_payment_id) = record.gateway_payment_id.clone() else {
            return Err(AppError::Internal(format!(
                "paid payment {} has no gateway payment id",
                record.id
            )));
        };

        let requested = input.amount.unwrap_or_else(|| record.amount.clone());
        if requested > record.amount {
            return Err(AppError::InvalidAmount(format!(
                "refund amount {} exceeds the original amount {}",
                requested, record.amount
            )));
        }
        let amount_minor = to_minor_units(&requested, 1)?;
        if amount_minor > record.amount_minor {
            return Err(AppError::InvalidAmount(format!(
                "refund amount {} exceeds the original amount {}",
                requested, record.amount
            )));
        }

        let stale_before = Utc::now() - Duration::seconds(REFUND_CLAIM_STALE_AFTER_SECS);
        if !self.payments.claim_refund(record.id, stale_before).await? {
            return Err(AppError::InvalidState(format!(
                "payment {} already has a refund in progress",
                record.id
            )));
        }

        let mut notes = Notes::new();
        notes.insert("paymentId".to_string(), record.id.to_string());
        if let Some(reason) = &reason {
            notes.insert("reason".to_string(), reason.clone());
        }

        let request = RefundRequest {
            amount_minor,
            notes,
        };
        let refund = match self.gateway.refund(&gateway_payment_id, &request).await {
            Ok(refund) => refund,
            Err(e) => return Err(self.refund_failed(&record, e).await),
        };

        let refund_amount = from_minor_units(amount_minor);
        let transition = PaymentTransition::Refunded {
            refund_id: refund.id.clone(),
            refund_amount: refund_amount.clone(),
            refunded_at: Utc::now(),
            reason,
        };

        match self.payments.transition(record.id, &transition).await? {
            TransitionOutcome::Applied(refunded) => {
                tracing::info!(
                    payment_id = %refunded.id,
                    refund_id = %refund.id,
                    amount_minor,
                    "Payment refunded"
                );
                Ok(RefundOutput {
                    payment_id: refunded.id,
                    refund_id: refund.id,
                    amount: refund_amount,
                    status: refunded.status,
                })
            }
            TransitionOutcome::Conflict(current) => {
                tracing::error!(
                    payment_id = %current.id,
                    refund_id = %refund.id,
                    status = %current.status,
                    "Gateway refunded but the record had already moved"
                );
                Err(AppError::InvalidState(format!(
                    "payment {} is {}; gateway refund {} needs manual review",
                    current.id, current.status, refund.id
                )))
            }
        }
    }

    /// Releases the claim when the gateway certainly did not refund. When the
    /// outcome is unknown the claim stays until it goes stale.
    async fn refund_failed(&self, record: &PaymentRecord, err: GatewayError) -> AppError {
        if outcome_unknown(&err) {
            tracing::error!(
                payment_id = %record.id,
                error = %err,
                "Refund outcome unknown; claim kept, check the gateway before retrying"
            );
        } else {
            tracing::warn!(payment_id = %record.id, error = %err, "Gateway refund failed");
            if let Err(release_err) = self.payments.release_refund(record.id).await {
                tracing::error!(
                    payment_id = %record.id,
                    error = %release_err,
                    "Could not release refund claim"
                );
            }
        }

        let transient = err.is_transient();
        match err {
            GatewayError::Rejected { description, .. } if !transient => {
                AppError::RefundRejected(description)
            }
            other => AppError::from(other),
        }
    }
}

/// Failures after which the gateway may still have processed the refund.
fn outcome_unknown(err: &GatewayError) -> bool {
    match err {
        GatewayError::Timeout | GatewayError::Unavailable(_) | GatewayError::InvalidResponse(_) => {
            true
        }
        GatewayError::Rejected { status, .. } => *status >= 500,
        GatewayError::CircuitOpen | GatewayError::InvalidId(_) => false,
    }
}

//! Operator-driven re-verification of a record stuck in `created`, capped at
//! `MAX_VERIFICATION_ATTEMPTS`.

use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::payment::{
    MAX_VERIFICATION_ATTEMPTS, PAYMENT_FAILED, VERIFICATION_ATTEMPTS_EXHAUSTED,
};
use crate::domain::{
    PaymentRecord, PaymentStatus, PaymentTransition, ReconciliationResult, ReconciliationStatus,
};
use crate::error::AppError;
use crate::gateway::signature::sign_payment;
use crate::gateway::{GatewayPaymentStatus, PaymentGateway};
use crate::ports::{PaymentRepository, TransitionOutcome};
use crate::validation::validate_gateway_id;

use super::verify_payment::{capture, CaptureOutcome};
use super::Reconciler;

#[derive(Debug, Clone)]
pub struct ReverifyInput {
    pub payment_id: Uuid,
    pub gateway_payment_id: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReverifyOutput {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub verification_attempts: i32,
    /// Status the gateway reported, when it was asked.
    pub gateway_status: Option<String>,
    pub reconciliation_status: Option<ReconciliationStatus>,
    pub reconciliation_result: Option<ReconciliationResult>,
}

impl ReverifyOutput {
    fn from_record(record: &PaymentRecord, gateway_status: Option<String>) -> Self {
        Self {
            payment_id: record.id,
            status: record.status,
            verification_attempts: record.verification_attempts,
            gateway_status,
            reconciliation_status: record.reconciliation_status,
            reconciliation_result: record.reconciliation_result.clone(),
        }
    }
}

pub struct ReverifyPayment {
    payments: Arc<dyn PaymentRepository>,
    gateway: Arc<dyn PaymentGateway>,
    reconciler: Arc<Reconciler>,
    key_secret: String,
}

impl ReverifyPayment {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        gateway: Arc<dyn PaymentGateway>,
        reconciler: Arc<Reconciler>,
        key_secret: String,
    ) -> Self {
        Self {
            payments,
            gateway,
            reconciler,
            key_secret,
        }
    }

    pub async fn execute(&self, input: ReverifyInput) -> Result<ReverifyOutput, AppError> {
        validate_gateway_id("gatewayPaymentId", &input.gateway_payment_id)?;

        let record = self
            .payments
            .get_by_id(input.payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("payment {}", input.payment_id)))?;
        if record.status != PaymentStatus::Created {
            return settled(&record);
        }

        let Some(attempts) = self
            .payments
            .increment_verification_attempts(record.id)
            .await?
        else {
            let current = self
                .payments
                .get_by_id(record.id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("payment {}", record.id)))?;
            return settled(&current);
        };

        if attempts > MAX_VERIFICATION_ATTEMPTS {
            return self.exhaust(&record, attempts).await;
        }

        let payment = self
            .gateway
            .fetch_payment(&input.gateway_payment_id)
            .await?;
        if payment.order_id.as_deref() != Some(record.gateway_order_id.as_str()) {
            return Err(AppError::Validation(format!(
                "gatewayPaymentId: payment {} does not belong to order {}",
                payment.id, record.gateway_order_id
            )));
        }
        let gateway_status = payment.status.as_str().to_string();

        tracing::info!(
            payment_id = %record.id,
            attempt = attempts,
            gateway_status = %gateway_status,
            "Re-verifying payment against gateway"
        );

        match payment.status {
            GatewayPaymentStatus::Captured => {
                let signature =
                    sign_payment(&self.key_secret, &record.gateway_order_id, &payment.id)
                        .map_err(|e| AppError::Internal(e.to_string()))?;
                let outcome = capture(
                    self.payments.as_ref(),
                    &self.reconciler,
                    &record,
                    &payment.id,
                    &signature,
                )
                .await?;
                let output = match outcome {
                    CaptureOutcome::Captured(output) | CaptureOutcome::AlreadyPaid(output) => {
                        output
                    }
                    CaptureOutcome::AlreadyFailed(current) => {
                        return Ok(ReverifyOutput::from_record(&current, Some(gateway_status)))
                    }
                };
                Ok(ReverifyOutput {
                    payment_id: output.payment_id,
                    status: output.status,
                    verification_attempts: attempts,
                    gateway_status: Some(gateway_status),
                    reconciliation_status: output.reconciliation_status,
                    reconciliation_result: output.reconciliation_result,
                })
            }
            GatewayPaymentStatus::Failed => {
                let transition = PaymentTransition::Failed {
                    error_code: payment
                        .error_code
                        .clone()
                        .unwrap_or_else(|| PAYMENT_FAILED.to_string()),
                    error_description: payment.error_description.clone(),
                };
                let current = match self.payments.transition(record.id, &transition).await? {
                    TransitionOutcome::Applied(r) | TransitionOutcome::Conflict(r) => r,
                };
                Ok(ReverifyOutput::from_record(&current, Some(gateway_status)))
            }
            _ => {
                let mut pending = record.clone();
                pending.verification_attempts = attempts;
                Ok(ReverifyOutput::from_record(&pending, Some(gateway_status)))
            }
        }
    }

    async fn exhaust(
        &self,
        record: &PaymentRecord,
        attempts: i32,
    ) -> Result<ReverifyOutput, AppError> {
        tracing::warn!(
            payment_id = %record.id,
            attempts,
            "Verification attempts exhausted, failing payment"
        );

        let transition = PaymentTransition::Failed {
            error_code: VERIFICATION_ATTEMPTS_EXHAUSTED.to_string(),
            error_description: Some(format!(
                "gave up after {} re-verification attempts",
                MAX_VERIFICATION_ATTEMPTS
            )),
        };
        if let TransitionOutcome::Conflict(current) =
            self.payments.transition(record.id, &transition).await?
        {
            if current.status.is_settled() {
                return Ok(ReverifyOutput::from_record(&current, None));
            }
        }

        Err(AppError::VerificationExhausted {
            payment_id: record.id,
            attempts,
        })
    }
}

/// A record that already left `created` is reported as is. Failed is terminal.
fn settled(record: &PaymentRecord) -> Result<ReverifyOutput, AppError> {
    match record.status {
        PaymentStatus::Failed
            if record.error_code.as_deref() == Some(VERIFICATION_ATTEMPTS_EXHAUSTED) =>
        {
            Err(AppError::VerificationExhausted {
                payment_id: record.id,
                attempts: record.verification_attempts,
            })
        }
        PaymentStatus::Failed => Err(AppError::InvalidState(format!(
            "payment {} has already failed ({})",
            record.id,
            record.error_code.as_deref().unwrap_or("unknown")
        ))),
        _ => Ok(ReverifyOutput::from_record(record, None)),
    }
}

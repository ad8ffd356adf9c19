//! Checkout confirmation: signature check, `created -> paid | failed`, then
//! reconciliation by whichever caller wins the status update.

use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::payment::SIGNATURE_MISMATCH;
use crate::domain::{
    PaymentRecord, PaymentStatus, PaymentTransition, ReconciliationResult, ReconciliationStatus,
};
use crate::error::AppError;
use crate::gateway::signature::{verify_payment_signature, SignatureError};
use crate::ports::{PaymentRepository, TransitionOutcome};
use crate::validation::{validate_gateway_id, validate_identifier, SIGNATURE_MAX_LEN};

use super::{Caller, Reconciler};

#[derive(Debug, Clone)]
pub struct VerifyPaymentInput {
    pub caller: Caller,
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub signature: String,
    pub payment_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentOutput {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub reconciliation_status: Option<ReconciliationStatus>,
    pub reconciliation_result: Option<ReconciliationResult>,
}

impl VerifyPaymentOutput {
    pub fn from_record(record: &PaymentRecord) -> Self {
        Self {
            payment_id: record.id,
            status: record.status,
            reconciliation_status: record.reconciliation_status,
            reconciliation_result: record.reconciliation_result.clone(),
        }
    }
}

/// What happened when a capture was applied to a record.
#[derive(Debug)]
pub(crate) enum CaptureOutcome {
    /// This call moved the record to `paid` and ran reconciliation.
    Captured(VerifyPaymentOutput),
    /// The record was already settled; nothing was re-run.
    AlreadyPaid(VerifyPaymentOutput),
    /// The record had failed before the capture arrived.
    AlreadyFailed(PaymentRecord),
}

/// Moves a `created` record to `paid` and reconciles it. Losers of the race
/// get the stored state back.
pub(crate) async fn capture(
    payments: &dyn PaymentRepository,
    reconciler: &Reconciler,
    record: &PaymentRecord,
    gateway_payment_id: &str,
    signature: &str,
) -> Result<CaptureOutcome, AppError> {
    match record.status {
        PaymentStatus::Paid | PaymentStatus::Refunded => {
            return Ok(CaptureOutcome::AlreadyPaid(VerifyPaymentOutput::from_record(
                record,
            )))
        }
        PaymentStatus::Failed => return Ok(CaptureOutcome::AlreadyFailed(record.clone())),
        PaymentStatus::Created => {}
    }

    let transition = PaymentTransition::Paid {
        gateway_payment_id: gateway_payment_id.to_string(),
        signature: signature.to_string(),
    };

    match payments.transition(record.id, &transition).await? {
        TransitionOutcome::Applied(paid) => {
            tracing::info!(
                payment_id = %paid.id,
                order_id = %paid.order_id,
                gateway_payment_id = %gateway_payment_id,
                "Payment marked paid"
            );
            let result = reconciler.reconcile_paid(&paid).await?;
            Ok(CaptureOutcome::Captured(VerifyPaymentOutput {
                payment_id: paid.id,
                status: paid.status,
                reconciliation_status: Some(ReconciliationStatus::Completed),
                reconciliation_result: Some(result),
            }))
        }
        TransitionOutcome::Conflict(current) => {
            tracing::debug!(
                payment_id = %current.id,
                status = %current.status,
                "Concurrent transition won, returning stored state"
            );
            match current.status {
                PaymentStatus::Failed => Ok(CaptureOutcome::AlreadyFailed(current)),
                _ => Ok(CaptureOutcome::AlreadyPaid(VerifyPaymentOutput::from_record(
                    &current,
                ))),
            }
        }
    }
}

pub struct VerifyPayment {
    payments: Arc<dyn PaymentRepository>,
    reconciler: Arc<Reconciler>,
    key_secret: String,
}

impl VerifyPayment {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        reconciler: Arc<Reconciler>,
        key_secret: String,
    ) -> Self {
        Self {
            payments,
            reconciler,
            key_secret,
        }
    }

    pub async fn execute(
        &self,
        input: VerifyPaymentInput,
    ) -> Result<VerifyPaymentOutput, AppError> {
        validate_gateway_id("gatewayOrderId", &input.gateway_order_id)?;
        validate_gateway_id("gatewayPaymentId", &input.gateway_payment_id)?;
        validate_identifier("gatewaySignature", &input.signature, SIGNATURE_MAX_LEN)?;

        let record = self
            .lookup(input.payment_id, &input.gateway_order_id)
            .await?;
        input.caller.ensure_can_access(&record)?;

        // Always the stored order id: a signature minted for another order
        // must not settle this one.
        match verify_payment_signature(
            &self.key_secret,
            &record.gateway_order_id,
            &input.gateway_payment_id,
            &input.signature,
        ) {
            Ok(()) => {}
            Err(SignatureError::InvalidSecret) => {
                return Err(AppError::Internal("checkout signing secret is unusable".to_string()))
            }
            Err(_) => return self.reject(&record).await,
        }

        match capture(
            self.payments.as_ref(),
            &self.reconciler,
            &record,
            &input.gateway_payment_id,
            &input.signature,
        )
        .await?
        {
            CaptureOutcome::Captured(output) => Ok(output),
            CaptureOutcome::AlreadyPaid(output) => {
                tracing::info!(
                    payment_id = %output.payment_id,
                    "Duplicate verification, returning stored result"
                );
                Ok(output)
            }
            CaptureOutcome::AlreadyFailed(current) => Err(AppError::InvalidState(format!(
                "payment {} has already failed ({}); start a new order",
                current.id,
                current.error_code.as_deref().unwrap_or("unknown")
            ))),
        }
    }

    async fn lookup(
        &self,
        payment_id: Option<Uuid>,
        gateway_order_id: &str,
    ) -> Result<PaymentRecord, AppError> {
        if let Some(id) = payment_id {
            if let Some(record) = self.payments.get_by_id(id).await? {
                return Ok(record);
            }
        }

        self.payments
            .find_by_order_id(gateway_order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("payment for order {}", gateway_order_id)))
    }

    async fn reject(&self, record: &PaymentRecord) -> Result<VerifyPaymentOutput, AppError> {
        tracing::warn!(
            payment_id = %record.id,
            order_id = %record.order_id,
            "Payment signature mismatch"
        );

        if record.status == PaymentStatus::Created {
            let transition = PaymentTransition::Failed {
                error_code: SIGNATURE_MISMATCH.to_string(),
                error_description: Some("payment signature verification failed".to_string()),
            };
            if let TransitionOutcome::Conflict(current) =
                self.payments.transition(record.id, &transition).await?
            {
                tracing::warn!(
                    payment_id = %current.id,
                    status = %current.status,
                    "Mismatched signature arrived after the record had moved"
                );
            }
        }

        Err(AppError::SignatureMismatch {
            payment_id: Some(record.id),
        })
    }
}

//! Gateway-originated notifications. The body has already been authenticated
//! by its signature header; anything the core does not act on is acknowledged
//! so the gateway stops redelivering it. A failed attempt never fails the
//! record: the customer may retry checkout against the same order.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::domain::{PaymentRecord, PaymentStatus};
use crate::error::AppError;
use crate::gateway::signature::sign_payment;
use crate::ports::PaymentRepository;

use super::verify_payment::{capture, CaptureOutcome};
use super::Reconciler;

pub const EVENT_PAYMENT_CAPTURED: &str = "payment.captured";
pub const EVENT_ORDER_PAID: &str = "order.paid";
pub const EVENT_PAYMENT_FAILED: &str = "payment.failed";

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event: String,
    #[serde(default)]
    payload: WebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookPayload {
    payment: Option<Entity<WebhookPayment>>,
    order: Option<Entity<WebhookOrder>>,
}

#[derive(Debug, Deserialize)]
struct Entity<T> {
    entity: T,
}

#[derive(Debug, Deserialize)]
struct WebhookPayment {
    id: String,
    order_id: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookOrder {
    id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum WebhookOutcome {
    /// The record moved to `paid` and was reconciled.
    Processed,
    /// Paid, but reconciliation failed and awaits a retry.
    ReconciliationFailed,
    /// A checkout attempt failed; the record stays open for another attempt.
    AttemptFailed,
    /// Already in the state the event describes.
    Duplicate,
    /// A capture for a record that had already failed; needs a manual refund.
    CapturedAfterFailure,
    /// Unknown order or an event this core does not handle.
    Ignored,
}

pub struct GatewayWebhook {
    payments: Arc<dyn PaymentRepository>,
    reconciler: Arc<Reconciler>,
    key_secret: String,
}

impl GatewayWebhook {
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

    pub async fn handle(&self, body: &[u8]) -> Result<WebhookOutcome, AppError> {
        let envelope: WebhookEnvelope = serde_json::from_slice(body)
            .map_err(|e| AppError::Validation(format!("malformed webhook payload: {}", e)))?;

        let event = envelope.event.as_str();
        if ![EVENT_PAYMENT_CAPTURED, EVENT_ORDER_PAID, EVENT_PAYMENT_FAILED].contains(&event) {
            tracing::debug!(event = %event, "Ignoring webhook event");
            return Ok(WebhookOutcome::Ignored);
        }

        let Some(payment) = envelope.payload.payment.map(|p| p.entity) else {
            return Err(AppError::Validation(format!(
                "{} webhook carries no payment entity",
                event
            )));
        };
        let Some(order_id) = payment
            .order_id
            .clone()
            .or_else(|| envelope.payload.order.map(|o| o.entity.id))
        else {
            tracing::warn!(
                event = %event,
                gateway_payment_id = %payment.id,
                "Webhook payment has no order id"
            );
            return Ok(WebhookOutcome::Ignored);
        };

        let Some(record) = self.payments.find_by_order_id(&order_id).await? else {
            tracing::warn!(event = %event, order_id = %order_id, "Webhook for unknown order");
            return Ok(WebhookOutcome::Ignored);
        };

        if event == EVENT_PAYMENT_FAILED {
            return Ok(failed_attempt(&record, &payment));
        }

        let signature = sign_payment(&self.key_secret, &record.gateway_order_id, &payment.id)
            .map_err(|e| AppError::Internal(e.to_string()))?;

        match capture(
            self.payments.as_ref(),
            &self.reconciler,
            &record,
            &payment.id,
            &signature,
        )
        .await
        {
            Ok(CaptureOutcome::Captured(_)) => Ok(WebhookOutcome::Processed),
            Ok(CaptureOutcome::AlreadyPaid(_)) => Ok(WebhookOutcome::Duplicate),
            Ok(CaptureOutcome::AlreadyFailed(current)) => {
                tracing::error!(
                    payment_id = %current.id,
                    order_id = %current.order_id,
                    gateway_payment_id = %payment.id,
                    error_code = ?current.error_code,
                    "Gateway captured a payment whose record had failed; manual refund required"
                );
                Ok(WebhookOutcome::CapturedAfterFailure)
            }
            // Already logged and recorded; redelivery would not retry it.
            Err(AppError::Reconciliation { .. }) => Ok(WebhookOutcome::ReconciliationFailed),
            Err(e) => Err(e),
        }
    }
}

fn failed_attempt(record: &PaymentRecord, payment: &WebhookPayment) -> WebhookOutcome {
    if record.status != PaymentStatus::Created {
        tracing::debug!(
            payment_id = %record.id,
            status = %record.status,
            gateway_payment_id = %payment.id,
            "Ignoring failed attempt for settled payment"
        );
        return WebhookOutcome::Ignored;
    }
    tracing::info!(
        payment_id = %record.id,
        gateway_payment_id = %payment.id,
        error_code = ?payment.error_code,
        error_description = ?payment.error_description,
        "Checkout attempt failed at gateway"
    );
    WebhookOutcome::AttemptFailed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_captured_payload() {
        let body = br#"{
            "entity": "event",
            "event": "payment.captured",
            "payload": {
                "payment": {"entity": {
                    "id": "pay_1",
                    "order_id": "order_1",
                    "status": "captured",
                    "amount": 25000
                }}
            }
        }"#;
        let envelope: WebhookEnvelope = serde_json::from_slice(body).unwrap();
        assert_eq!(envelope.event, EVENT_PAYMENT_CAPTURED);
        let payment = envelope.payload.payment.unwrap().entity;
        assert_eq!(payment.order_id.as_deref(), Some("order_1"));
    }

    #[test]
    fn outcome_serializes_camel_case() {
        assert_eq!(
            serde_json::to_value(WebhookOutcome::CapturedAfterFailure).unwrap(),
            "capturedAfterFailure"
        );
        assert_eq!(
            serde_json::to_value(WebhookOutcome::AttemptFailed).unwrap(),
            "attemptFailed"
        );
    }
}

//! Payment domain entity and its status lifecycle.
//! Framework-agnostic; storage adapters map rows onto these types.

use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::validation::ValidationError;

pub const SIGNATURE_MISMATCH: &str = "SIGNATURE_MISMATCH";
pub const VERIFICATION_ATTEMPTS_EXHAUSTED: &str = "VERIFICATION_ATTEMPTS_EXHAUSTED";
pub const PAYMENT_FAILED: &str = "PAYMENT_FAILED";

/// Manual re-verifications allowed before a record is force-failed.
pub const MAX_VERIFICATION_ATTEMPTS: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Created,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Created => "created",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    /// Forward-only lifecycle: `created -> paid | failed`, `paid -> refunded`.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Created, PaymentStatus::Paid)
                | (PaymentStatus::Created, PaymentStatus::Failed)
                | (PaymentStatus::Paid, PaymentStatus::Refunded)
        )
    }

    /// Whether money has been captured for this record.
    pub fn is_settled(&self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::Refunded)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(PaymentStatus::Created),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(ValidationError::new(
                "status",
                format!("unknown payment status '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentType {
    Event,
    Subscription,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Event => "event",
            PaymentType::Subscription => "subscription",
        }
    }
}

impl fmt::Display for PaymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event" => Ok(PaymentType::Event),
            "subscription" => Ok(PaymentType::Subscription),
            other => Err(ValidationError::new(
                "paymentType",
                format!("must be one of: event, subscription (got '{}')", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReconciliationStatus {
    Pending,
    Completed,
    Failed,
}

impl ReconciliationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationStatus::Pending => "pending",
            ReconciliationStatus::Completed => "completed",
            ReconciliationStatus::Failed => "failed",
        }
    }
}

impl FromStr for ReconciliationStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReconciliationStatus::Pending),
            "completed" => Ok(ReconciliationStatus::Completed),
            "failed" => Ok(ReconciliationStatus::Failed),
            other => Err(ValidationError::new(
                "reconciliationStatus",
                format!("unknown reconciliation status '{}'", other),
            )),
        }
    }
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    pub event_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtotal: Option<BigDecimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionMetadata {
    pub plan_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtotal: Option<BigDecimal>,
}

/// Reconciliation inputs, one shape per payment type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PaymentMetadata {
    Event(EventMetadata),
    Subscription(SubscriptionMetadata),
}

impl PaymentMetadata {
    /// Parses a loosely shaped metadata object into the variant `payment_type` requires.
    pub fn parse(
        payment_type: PaymentType,
        value: serde_json::Value,
    ) -> Result<Self, ValidationError> {
        let parsed = match payment_type {
            PaymentType::Event => serde_json::from_value(value).map(PaymentMetadata::Event),
            PaymentType::Subscription => {
                serde_json::from_value(value).map(PaymentMetadata::Subscription)
            }
        };

        let metadata = parsed.map_err(|e| {
            ValidationError::new(
                "metadata",
                format!("invalid {} metadata: {}", payment_type, e),
            )
        })?;

        if let PaymentMetadata::Event(event) = &metadata {
            if event.event_id.trim().is_empty() {
                return Err(ValidationError::new("metadata.eventId", "must not be empty"));
            }
            if event.quantity == 0 {
                return Err(ValidationError::new(
                    "metadata.quantity",
                    "must be greater than zero",
                ));
            }
        }
        if let PaymentMetadata::Subscription(subscription) = &metadata {
            if subscription.plan_id.trim().is_empty() {
                return Err(ValidationError::new("metadata.planId", "must not be empty"));
            }
        }

        Ok(metadata)
    }

    pub fn payment_type(&self) -> PaymentType {
        match self {
            PaymentMetadata::Event(_) => PaymentType::Event,
            PaymentMetadata::Subscription(_) => PaymentType::Subscription,
        }
    }

    pub fn subtotal(&self) -> Option<&BigDecimal> {
        match self {
            PaymentMetadata::Event(event) => event.subtotal.as_ref(),
            PaymentMetadata::Subscription(subscription) => subscription.subtotal.as_ref(),
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

/// Coupon terms as they were when the order was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CouponSnapshot {
    pub code: String,
    pub discount_type: DiscountType,
    #[schema(value_type = String)]
    pub discount_value: BigDecimal,
    #[schema(value_type = String)]
    pub discount_amount: BigDecimal,
}

/// What the reconciliation handler did once the payment was captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ReconciliationResult {
    #[serde(rename_all = "camelCase")]
    Booking {
        booking_id: String,
        payment_status: String,
    },
    /// No booking existed yet; it is created downstream.
    #[serde(rename_all = "camelCase")]
    BookingPending {
        reference_id: String,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Subscription {
        subscription_id: String,
        plan_id: String,
        plan_name: String,
        status: String,
        renewal_date: DateTime<Utc>,
    },
}

/// A forward move in the lifecycle together with the data it must carry.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentTransition {
    Paid {
        gateway_payment_id: String,
        signature: String,
    },
    Failed {
        error_code: String,
        error_description: Option<String>,
    },
    Refunded {
        refund_id: String,
        refund_amount: BigDecimal,
        refunded_at: DateTime<Utc>,
        reason: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: PaymentStatus,
    pub to: PaymentStatus,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot move payment from {} to {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

impl PaymentTransition {
    pub fn target(&self) -> PaymentStatus {
        match self {
            PaymentTransition::Paid { .. } => PaymentStatus::Paid,
            PaymentTransition::Failed { .. } => PaymentStatus::Failed,
            PaymentTransition::Refunded { .. } => PaymentStatus::Refunded,
        }
    }

    /// The only status this transition may start from.
    pub fn source(&self) -> PaymentStatus {
        match self {
            PaymentTransition::Paid { .. } | PaymentTransition::Failed { .. } => {
                PaymentStatus::Created
            }
            PaymentTransition::Refunded { .. } => PaymentStatus::Paid,
        }
    }

    /// Applies the transition in memory. Storage adapters express the same
    /// rules as a conditional update.
    pub fn apply(&self, record: &mut PaymentRecord) -> Result<(), InvalidTransition> {
        let target = self.target();
        if record.status != self.source() || !record.status.can_transition_to(target) {
            return Err(InvalidTransition {
                from: record.status,
                to: target,
            });
        }

        match self {
            PaymentTransition::Paid {
                gateway_payment_id,
                signature,
            } => {
                record.gateway_payment_id = Some(gateway_payment_id.clone());
                record.signature = Some(signature.clone());
                record.reconciliation_status = Some(ReconciliationStatus::Pending);
            }
            PaymentTransition::Failed {
                error_code,
                error_description,
            } => {
                record.error_code = Some(error_code.clone());
                record.error_description = error_description.clone();
            }
            PaymentTransition::Refunded {
                refund_id,
                refund_amount,
                refunded_at,
                reason,
            } => {
                record.refund_id = Some(refund_id.clone());
                record.refund_amount = Some(refund_amount.clone());
                record.refunded_at = Some(*refunded_at);
                record.refund_reason = reason.clone();
                record.refund_claimed_at = None;
            }
        }

        record.status = target;
        record.updated_at = Utc::now();
        Ok(())
    }
}

/// One payment attempt. Never deleted: it is the audit trail of money movement.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub id: Uuid,
    pub user_id: String,
    #[schema(value_type = String)]
    pub amount: BigDecimal,
    pub amount_minor: i64,
    pub currency: String,
    pub order_id: String,
    pub gateway_order_id: String,
    pub receipt: String,
    pub payment_type: PaymentType,
    pub reference_id: String,
    pub status: PaymentStatus,
    pub gateway_payment_id: Option<String>,
    pub signature: Option<String>,
    pub error_code: Option<String>,
    pub error_description: Option<String>,
    pub refund_id: Option<String>,
    #[schema(value_type = Option<String>)]
    pub refund_amount: Option<BigDecimal>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refund_reason: Option<String>,
    /// Set while a refund is outstanding at the gateway.
    pub refund_claimed_at: Option<DateTime<Utc>>,
    pub coupon: Option<CouponSnapshot>,
    #[schema(value_type = Option<String>)]
    pub original_amount: Option<BigDecimal>,
    #[schema(value_type = Option<String>)]
    pub discounted_amount: Option<BigDecimal>,
    #[schema(value_type = Object)]
    pub metadata: PaymentMetadata,
    pub verification_attempts: i32,
    pub reconciliation_status: Option<ReconciliationStatus>,
    pub reconciliation_result: Option<ReconciliationResult>,
    pub reconciliation_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything the order orchestrator knows when it persists a new record.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub user_id: String,
    pub amount: BigDecimal,
    pub amount_minor: i64,
    pub currency: String,
    pub gateway_order_id: String,
    pub receipt: String,
    pub reference_id: String,
    pub metadata: PaymentMetadata,
    pub coupon: Option<CouponSnapshot>,
    pub original_amount: Option<BigDecimal>,
    pub discounted_amount: Option<BigDecimal>,
}

impl PaymentRecord {
    pub fn new(input: NewPayment) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            amount: input.amount,
            amount_minor: input.amount_minor,
            currency: input.currency,
            order_id: input.gateway_order_id.clone(),
            gateway_order_id: input.gateway_order_id,
            receipt: input.receipt,
            payment_type: input.metadata.payment_type(),
            reference_id: input.reference_id,
            status: PaymentStatus::Created,
            gateway_payment_id: None,
            signature: None,
            error_code: None,
            error_description: None,
            refund_id: None,
            refund_amount: None,
            refunded_at: None,
            refund_reason: None,
            refund_claimed_at: None,
            coupon: input.coupon,
            original_amount: input.original_amount,
            discounted_amount: input.discounted_amount,
            metadata: input.metadata,
            verification_attempts: 0,
            reconciliation_status: None,
            reconciliation_result: None,
            reconciliation_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

//! Order creation: validate the request, price it in minor units, open a
//! gateway order, then persist the payment record.

use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::money::{from_minor_units, to_minor_units};
use crate::domain::receipt::build_receipt;
use crate::domain::{
    CouponSnapshot, DiscountType, NewPayment, PaymentMetadata, PaymentRecord, PaymentType,
};
use crate::error::AppError;
use crate::gateway::{CreateOrderRequest, Notes, PaymentGateway};
use crate::ports::{CatalogLookup, PaymentRepository, RepositoryError};
use crate::validation::{
    sanitize_string, validate_identifier, validate_non_negative_amount, COUPON_CODE_MAX_LEN,
    REFERENCE_ID_MAX_LEN,
};

use super::Caller;

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CouponInput {
    pub code: String,
    pub discount_type: DiscountType,
    #[schema(value_type = String)]
    pub discount_value: BigDecimal,
    #[schema(value_type = String)]
    pub discount_amount: BigDecimal,
}

#[derive(Debug, Clone)]
pub struct CreateOrderInput {
    pub caller: Caller,
    pub amount: BigDecimal,
    pub payment_type: PaymentType,
    pub reference_id: String,
    pub metadata: serde_json::Value,
    pub coupon: Option<CouponInput>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderOutput {
    pub order_id: String,
    #[schema(value_type = String)]
    pub amount: BigDecimal,
    pub amount_minor: i64,
    pub currency: String,
    pub receipt: String,
    pub payment_id: Uuid,
    pub gateway_client_key: String,
}

pub struct CreateOrder {
    payments: Arc<dyn PaymentRepository>,
    catalog: Arc<dyn CatalogLookup>,
    gateway: Arc<dyn PaymentGateway>,
    currency: String,
    min_amount_minor: i64,
}

impl CreateOrder {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        catalog: Arc<dyn CatalogLookup>,
        gateway: Arc<dyn PaymentGateway>,
        currency: String,
        min_amount_minor: i64,
    ) -> Self {
        Self {
            payments,
            catalog,
            gateway,
            currency,
            min_amount_minor,
        }
    }

    pub async fn execute(&self, input: CreateOrderInput) -> Result<CreateOrderOutput, AppError> {
        let reference_id = sanitize_string(&input.reference_id);
        validate_identifier("referenceId", &reference_id, REFERENCE_ID_MAX_LEN)?;

        let metadata = PaymentMetadata::parse(input.payment_type, input.metadata)?;
        let coupon = input.coupon.map(snapshot_coupon).transpose()?;

        // Everything that can be rejected is rejected before the gateway is called.
        let amount_minor = to_minor_units(&input.amount, self.min_amount_minor)?;
        self.ensure_reference_exists(&metadata).await?;

        let (original_amount, discounted_amount) = match &coupon {
            Some(coupon) => {
                let original = metadata
                    .subtotal()
                    .cloned()
                    .unwrap_or_else(|| &input.amount + &coupon.discount_amount);
                (Some(original), Some(from_minor_units(amount_minor)))
            }
            None => (None, None),
        };

        let receipt = build_receipt(input.payment_type, &reference_id, Utc::now());
        let mut notes = Notes::new();
        notes.insert("paymentType".to_string(), input.payment_type.to_string());
        notes.insert("referenceId".to_string(), reference_id.clone());
        notes.insert("userId".to_string(), input.caller.user_id.clone());

        let order = self
            .gateway
            .create_order(&CreateOrderRequest {
                amount_minor,
                currency: self.currency.clone(),
                receipt: receipt.clone(),
                notes,
            })
            .await
            .map_err(|e| {
                tracing::warn!(receipt = %receipt, error = %e, "Gateway order creation failed");
                AppError::from(e)
            })?;

        if order.amount != amount_minor {
            tracing::error!(
                gateway_order_id = %order.id,
                requested = amount_minor,
                returned = order.amount,
                "Gateway order amount does not match request"
            );
            return Err(AppError::GatewayUnavailable(
                "gateway returned an order for a different amount".to_string(),
            ));
        }

        let record = PaymentRecord::new(NewPayment {
            user_id: input.caller.user_id,
            amount: from_minor_units(amount_minor),
            amount_minor,
            currency: self.currency.clone(),
            gateway_order_id: order.id.clone(),
            receipt: receipt.clone(),
            reference_id,
            metadata,
            coupon,
            original_amount,
            discounted_amount,
        });

        let stored = self.payments.insert(&record).await.map_err(|e| {
            tracing::error!(
                gateway_order_id = %order.id,
                error = %e,
                "Gateway order created but payment record could not be stored"
            );
            match e {
                RepositoryError::Conflict(msg) => {
                    AppError::Internal(format!("order id already recorded: {}", msg))
                }
                other => AppError::from(other),
            }
        })?;

        tracing::info!(
            payment_id = %stored.id,
            order_id = %stored.order_id,
            payment_type = %stored.payment_type,
            amount_minor = stored.amount_minor,
            "Payment order created"
        );

        Ok(CreateOrderOutput {
            order_id: stored.order_id,
            amount: stored.amount,
            amount_minor: stored.amount_minor,
            currency: stored.currency,
            receipt: stored.receipt,
            payment_id: stored.id,
            gateway_client_key: self.gateway.client_key().to_string(),
        })
    }

    async fn ensure_reference_exists(&self, metadata: &PaymentMetadata) -> Result<(), AppError> {
        match metadata {
            PaymentMetadata::Event(event) => {
                self.catalog
                    .find_event(&event.event_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("event {}", event.event_id)))?;
            }
            PaymentMetadata::Subscription(subscription) => {
                let plan = self
                    .catalog
                    .find_plan(&subscription.plan_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::NotFound(format!("subscription plan {}", subscription.plan_id))
                    })?;
                if !plan.is_active {
                    return Err(AppError::Validation(format!(
                        "subscription plan {} is not active",
                        plan.id
                    )));
                }
            }
        }
        Ok(())
    }
}

fn snapshot_coupon(input: CouponInput) -> Result<CouponSnapshot, AppError> {
    let code = sanitize_string(&input.code).to_uppercase();
    validate_identifier("coupon.code", &code, COUPON_CODE_MAX_LEN)?;
    validate_non_negative_amount("coupon.discountValue", &input.discount_value)?;
    validate_non_negative_amount("coupon.discountAmount", &input.discount_amount)?;

    if input.discount_type == DiscountType::Percentage
        && input.discount_value > BigDecimal::from(100)
    {
        return Err(AppError::Validation(
            "coupon.discountValue: percentage must be at most 100".to_string(),
        ));
    }

    Ok(CouponSnapshot {
        code,
        discount_type: input.discount_type,
        discount_value: input.discount_value,
        discount_amount: input.discount_amount,
    })
}

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::domain::{PaymentRecord, PaymentStatus, PaymentType};
use crate::error::AppError;
use crate::middleware::auth::CallerIdentity;
use crate::ports::{Page, PaymentFilter};
use crate::use_cases::{
    CouponInput, CreateOrderInput, CreateOrderOutput, VerifyPaymentInput, VerifyPaymentOutput,
};
use crate::AppState;

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[schema(value_type = String, example = "250.00")]
    pub amount: BigDecimal,
    /// `event` or `subscription`
    pub payment_type: String,
    pub reference_id: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
    pub coupon: Option<CouponInput>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    #[serde(alias = "razorpay_order_id")]
    pub gateway_order_id: String,
    #[serde(alias = "razorpay_payment_id")]
    pub gateway_payment_id: String,
    #[serde(alias = "razorpay_signature")]
    pub gateway_signature: String,
    pub payment_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ListPaymentsQuery {
    pub status: Option<String>,
    pub payment_type: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ListPaymentsQuery {
    /// Builds a store filter, rejecting unknown statuses and out-of-range paging.
    pub fn into_filter(self, user_id: Option<String>) -> Result<PaymentFilter, AppError> {
        let page = self.page.unwrap_or(1);
        if page == 0 {
            return Err(AppError::Validation("page: must be at least 1".to_string()));
        }
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(AppError::Validation(format!(
                "limit: must be between 1 and {}",
                MAX_PAGE_LIMIT
            )));
        }

        Ok(PaymentFilter {
            user_id,
            status: self
                .status
                .as_deref()
                .map(str::parse::<PaymentStatus>)
                .transpose()?,
            payment_type: self
                .payment_type
                .as_deref()
                .map(str::parse::<PaymentType>)
                .transpose()?,
            page,
            limit,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub pages: i64,
}

impl Pagination {
    pub fn new(page: u32, limit: u32, total: i64) -> Self {
        let limit_i = i64::from(limit.max(1));
        Self {
            page,
            limit,
            total,
            pages: (total + limit_i - 1) / limit_i,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentListResponse {
    pub payments: Vec<PaymentRecord>,
    pub pagination: Pagination,
}

impl PaymentListResponse {
    pub fn new(filter: &PaymentFilter, page: Page<PaymentRecord>) -> Self {
        Self {
            payments: page.items,
            pagination: Pagination::new(filter.page, filter.limit, page.total),
        }
    }
}

#[utoipa::path(
    post,
    path = "/payments/orders",
    request_body = CreateOrderRequest,
    params(
        ("x-user-id" = String, Header, description = "Authenticated caller"),
        (
            "Idempotency-Key" = Option<String>,
            Header,
            description = "Replays the first successful response"
        )
    ),
    responses(
        (status = 201, description = "Gateway order created", body = CreateOrderOutput),
        (status = 400, description = "Invalid amount or request"),
        (status = 404, description = "Referenced event or plan not found"),
        (status = 503, description = "Gateway unavailable")
    ),
    tag = "Payments"
)]
pub async fn create_order(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, AppError> {
    let payment_type: PaymentType = payload.payment_type.parse()?;

    let output = state
        .create_order
        .execute(CreateOrderInput {
            caller,
            amount: payload.amount,
            payment_type,
            reference_id: payload.reference_id,
            metadata: payload.metadata,
            coupon: payload.coupon,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(output)))
}

#[utoipa::path(
    post,
    path = "/payments/verify",
    request_body = VerifyPaymentRequest,
    params(("x-user-id" = String, Header, description = "Authenticated caller")),
    responses(
        (
            status = 200,
            description = "Payment verified (or already verified)",
            body = VerifyPaymentOutput
        ),
        (status = 400, description = "Signature mismatch"),
        (status = 404, description = "Payment not found"),
        (status = 500, description = "Payment captured but reconciliation failed")
    ),
    tag = "Payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Json(payload): Json<VerifyPaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let output = state
        .verify_payment
        .execute(VerifyPaymentInput {
            caller,
            gateway_order_id: payload.gateway_order_id,
            gateway_payment_id: payload.gateway_payment_id,
            signature: payload.gateway_signature,
            payment_id: payload.payment_id,
        })
        .await?;

    Ok(Json(output))
}

#[utoipa::path(
    get,
    path = "/payments/mine",
    params(
        ("x-user-id" = String, Header, description = "Authenticated caller"),
        ListPaymentsQuery
    ),
    responses((status = 200, description = "Caller's payments", body = PaymentListResponse)),
    tag = "Payments"
)]
pub async fn my_payments(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Query(query): Query<ListPaymentsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = query.into_filter(Some(caller.user_id))?;
    let page = state.payments.list(&filter).await?;

    Ok(Json(PaymentListResponse::new(&filter, page)))
}

#[utoipa::path(
    get,
    path = "/payments/{id}",
    params(
        ("id" = Uuid, Path, description = "Payment id"),
        ("x-user-id" = String, Header, description = "Authenticated caller")
    ),
    responses(
        (status = 200, description = "Payment record", body = PaymentRecord),
        (status = 403, description = "Payment belongs to another user"),
        (status = 404, description = "Payment not found")
    ),
    tag = "Payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let record = state
        .payments
        .get_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("payment {}", id)))?;
    caller.ensure_can_access(&record)?;

    Ok(Json(record))
}

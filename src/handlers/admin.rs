use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::payments::{ListPaymentsQuery, PaymentListResponse, Pagination};
use crate::domain::{PaymentRecord, PaymentStatus, ReconciliationResult};
use crate::error::AppError;
use crate::use_cases::{RefundInput, RefundOutput, ReverifyInput, ReverifyOutput};
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub payment_id: Uuid,
    /// Defaults to the full payment amount.
    #[schema(value_type = Option<String>)]
    pub amount: Option<BigDecimal>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReverifyRequest {
    pub gateway_payment_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusStatsView {
    pub status: PaymentStatus,
    pub count: i64,
    #[schema(value_type = String)]
    pub total_amount: BigDecimal,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdminPaymentListResponse {
    pub payments: Vec<PaymentRecord>,
    pub pagination: Pagination,
    pub stats: Vec<StatusStatsView>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReconcileQuery {
    /// Take over a `pending` reconciliation without waiting for it to go stale.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResponse {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub reconciliation_result: ReconciliationResult,
}

#[utoipa::path(
    get,
    path = "/admin/payments",
    params(ListPaymentsQuery),
    responses(
        (
            status = 200,
            description = "All payments with per-status totals",
            body = AdminPaymentListResponse
        ),
        (status = 401, description = "Missing or invalid admin key")
    ),
    security(("admin_key" = [])),
    tag = "Admin"
)]
pub async fn list_payments(
    State(state): State<AppState>,
    Query(query): Query<ListPaymentsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = query.into_filter(None)?;
    let page = state.payments.list(&filter).await?;
    let stats = state.payments.stats_by_status(filter.payment_type).await?;

    let PaymentListResponse {
        payments,
        pagination,
    } = PaymentListResponse::new(&filter, page);

    Ok(Json(AdminPaymentListResponse {
        payments,
        pagination,
        stats: stats
            .into_iter()
            .map(|s| StatusStatsView {
                status: s.status,
                count: s.count,
                total_amount: s.total_amount,
            })
            .collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/admin/payments/refund",
    request_body = RefundRequest,
    responses(
        (status = 200, description = "Payment refunded", body = RefundOutput),
        (status = 400, description = "Refund amount invalid"),
        (status = 404, description = "Payment not found"),
        (status = 409, description = "Payment is not paid"),
        (status = 422, description = "Gateway rejected the refund")
    ),
    security(("admin_key" = [])),
    tag = "Admin"
)]
pub async fn refund_payment(
    State(state): State<AppState>,
    Json(payload): Json<RefundRequest>,
) -> Result<impl IntoResponse, AppError> {
    let output = state
        .refund_payment
        .execute(RefundInput {
            payment_id: payload.payment_id,
            amount: payload.amount,
            reason: payload.reason,
        })
        .await?;

    Ok(Json(output))
}

#[utoipa::path(
    post,
    path = "/admin/payments/{id}/reverify",
    params(("id" = Uuid, Path, description = "Payment id")),
    request_body = ReverifyRequest,
    responses(
        (status = 200, description = "Re-verification result", body = ReverifyOutput),
        (status = 422, description = "Verification attempts exhausted")
    ),
    security(("admin_key" = [])),
    tag = "Admin"
)]
pub async fn reverify_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReverifyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let output = state
        .reverify_payment
        .execute(ReverifyInput {
            payment_id: id,
            gateway_payment_id: payload.gateway_payment_id,
        })
        .await?;

    Ok(Json(output))
}

#[utoipa::path(
    post,
    path = "/admin/payments/{id}/reconcile",
    params(("id" = Uuid, Path, description = "Payment id"), ReconcileQuery),
    responses(
        (status = 200, description = "Reconciliation result", body = ReconcileResponse),
        (status = 409, description = "Payment not paid or reconciliation in progress"),
        (status = 500, description = "Reconciliation failed again")
    ),
    security(("admin_key" = [])),
    tag = "Admin"
)]
pub async fn reconcile_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ReconcileQuery>,
) -> Result<impl IntoResponse, AppError> {
    let (record, result) = state.reconciler.retry(id, query.force).await?;

    Ok(Json(ReconcileResponse {
        payment_id: record.id,
        status: record.status,
        reconciliation_result: result,
    }))
}

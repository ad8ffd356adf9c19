use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::domain::{
    CouponSnapshot, DiscountType, PaymentRecord, PaymentStatus, PaymentType,
    ReconciliationResult, ReconciliationStatus,
};
use crate::handlers::{self, admin, payments, webhook};
use crate::use_cases::{
    CouponInput, CreateOrderOutput, RefundOutput, ReverifyOutput, VerifyPaymentOutput,
    WebhookOutcome,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Ticketing Payments API",
        description = "Gateway orders, payment verification, reconciliation and refunds"
    ),
    paths(
        handlers::health,
        payments::create_order,
        payments::verify_payment,
        payments::my_payments,
        payments::get_payment,
        webhook::gateway_webhook,
        admin::list_payments,
        admin::refund_payment,
        admin::reverify_payment,
        admin::reconcile_payment,
    ),
    components(schemas(
        handlers::HealthStatus,
        payments::CreateOrderRequest,
        payments::VerifyPaymentRequest,
        payments::Pagination,
        payments::PaymentListResponse,
        admin::RefundRequest,
        admin::ReverifyRequest,
        admin::StatusStatsView,
        admin::AdminPaymentListResponse,
        admin::ReconcileResponse,
        webhook::WebhookAck,
        CouponInput,
        CreateOrderOutput,
        VerifyPaymentOutput,
        RefundOutput,
        ReverifyOutput,
        WebhookOutcome,
        PaymentRecord,
        PaymentStatus,
        PaymentType,
        ReconciliationStatus,
        ReconciliationResult,
        CouponSnapshot,
        DiscountType,
    )),
    modifiers(&AdminKey),
    tags(
        (name = "Payments", description = "Order creation, verification and gateway callbacks"),
        (name = "Admin", description = "Operator endpoints behind the admin API key"),
        (name = "Health", description = "Liveness and dependency status")
    )
)]
pub struct ApiDoc;

struct AdminKey;

impl Modify for AdminKey {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "admin_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("Authorization"))),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        for expected in [
            "/health",
            "/payments/orders",
            "/payments/verify",
            "/payments/mine",
            "/payments/{id}",
            "/payments/webhook",
            "/admin/payments",
            "/admin/payments/refund",
            "/admin/payments/{id}/reverify",
            "/admin/payments/{id}/reconcile",
        ] {
            assert!(
                paths.iter().any(|p| p.as_str() == expected),
                "missing {}",
                expected
            );
        }
    }

    #[test]
    fn admin_security_scheme_registered() {
        let doc = ApiDoc::openapi();
        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("admin_key"));
    }
}

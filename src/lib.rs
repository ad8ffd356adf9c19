pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod middleware;
pub mod openapi;
pub mod ports;
pub mod use_cases;
pub mod validation;

use std::sync::Arc;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::adapters::{PostgresMarketplace, PostgresPaymentRepository};
use crate::config::{Config, GatewayConfig};
use crate::gateway::{PaymentGateway, RazorpayClient};
use crate::middleware::idempotency::{
    idempotency_middleware, IdempotencyStore, RedisIdempotencyStore,
};
use crate::ports::{BookingService, CatalogLookup, PaymentRepository, SubscriptionService};
use crate::use_cases::{
    CreateOrder, GatewayWebhook, Reconciler, RefundPayment, ReverifyPayment, VerifyPayment,
};

#[derive(Clone)]
pub struct AppState {
    pub payments: Arc<dyn PaymentRepository>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub create_order: Arc<CreateOrder>,
    pub verify_payment: Arc<VerifyPayment>,
    pub refund_payment: Arc<RefundPayment>,
    pub reverify_payment: Arc<ReverifyPayment>,
    pub reconciler: Arc<Reconciler>,
    pub webhook: Arc<GatewayWebhook>,
    pub webhook_secret: String,
    pub admin_api_key: String,
    pub idempotency: Option<Arc<dyn IdempotencyStore>>,
}

/// Everything the use cases talk to. Production wires Postgres and Razorpay;
/// tests wire in-memory fakes.
pub struct Ports {
    pub payments: Arc<dyn PaymentRepository>,
    pub catalog: Arc<dyn CatalogLookup>,
    pub bookings: Arc<dyn BookingService>,
    pub subscriptions: Arc<dyn SubscriptionService>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub idempotency: Option<Arc<dyn IdempotencyStore>>,
}

impl AppState {
    pub fn new(ports: Ports, gateway_config: &GatewayConfig, admin_api_key: String) -> Self {
        let reconciler = Arc::new(Reconciler::new(
            ports.payments.clone(),
            ports.catalog.clone(),
            ports.bookings,
            ports.subscriptions,
        ));

        Self {
            create_order: Arc::new(CreateOrder::new(
                ports.payments.clone(),
                ports.catalog,
                ports.gateway.clone(),
                gateway_config.currency.clone(),
                gateway_config.min_amount_minor,
            )),
            verify_payment: Arc::new(VerifyPayment::new(
                ports.payments.clone(),
                reconciler.clone(),
                gateway_config.key_secret.clone(),
            )),
            refund_payment: Arc::new(RefundPayment::new(
                ports.payments.clone(),
                ports.gateway.clone(),
            )),
            reverify_payment: Arc::new(ReverifyPayment::new(
                ports.payments.clone(),
                ports.gateway.clone(),
                reconciler.clone(),
                gateway_config.key_secret.clone(),
            )),
            webhook: Arc::new(GatewayWebhook::new(
                ports.payments.clone(),
                reconciler.clone(),
                gateway_config.key_secret.clone(),
            )),
            reconciler,
            payments: ports.payments,
            gateway: ports.gateway,
            webhook_secret: gateway_config.webhook_secret.clone(),
            admin_api_key,
            idempotency: ports.idempotency,
        }
    }
}

impl Ports {
    /// Postgres-backed stores, the Razorpay client and, when `REDIS_URL` is set,
    /// the Redis idempotency store.
    pub fn from_config(config: &Config, pool: sqlx::PgPool) -> anyhow::Result<Self> {
        let marketplace = Arc::new(PostgresMarketplace::new(pool.clone()));

        let idempotency: Option<Arc<dyn IdempotencyStore>> = match &config.redis_url {
            Some(url) => Some(Arc::new(RedisIdempotencyStore::new(url)?)),
            None => {
                tracing::warn!("REDIS_URL not set, idempotency keys are ignored");
                None
            }
        };

        Ok(Self {
            payments: Arc::new(PostgresPaymentRepository::new(pool)),
            catalog: marketplace.clone(),
            bookings: marketplace.clone(),
            subscriptions: marketplace,
            gateway: Arc::new(RazorpayClient::new(&config.gateway)),
            idempotency,
        })
    }
}

pub fn create_app(state: AppState) -> Router {
    let mut order_routes =
        Router::new().route("/payments/orders", post(handlers::payments::create_order));
    if let Some(store) = state.idempotency.clone() {
        order_routes = order_routes.layer(axum_middleware::from_fn_with_state(
            store,
            idempotency_middleware,
        ));
    }

    let admin_routes = Router::new()
        .route("/admin/payments", get(handlers::admin::list_payments))
        .route("/admin/payments/refund", post(handlers::admin::refund_payment))
        .route(
            "/admin/payments/:id/reverify",
            post(handlers::admin::reverify_payment),
        )
        .route(
            "/admin/payments/:id/reconcile",
            post(handlers::admin::reconcile_payment),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::admin_auth,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/payments/verify", post(handlers::payments::verify_payment))
        .route("/payments/webhook", post(handlers::webhook::gateway_webhook))
        .route("/payments/mine", get(handlers::payments::my_payments))
        .route("/payments/:id", get(handlers::payments::get_payment))
        .merge(order_routes)
        .merge(admin_routes)
        .with_state(state)
        .merge(
            SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()),
        )
        .layer(axum_middleware::from_fn(
            middleware::request_logger::request_logger_middleware,
        ))
        .layer(CorsLayer::permissive())
}

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use ticketing_payments::config::GatewayConfig;
use ticketing_payments::domain::{
    PaymentRecord, PaymentStatus, PaymentTransition, PaymentType, ReconciliationResult,
    ReconciliationStatus,
};
use ticketing_payments::gateway::signature::sign_payment;
use ticketing_payments::gateway::{
    CreateOrderRequest, GatewayError, GatewayOrder, GatewayPayment, GatewayPaymentStatus,
    GatewayRefund, PaymentGateway, RefundRequest,
};
use ticketing_payments::middleware::idempotency::{
    CachedResponse, IdempotencyStatus, IdempotencyStore,
};
use ticketing_payments::ports::{
    Booking, BookingService, CatalogLookup, EventSummary, OrganizerSubscription, Page,
    PaymentFilter, PaymentRepository, RepositoryError, RepositoryResult, StatusStats,
    SubscriptionPlan, SubscriptionService, SubscriptionUpsert, TransitionOutcome,
};
use ticketing_payments::use_cases::{Caller, CreateOrderInput};
use ticketing_payments::{create_app, AppState, Ports};

pub const KEY_SECRET: &str = "test_key_secret";
pub const WEBHOOK_SECRET: &str = "test_webhook_secret";
pub const ADMIN_KEY: &str = "admin-key-0123456789";
pub const CLIENT_KEY: &str = "rzp_test_client";

pub const EVENT_ID: &str = "event-1";
pub const PLAN_ID: &str = "plan-pro";
pub const INACTIVE_PLAN_ID: &str = "plan-legacy";
pub const BOOKING_ID: &str = "booking-1";
pub const ORGANIZER_ID: &str = "organizer-1";
pub const USER_ID: &str = "user-1";

pub fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

pub fn gateway_config() -> GatewayConfig {
    GatewayConfig {
        base_url: "https://api.razorpay.com".to_string(),
        key_id: CLIENT_KEY.to_string(),
        key_secret: KEY_SECRET.to_string(),
        webhook_secret: WEBHOOK_SECRET.to_string(),
        currency: "INR".to_string(),
        min_amount_minor: 100,
        timeout: Duration::from_secs(5),
        circuit_failure_threshold: 5,
        circuit_reset_secs: 30,
    }
}

pub fn checkout_signature(gateway_order_id: &str, gateway_payment_id: &str) -> String {
    sign_payment(KEY_SECRET, gateway_order_id, gateway_payment_id).unwrap()
}

// ---------------------------------------------------------------------------
// Payment store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryPayments {
    records: Mutex<HashMap<Uuid, PaymentRecord>>,
    pub unavailable: AtomicBool,
    /// Makes reconciliation bookkeeping writes fail until cleared.
    pub reconciliation_writes_down: AtomicBool,
}

impl InMemoryPayments {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, id: Uuid) -> PaymentRecord {
        self.records.lock().unwrap().get(&id).cloned().unwrap()
    }

    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn put(&self, record: PaymentRecord) {
        self.records.lock().unwrap().insert(record.id, record);
    }

    /// Pretends the record was last written `age` ago.
    pub fn backdate(&self, id: Uuid, age: chrono::Duration) {
        let mut records = self.records.lock().unwrap();
        let record = records.get_mut(&id).unwrap();
        record.updated_at = Utc::now() - age;
        if record.refund_claimed_at.is_some() {
            record.refund_claimed_at = Some(Utc::now() - age);
        }
    }

    fn check(&self) -> RepositoryResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPayments {
    async fn insert(&self, record: &PaymentRecord) -> RepositoryResult<PaymentRecord> {
        self.check()?;
        let mut records = self.records.lock().unwrap();
        if records
            .values()
            .any(|r| r.gateway_order_id == record.gateway_order_id)
        {
            return Err(RepositoryError::Conflict(record.gateway_order_id.clone()));
        }
        records.insert(record.id, record.clone());
        Ok(record.clone())
    }

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Option<PaymentRecord>> {
        self.check()?;
        Ok(self.records.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_order_id(&self, order_id: &str) -> RepositoryResult<Option<PaymentRecord>> {
        self.check()?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.order_id == order_id || r.gateway_order_id == order_id)
            .cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        transition: &PaymentTransition,
    ) -> RepositoryResult<TransitionOutcome> {
        self.check()?;
        // Let concurrent callers interleave between read and write.
        tokio::task::yield_now().await;
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("payment {}", id)))?;
        let mut updated = record.clone();
        match transition.apply(&mut updated) {
            Ok(()) => {
                *record = updated.clone();
                Ok(TransitionOutcome::Applied(updated))
            }
            Err(_) => Ok(TransitionOutcome::Conflict(record.clone())),
        }
    }

    async fn increment_verification_attempts(&self, id: Uuid) -> RepositoryResult<Option<i32>> {
        self.check()?;
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("payment {}", id)))?;
        if record.status != PaymentStatus::Created {
            return Ok(None);
        }
        record.verification_attempts += 1;
        Ok(Some(record.verification_attempts))
    }

    async fn set_reconciliation(
        &self,
        id: Uuid,
        status: ReconciliationStatus,
        result: Option<&ReconciliationResult>,
        error: Option<&str>,
    ) -> RepositoryResult<()> {
        self.check()?;
        if self.reconciliation_writes_down.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("write timed out".to_string()));
        }
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("payment {}", id)))?;
        record.reconciliation_status = Some(status);
        record.reconciliation_result = result.cloned();
        record.reconciliation_error = error.map(str::to_string);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn claim_reconciliation_retry(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        self.check()?;
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("payment {}", id)))?;
        let claimable = match record.reconciliation_status {
            Some(ReconciliationStatus::Failed) => true,
            Some(ReconciliationStatus::Pending) | None => record.updated_at < stale_before,
            Some(ReconciliationStatus::Completed) => false,
        };
        if record.status != PaymentStatus::Paid || !claimable {
            return Ok(false);
        }
        record.reconciliation_status = Some(ReconciliationStatus::Pending);
        record.reconciliation_error = None;
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn claim_refund(&self, id: Uuid, stale_before: DateTime<Utc>) -> RepositoryResult<bool> {
        self.check()?;
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("payment {}", id)))?;
        let held = record
            .refund_claimed_at
            .map_or(false, |claimed| claimed >= stale_before);
        if record.status != PaymentStatus::Paid || held {
            return Ok(false);
        }
        record.refund_claimed_at = Some(Utc::now());
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn release_refund(&self, id: Uuid) -> RepositoryResult<()> {
        self.check()?;
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.get_mut(&id) {
            if record.status == PaymentStatus::Paid {
                record.refund_claimed_at = None;
            }
        }
        Ok(())
    }

    async fn list(&self, filter: &PaymentFilter) -> RepositoryResult<Page<PaymentRecord>> {
        self.check()?;
        let mut matching: Vec<PaymentRecord> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| filter.user_id.as_deref().map_or(true, |u| r.user_id == u))
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .filter(|r| filter.payment_type.map_or(true, |t| r.payment_type == t))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit as usize)
            .collect();
        Ok(Page { items, total })
    }

    async fn stats_by_status(
        &self,
        payment_type: Option<PaymentType>,
    ) -> RepositoryResult<Vec<StatusStats>> {
        self.check()?;
        let mut stats: Vec<StatusStats> = Vec::new();
        for record in self.records.lock().unwrap().values() {
            if payment_type.map_or(false, |t| record.payment_type != t) {
                continue;
            }
            match stats.iter_mut().find(|s| s.status == record.status) {
                Some(entry) => {
                    entry.count += 1;
                    entry.total_amount = &entry.total_amount + &record.amount;
                }
                None => stats.push(StatusStats {
                    status: record.status,
                    count: 1,
                    total_amount: record.amount.clone(),
                }),
            }
        }
        stats.sort_by_key(|s| s.status.as_str());
        Ok(stats)
    }

    async fn ping(&self) -> RepositoryResult<()> {
        self.check()
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeGateway {
    pub orders_created: AtomicUsize,
    pub refunds_issued: AtomicUsize,
    pub payment_fetches: AtomicUsize,
    pub last_order: Mutex<Option<CreateOrderRequest>>,
    pub last_refund: Mutex<Option<(String, RefundRequest)>>,
    pub order_error: Mutex<Option<GatewayError>>,
    pub refund_error: Mutex<Option<GatewayError>>,
    /// Returned by `fetch_payment`, keyed by gateway payment id.
    pub payments: Mutex<HashMap<String, GatewayPayment>>,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_orders(&self, error: GatewayError) {
        *self.order_error.lock().unwrap() = Some(error);
    }

    pub fn fail_refunds(&self, error: GatewayError) {
        *self.refund_error.lock().unwrap() = Some(error);
    }

    pub fn heal_refunds(&self) {
        *self.refund_error.lock().unwrap() = None;
    }

    pub fn set_payment(
        &self,
        gateway_payment_id: &str,
        order_id: &str,
        status: GatewayPaymentStatus,
    ) {
        self.payments.lock().unwrap().insert(
            gateway_payment_id.to_string(),
            GatewayPayment {
                id: gateway_payment_id.to_string(),
                order_id: Some(order_id.to_string()),
                status,
                amount: 0,
                error_code: (status == GatewayPaymentStatus::Failed)
                    .then(|| "BAD_REQUEST_ERROR".to_string()),
                error_description: (status == GatewayPaymentStatus::Failed)
                    .then(|| "card declined".to_string()),
            },
        );
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_order(
        &self,
        request: &CreateOrderRequest,
    ) -> Result<GatewayOrder, GatewayError> {
        if let Some(error) = self.order_error.lock().unwrap().clone() {
            return Err(error);
        }
        let n = self.orders_created.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_order.lock().unwrap() = Some(request.clone());
        Ok(GatewayOrder {
            id: format!("order_{}_{}", n, &Uuid::new_v4().simple().to_string()[..8]),
            amount: request.amount_minor,
            currency: request.currency.clone(),
            receipt: Some(request.receipt.clone()),
        })
    }

    async fn fetch_payment(
        &self,
        gateway_payment_id: &str,
    ) -> Result<GatewayPayment, GatewayError> {
        self.payment_fetches.fetch_add(1, Ordering::SeqCst);
        self.payments
            .lock()
            .unwrap()
            .get(gateway_payment_id)
            .cloned()
            .ok_or_else(|| GatewayError::Rejected {
                status: 400,
                code: "BAD_REQUEST_ERROR".to_string(),
                description: "The id provided does not exist".to_string(),
            })
    }

    async fn refund(
        &self,
        gateway_payment_id: &str,
        request: &RefundRequest,
    ) -> Result<GatewayRefund, GatewayError> {
        // Let a concurrent caller run while this refund is "on the wire".
        tokio::task::yield_now().await;
        if let Some(error) = self.refund_error.lock().unwrap().clone() {
            return Err(error);
        }
        let n = self.refunds_issued.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_refund.lock().unwrap() =
            Some((gateway_payment_id.to_string(), request.clone()));
        Ok(GatewayRefund {
            id: format!("rfnd_{}", n),
            amount: request.amount_minor,
            status: Some("processed".to_string()),
        })
    }

    fn client_key(&self) -> &str {
        CLIENT_KEY
    }

    fn circuit_state(&self) -> &'static str {
        "closed"
    }
}

// ---------------------------------------------------------------------------
// Marketplace (events, plans, bookings, subscriptions)
// ---------------------------------------------------------------------------

pub struct FakeMarketplace {
    pub events: Mutex<HashMap<String, EventSummary>>,
    pub plans: Mutex<HashMap<String, SubscriptionPlan>>,
    pub bookings: Mutex<HashMap<String, Booking>>,
    pub subscriptions: Mutex<HashMap<String, OrganizerSubscription>>,
    pub booking_updates: AtomicUsize,
    pub subscription_upserts: AtomicUsize,
    /// Makes subscription writes fail until cleared.
    pub subscriptions_down: AtomicBool,
}

impl FakeMarketplace {
    pub fn new() -> Arc<Self> {
        let market = Self {
            events: Mutex::new(HashMap::new()),
            plans: Mutex::new(HashMap::new()),
            bookings: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            booking_updates: AtomicUsize::new(0),
            subscription_upserts: AtomicUsize::new(0),
            subscriptions_down: AtomicBool::new(false),
        };
        market.events.lock().unwrap().insert(
            EVENT_ID.to_string(),
            EventSummary {
                id: EVENT_ID.to_string(),
                title: "Rust Conf".to_string(),
                organizer_id: ORGANIZER_ID.to_string(),
            },
        );
        market.plans.lock().unwrap().insert(
            PLAN_ID.to_string(),
            SubscriptionPlan {
                id: PLAN_ID.to_string(),
                name: "Pro".to_string(),
                price: dec("999.00"),
                commission_percentage: dec("5.00"),
                is_active: true,
            },
        );
        market.plans.lock().unwrap().insert(
            INACTIVE_PLAN_ID.to_string(),
            SubscriptionPlan {
                id: INACTIVE_PLAN_ID.to_string(),
                name: "Legacy".to_string(),
                price: dec("499.00"),
                commission_percentage: dec("8.00"),
                is_active: false,
            },
        );
        market.bookings.lock().unwrap().insert(
            BOOKING_ID.to_string(),
            Booking {
                id: BOOKING_ID.to_string(),
                user_id: USER_ID.to_string(),
                event_id: EVENT_ID.to_string(),
                payment_status: "pending".to_string(),
            },
        );
        Arc::new(market)
    }

    pub fn booking_status(&self, booking_id: &str) -> String {
        self.bookings.lock().unwrap()[booking_id].payment_status.clone()
    }

    pub fn subscription(&self, organizer_id: &str) -> Option<OrganizerSubscription> {
        self.subscriptions.lock().unwrap().get(organizer_id).cloned()
    }

    pub fn seed_subscription(&self, organizer_id: &str, renewal_date: DateTime<Utc>) {
        self.subscriptions.lock().unwrap().insert(
            organizer_id.to_string(),
            OrganizerSubscription {
                id: format!("sub-{}", organizer_id),
                organizer_id: organizer_id.to_string(),
                plan_id: PLAN_ID.to_string(),
                plan_name: "Pro".to_string(),
                commission_percentage: dec("5.00"),
                status: "active".to_string(),
                subscribed_at: renewal_date - chrono::Duration::days(30),
                renewal_date,
            },
        );
    }
}

#[async_trait]
impl CatalogLookup for FakeMarketplace {
    async fn find_event(&self, event_id: &str) -> RepositoryResult<Option<EventSummary>> {
        Ok(self.events.lock().unwrap().get(event_id).cloned())
    }

    async fn find_plan(&self, plan_id: &str) -> RepositoryResult<Option<SubscriptionPlan>> {
        Ok(self.plans.lock().unwrap().get(plan_id).cloned())
    }
}

#[async_trait]
impl BookingService for FakeMarketplace {
    async fn find_booking(&self, booking_id: &str) -> RepositoryResult<Option<Booking>> {
        Ok(self.bookings.lock().unwrap().get(booking_id).cloned())
    }

    async fn set_booking_payment_status(
        &self,
        booking_id: &str,
        payment_status: &str,
    ) -> RepositoryResult<()> {
        self.booking_updates.fetch_add(1, Ordering::SeqCst);
        let mut bookings = self.bookings.lock().unwrap();
        let booking = bookings
            .get_mut(booking_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("booking {}", booking_id)))?;
        booking.payment_status = payment_status.to_string();
        Ok(())
    }
}

#[async_trait]
impl SubscriptionService for FakeMarketplace {
    async fn find_by_organizer(
        &self,
        organizer_id: &str,
    ) -> RepositoryResult<Option<OrganizerSubscription>> {
        Ok(self.subscriptions.lock().unwrap().get(organizer_id).cloned())
    }

    async fn create_or_update(
        &self,
        upsert: SubscriptionUpsert,
    ) -> RepositoryResult<OrganizerSubscription> {
        if self.subscriptions_down.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(
                "subscription store unavailable".to_string(),
            ));
        }
        self.subscription_upserts.fetch_add(1, Ordering::SeqCst);
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let id = subscriptions
            .get(&upsert.organizer_id)
            .map(|s| s.id.clone())
            .unwrap_or_else(|| format!("sub-{}", upsert.organizer_id));
        let subscription = OrganizerSubscription {
            id,
            organizer_id: upsert.organizer_id.clone(),
            plan_id: upsert.plan_id,
            plan_name: upsert.plan_name,
            commission_percentage: upsert.commission_percentage,
            status: "active".to_string(),
            subscribed_at: upsert.subscribed_at,
            renewal_date: upsert.renewal_date,
        };
        subscriptions.insert(upsert.organizer_id, subscription.clone());
        Ok(subscription)
    }
}

// ---------------------------------------------------------------------------
// Idempotency
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryIdempotency {
    entries: Mutex<HashMap<String, Option<CachedResponse>>>,
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotency {
    async fn begin(&self, key: &str) -> anyhow::Result<IdempotencyStatus> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            None => {
                entries.insert(key.to_string(), None);
                Ok(IdempotencyStatus::New)
            }
            Some(None) => Ok(IdempotencyStatus::Processing),
            Some(Some(cached)) => Ok(IdempotencyStatus::Completed(cached.clone())),
        }
    }

    async fn complete(&self, key: &str, response: CachedResponse) -> anyhow::Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), Some(response));
        Ok(())
    }

    async fn release(&self, key: &str) -> anyhow::Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub struct TestHarness {
    pub payments: Arc<InMemoryPayments>,
    pub gateway: Arc<FakeGateway>,
    pub market: Arc<FakeMarketplace>,
    pub state: AppState,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_idempotency() -> Self {
        Self::build(Some(Arc::new(InMemoryIdempotency::default())))
    }

    fn build(idempotency: Option<Arc<dyn IdempotencyStore>>) -> Self {
        let payments = InMemoryPayments::new();
        let gateway = FakeGateway::new();
        let market = FakeMarketplace::new();

        let state = AppState::new(
            Ports {
                payments: payments.clone(),
                catalog: market.clone(),
                bookings: market.clone(),
                subscriptions: market.clone(),
                gateway: gateway.clone(),
                idempotency,
            },
            &gateway_config(),
            ADMIN_KEY.to_string(),
        );

        Self {
            payments,
            gateway,
            market,
            state,
        }
    }

    pub fn app(&self) -> Router {
        create_app(self.state.clone())
    }

    pub async fn create_event_order(&self, user_id: &str, amount: &str) -> PaymentRecord {
        self.create_order(CreateOrderInput {
            caller: Caller::new(user_id),
            amount: dec(amount),
            payment_type: PaymentType::Event,
            reference_id: BOOKING_ID.to_string(),
            metadata: serde_json::json!({ "eventId": EVENT_ID, "quantity": 2 }),
            coupon: None,
        })
        .await
    }

    pub async fn create_subscription_order(&self, organizer_id: &str) -> PaymentRecord {
        self.create_order(CreateOrderInput {
            caller: Caller::new(organizer_id),
            amount: dec("999.00"),
            payment_type: PaymentType::Subscription,
            reference_id: PLAN_ID.to_string(),
            metadata: serde_json::json!({ "planId": PLAN_ID }),
            coupon: None,
        })
        .await
    }

    async fn create_order(&self, input: CreateOrderInput) -> PaymentRecord {
        let output = self.state.create_order.execute(input).await.unwrap();
        self.payments.get(output.payment_id)
    }
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// JSON request as the upstream auth layer would forward it.
pub fn json_request(method: &str, uri: &str, user_id: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user_id) = user_id {
        builder = builder.header("x-user-id", user_id);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get_request(uri: &str, user_id: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(user_id) = user_id {
        builder = builder.header("x-user-id", user_id);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn admin_request(method: &str, uri: &str, body: Option<&Value>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", ADMIN_KEY))
        .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
        .unwrap()
}

//! Storage and collaborator boundaries used by the use cases.
//! Adapters implement these; tests swap in in-memory fakes.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    PaymentRecord, PaymentStatus, PaymentTransition, PaymentType, ReconciliationResult,
    ReconciliationStatus,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("row not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                RepositoryError::Unavailable(err.to_string())
            }
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::Conflict(db.message().to_string())
            }
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Result of a conditional status update.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// The stored status matched the expected prior status and was moved.
    Applied(PaymentRecord),
    /// Someone else moved the record first; carries what is stored now.
    Conflict(PaymentRecord),
}

#[derive(Debug, Clone, Default)]
pub struct PaymentFilter {
    pub user_id: Option<String>,
    pub status: Option<PaymentStatus>,
    pub payment_type: Option<PaymentType>,
    pub page: u32,
    pub limit: u32,
}

impl PaymentFilter {
    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.limit)
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusStats {
    pub status: PaymentStatus,
    pub count: i64,
    pub total_amount: BigDecimal,
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Fails with `Conflict` when the order id is already taken.
    async fn insert(&self, record: &PaymentRecord) -> RepositoryResult<PaymentRecord>;

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Option<PaymentRecord>>;

    /// Matches either the internal order id or the gateway order id.
    async fn find_by_order_id(&self, order_id: &str) -> RepositoryResult<Option<PaymentRecord>>;

    /// Applies `transition` only if the stored status still equals its source status.
    async fn transition(
        &self,
        id: Uuid,
        transition: &PaymentTransition,
    ) -> RepositoryResult<TransitionOutcome>;

    /// Bumps the attempt counter while the record is `created`.
    /// Returns the new count, or `None` when the record has left `created`.
    async fn increment_verification_attempts(&self, id: Uuid) -> RepositoryResult<Option<i32>>;

    async fn set_reconciliation(
        &self,
        id: Uuid,
        status: ReconciliationStatus,
        result: Option<&ReconciliationResult>,
        error: Option<&str>,
    ) -> RepositoryResult<()>;

    /// Moves reconciliation back to `pending` for a rerun. Claims a `failed`
    /// reconciliation, or a `pending` one last touched before `stale_before`.
    /// Only one caller wins.
    async fn claim_reconciliation_retry(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> RepositoryResult<bool>;

    /// Marks a `paid` record as having a refund in flight. Fails to claim while
    /// another claim newer than `stale_before` is held.
    async fn claim_refund(&self, id: Uuid, stale_before: DateTime<Utc>) -> RepositoryResult<bool>;

    async fn release_refund(&self, id: Uuid) -> RepositoryResult<()>;

    async fn list(&self, filter: &PaymentFilter) -> RepositoryResult<Page<PaymentRecord>>;

    async fn stats_by_status(
        &self,
        payment_type: Option<PaymentType>,
    ) -> RepositoryResult<Vec<StatusStats>>;

    async fn ping(&self) -> RepositoryResult<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventSummary {
    pub id: String,
    pub title: String,
    pub organizer_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionPlan {
    pub id: String,
    pub name: String,
    pub price: BigDecimal,
    pub commission_percentage: BigDecimal,
    pub is_active: bool,
}

/// Read-only lookups against the event and plan catalogue.
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    async fn find_event(&self, event_id: &str) -> RepositoryResult<Option<EventSummary>>;
    async fn find_plan(&self, plan_id: &str) -> RepositoryResult<Option<SubscriptionPlan>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Booking {
    pub id: String,
    pub user_id: String,
    pub event_id: String,
    pub payment_status: String,
}

#[async_trait]
pub trait BookingService: Send + Sync {
    async fn find_booking(&self, booking_id: &str) -> RepositoryResult<Option<Booking>>;
    async fn set_booking_payment_status(
        &self,
        booking_id: &str,
        payment_status: &str,
    ) -> RepositoryResult<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrganizerSubscription {
    pub id: String,
    pub organizer_id: String,
    pub plan_id: String,
    pub plan_name: String,
    pub commission_percentage: BigDecimal,
    pub status: String,
    pub subscribed_at: DateTime<Utc>,
    pub renewal_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionUpsert {
    pub organizer_id: String,
    pub plan_id: String,
    pub plan_name: String,
    pub commission_percentage: BigDecimal,
    pub subscribed_at: DateTime<Utc>,
    pub renewal_date: DateTime<Utc>,
}

#[async_trait]
pub trait SubscriptionService: Send + Sync {
    async fn find_by_organizer(
        &self,
        organizer_id: &str,
    ) -> RepositoryResult<Option<OrganizerSubscription>>;

    /// Overwrites an existing subscription or creates it in `active` status.
    async fn create_or_update(
        &self,
        upsert: SubscriptionUpsert,
    ) -> RepositoryResult<OrganizerSubscription>;
}

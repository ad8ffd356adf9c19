//! Post-capture side effects: confirm the booking or activate the organizer
//! subscription. Runs once per record entering `paid`, and again only through
//! an explicit retry after a recorded failure.

use chrono::{Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    PaymentMetadata, PaymentRecord, PaymentStatus, ReconciliationResult, ReconciliationStatus,
};
use crate::error::AppError;
use crate::ports::{
    BookingService, CatalogLookup, PaymentRepository, RepositoryError, SubscriptionService,
    SubscriptionUpsert,
};

pub const BOOKING_PAYMENT_COMPLETED: &str = "completed";
pub const SUBSCRIPTION_PERIOD_DAYS: i64 = 30;
/// A `pending` reconciliation idle this long is treated as abandoned.
pub const RECONCILIATION_STALE_AFTER_SECS: i64 = 300;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("subscription plan {0} not found")]
    PlanNotFound(String),
    #[error(transparent)]
    Store(#[from] RepositoryError),
}

pub struct Reconciler {
    payments: Arc<dyn PaymentRepository>,
    catalog: Arc<dyn CatalogLookup>,
    bookings: Arc<dyn BookingService>,
    subscriptions: Arc<dyn SubscriptionService>,
}

impl Reconciler {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        catalog: Arc<dyn CatalogLookup>,
        bookings: Arc<dyn BookingService>,
        subscriptions: Arc<dyn SubscriptionService>,
    ) -> Self {
        Self {
            payments,
            catalog,
            bookings,
            subscriptions,
        }
    }

    /// Dispatches to the handler for the record's payment type.
    pub async fn run(
        &self,
        record: &PaymentRecord,
    ) -> Result<ReconciliationResult, ReconcileError> {
        match &record.metadata {
            PaymentMetadata::Event(_) => self.confirm_booking(record).await,
            PaymentMetadata::Subscription(subscription) => {
                self.activate_subscription(record, &subscription.plan_id)
                    .await
            }
        }
    }

    /// Runs the handler for a freshly paid record and stores the outcome.
    /// The payment stays `paid` whatever happens here.
    pub async fn reconcile_paid(
        &self,
        record: &PaymentRecord,
    ) -> Result<ReconciliationResult, AppError> {
        match self.run(record).await {
            Ok(result) => {
                self.payments
                    .set_reconciliation(
                        record.id,
                        ReconciliationStatus::Completed,
                        Some(&result),
                        None,
                    )
                    .await
                    .map_err(|e| {
                        tracing::error!(
                            payment_id = %record.id,
                            error = %e,
                            "Reconciliation succeeded but its result could not be stored"
                        );
                        AppError::Reconciliation {
                            payment_id: record.id,
                            message: e.to_string(),
                        }
                    })?;

                tracing::info!(
                    payment_id = %record.id,
                    payment_type = %record.payment_type,
                    "Payment reconciled"
                );
                Ok(result)
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(
                    payment_id = %record.id,
                    order_id = %record.order_id,
                    error = %message,
                    "Payment captured but reconciliation failed"
                );

                if let Err(store_err) = self
                    .payments
                    .set_reconciliation(
                        record.id,
                        ReconciliationStatus::Failed,
                        None,
                        Some(&message),
                    )
                    .await
                {
                    tracing::error!(
                        payment_id = %record.id,
                        error = %store_err,
                        "Could not record reconciliation failure"
                    );
                }

                Err(AppError::Reconciliation {
                    payment_id: record.id,
                    message,
                })
            }
        }
    }

    /// Re-runs reconciliation for a paid record. A completed one returns its
    /// stored result. A `pending` one is only taken over once it has been idle
    /// for `RECONCILIATION_STALE_AFTER_SECS`, or straight away with `force`.
    pub async fn retry(
        &self,
        payment_id: Uuid,
        force: bool,
    ) -> Result<(PaymentRecord, ReconciliationResult), AppError> {
        let record = self
            .payments
            .get_by_id(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("payment {}", payment_id)))?;

        if record.status != PaymentStatus::Paid {
            return Err(AppError::InvalidState(format!(
                "payment {} is {}, only paid payments are reconciled",
                record.id, record.status
            )));
        }

        if let (Some(ReconciliationStatus::Completed), Some(result)) =
            (record.reconciliation_status, &record.reconciliation_result)
        {
            let result = result.clone();
            return Ok((record, result));
        }

        let now = Utc::now();
        let stale_before = if force {
            now
        } else {
            now - Duration::seconds(RECONCILIATION_STALE_AFTER_SECS)
        };
        if !self
            .payments
            .claim_reconciliation_retry(record.id, stale_before)
            .await?
        {
            return Err(AppError::InvalidState(format!(
                "reconciliation of payment {} is still in progress",
                record.id
            )));
        }

        tracing::info!(
            payment_id = %record.id,
            previous = ?record.reconciliation_status,
            force,
            "Retrying reconciliation"
        );
        let result = self.reconcile_paid(&record).await?;
        Ok((record, result))
    }

    async fn confirm_booking(
        &self,
        record: &PaymentRecord,
    ) -> Result<ReconciliationResult, ReconcileError> {
        let Some(booking) = self.bookings.find_booking(&record.reference_id).await? else {
            tracing::info!(
                payment_id = %record.id,
                reference_id = %record.reference_id,
                "No booking yet, it will be created downstream"
            );
            return Ok(ReconciliationResult::BookingPending {
                reference_id: record.reference_id.clone(),
                message: "booking will be created downstream".to_string(),
            });
        };

        self.bookings
            .set_booking_payment_status(&booking.id, BOOKING_PAYMENT_COMPLETED)
            .await?;

        Ok(ReconciliationResult::Booking {
            booking_id: booking.id,
            payment_status: BOOKING_PAYMENT_COMPLETED.to_string(),
        })
    }

    async fn activate_subscription(
        &self,
        record: &PaymentRecord,
        plan_id: &str,
    ) -> Result<ReconciliationResult, ReconcileError> {
        let plan = self
            .catalog
            .find_plan(plan_id)
            .await?
            .ok_or_else(|| ReconcileError::PlanNotFound(plan_id.to_string()))?;

        let now = Utc::now();
        let period = Duration::days(SUBSCRIPTION_PERIOD_DAYS);
        let renewal_date = match self.subscriptions.find_by_organizer(&record.user_id).await? {
            Some(existing) => existing.renewal_date.max(now) + period,
            None => now + period,
        };

        // Role changes go through a separate approval workflow.
        let subscription = self
            .subscriptions
            .create_or_update(SubscriptionUpsert {
                organizer_id: record.user_id.clone(),
                plan_id: plan.id.clone(),
                plan_name: plan.name.clone(),
                commission_percentage: plan.commission_percentage.clone(),
                subscribed_at: now,
                renewal_date,
            })
            .await?;

        Ok(ReconciliationResult::Subscription {
            subscription_id: subscription.id,
            plan_id: subscription.plan_id,
            plan_name: subscription.plan_name,
            status: subscription.status,
            renewal_date: subscription.renewal_date,
        })
    }
}

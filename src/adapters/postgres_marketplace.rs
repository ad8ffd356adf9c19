//! Postgres access to the marketplace tables the payment core touches:
//! event and plan lookups, booking payment status and organizer subscriptions.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::ports::{
    Booking, BookingService, CatalogLookup, EventSummary, OrganizerSubscription,
    RepositoryError, RepositoryResult, SubscriptionPlan, SubscriptionService, SubscriptionUpsert,
};

#[derive(Clone)]
pub struct PostgresMarketplace {
    pool: PgPool,
}

impl PostgresMarketplace {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: String,
    title: String,
    organizer_id: String,
}

#[derive(Debug, sqlx::FromRow)]
struct PlanRow {
    id: String,
    name: String,
    price: BigDecimal,
    commission_percentage: BigDecimal,
    is_active: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct BookingRow {
    id: String,
    user_id: String,
    event_id: String,
    payment_status: String,
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: String,
    organizer_id: String,
    plan_id: String,
    plan_name: String,
    commission_percentage: BigDecimal,
    status: String,
    subscribed_at: DateTime<Utc>,
    renewal_date: DateTime<Utc>,
}

impl From<SubscriptionRow> for OrganizerSubscription {
    fn from(row: SubscriptionRow) -> Self {
        OrganizerSubscription {
            id: row.id,
            organizer_id: row.organizer_id,
            plan_id: row.plan_id,
            plan_name: row.plan_name,
            commission_percentage: row.commission_percentage,
            status: row.status,
            subscribed_at: row.subscribed_at,
            renewal_date: row.renewal_date,
        }
    }
}

#[async_trait]
impl CatalogLookup for PostgresMarketplace {
    async fn find_event(&self, event_id: &str) -> RepositoryResult<Option<EventSummary>> {
        let row = sqlx::query_as::<_, EventRow>(
            "SELECT id, title, organizer_id FROM events WHERE id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.map(|r| EventSummary {
            id: r.id,
            title: r.title,
            organizer_id: r.organizer_id,
        }))
    }

    async fn find_plan(&self, plan_id: &str) -> RepositoryResult<Option<SubscriptionPlan>> {
        let row = sqlx::query_as::<_, PlanRow>(
            "SELECT id, name, price, commission_percentage, is_active \
             FROM subscription_plans WHERE id = $1",
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.map(|r| SubscriptionPlan {
            id: r.id,
            name: r.name,
            price: r.price,
            commission_percentage: r.commission_percentage,
            is_active: r.is_active,
        }))
    }
}

#[async_trait]
impl BookingService for PostgresMarketplace {
    async fn find_booking(&self, booking_id: &str) -> RepositoryResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(
            "SELECT id, user_id, event_id, payment_status FROM bookings WHERE id = $1",
        )
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.map(|r| Booking {
            id: r.id,
            user_id: r.user_id,
            event_id: r.event_id,
            payment_status: r.payment_status,
        }))
    }

    async fn set_booking_payment_status(
        &self,
        booking_id: &str,
        payment_status: &str,
    ) -> RepositoryResult<()> {
        let done = sqlx::query(
            "UPDATE bookings SET payment_status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(booking_id)
        .bind(payment_status)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        if done.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("booking {}", booking_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionService for PostgresMarketplace {
    async fn find_by_organizer(
        &self,
        organizer_id: &str,
    ) -> RepositoryResult<Option<OrganizerSubscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT id, organizer_id, plan_id, plan_name, commission_percentage, status,
                   subscribed_at, renewal_date
            FROM organizer_subscriptions
            WHERE organizer_id = $1
            "#,
        )
        .bind(organizer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.map(OrganizerSubscription::from))
    }

    async fn create_or_update(
        &self,
        upsert: SubscriptionUpsert,
    ) -> RepositoryResult<OrganizerSubscription> {
        // An existing row keeps its id; a paid renewal reactivates it.
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            INSERT INTO organizer_subscriptions (
                id, organizer_id, plan_id, plan_name, commission_percentage, status,
                subscribed_at, renewal_date
            ) VALUES ($1, $2, $3, $4, $5, 'active', $6, $7)
            ON CONFLICT (organizer_id) DO UPDATE SET
                plan_id = EXCLUDED.plan_id,
                plan_name = EXCLUDED.plan_name,
                commission_percentage = EXCLUDED.commission_percentage,
                subscribed_at = EXCLUDED.subscribed_at,
                renewal_date = EXCLUDED.renewal_date,
                status = 'active',
                updated_at = NOW()
            RETURNING id, organizer_id, plan_id, plan_name, commission_percentage, status,
                      subscribed_at, renewal_date
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&upsert.organizer_id)
        .bind(&upsert.plan_id)
        .bind(&upsert.plan_name)
        .bind(&upsert.commission_percentage)
        .bind(upsert.subscribed_at)
        .bind(upsert.renewal_date)
        .fetch_one(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.into())
    }
}

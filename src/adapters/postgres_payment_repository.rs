//! Postgres implementation of PaymentRepository.
//!
//! Status changes are conditional updates (`WHERE status = $expected`), so
//! concurrent verifications of the same record race in the database and
//! exactly one of them sees its row come back.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{
    CouponSnapshot, PaymentMetadata, PaymentRecord, PaymentStatus, PaymentTransition,
    PaymentType, ReconciliationResult, ReconciliationStatus,
};
use crate::ports::{
    Page, PaymentFilter, PaymentRepository, RepositoryError, RepositoryResult, StatusStats,
    TransitionOutcome,
};

/// Postgres-backed payment record store.
#[derive(Clone)]
pub struct PostgresPaymentRepository {
    pool: PgPool,
}

impl PostgresPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_required(&self, id: Uuid) -> RepositoryResult<PaymentRecord> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("payment {}", id)))
    }
}

#[async_trait]
impl PaymentRepository for PostgresPaymentRepository {
    async fn insert(&self, record: &PaymentRecord) -> RepositoryResult<PaymentRecord> {
        let coupon = record
            .coupon
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| RepositoryError::Corrupt(e.to_string()))?;

        let row = sqlx::query_as::<_, PaymentRow>(
            r#"
            INSERT INTO payments (
                id, user_id, amount, amount_minor, currency, order_id, gateway_order_id,
                receipt, payment_type, reference_id, status, coupon, original_amount,
                discounted_amount, metadata, verification_attempts, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            RETURNING *
            "#,
        )
        .bind(record.id)
        .bind(&record.user_id)
        .bind(&record.amount)
        .bind(record.amount_minor)
        .bind(&record.currency)
        .bind(&record.order_id)
        .bind(&record.gateway_order_id)
        .bind(&record.receipt)
        .bind(record.payment_type.as_str())
        .bind(&record.reference_id)
        .bind(record.status.as_str())
        .bind(coupon)
        .bind(&record.original_amount)
        .bind(&record.discounted_amount)
        .bind(record.metadata.to_value())
        .bind(record.verification_attempts)
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.into_domain()
    }

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Option<PaymentRecord>> {
        let row = sqlx::query_as::<_, PaymentRow>("SELECT * FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        row.map(PaymentRow::into_domain).transpose()
    }

    async fn find_by_order_id(&self, order_id: &str) -> RepositoryResult<Option<PaymentRecord>> {
        let row = sqlx::query_as::<_, PaymentRow>(
            "SELECT * FROM payments WHERE order_id = $1 OR gateway_order_id = $1 \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.map(PaymentRow::into_domain).transpose()
    }

    async fn transition(
        &self,
        id: Uuid,
        transition: &PaymentTransition,
    ) -> RepositoryResult<TransitionOutcome> {
        let expected = transition.source().as_str();

        let query = match transition {
            PaymentTransition::Paid {
                gateway_payment_id,
                signature,
            } => sqlx::query_as::<_, PaymentRow>(
                r#"
                UPDATE payments
                SET status = 'paid', gateway_payment_id = $3, signature = $4,
                    reconciliation_status = 'pending', updated_at = NOW()
                WHERE id = $1 AND status = $2
                RETURNING *
                "#,
            )
            .bind(id)
            .bind(expected)
            .bind(gateway_payment_id)
            .bind(signature),
            PaymentTransition::Failed {
                error_code,
                error_description,
            } => sqlx::query_as::<_, PaymentRow>(
                r#"
                UPDATE payments
                SET status = 'failed', error_code = $3, error_description = $4, updated_at = NOW()
                WHERE id = $1 AND status = $2
                RETURNING *
                "#,
            )
            .bind(id)
            .bind(expected)
            .bind(error_code)
            .bind(error_description),
            PaymentTransition::Refunded {
                refund_id,
                refund_amount,
                refunded_at,
                reason,
            } => sqlx::query_as::<_, PaymentRow>(
                r#"
                UPDATE payments
                SET status = 'refunded', refund_id = $3, refund_amount = $4,
                    refunded_at = $5, refund_reason = $6, refund_claimed_at = NULL,
                    updated_at = NOW()
                WHERE id = $1 AND status = $2
                RETURNING *
                "#,
            )
            .bind(id)
            .bind(expected)
            .bind(refund_id)
            .bind(refund_amount)
            .bind(refunded_at)
            .bind(reason),
        };

        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        match row {
            Some(row) => Ok(TransitionOutcome::Applied(row.into_domain()?)),
            None => Ok(TransitionOutcome::Conflict(self.fetch_required(id).await?)),
        }
    }

    async fn increment_verification_attempts(&self, id: Uuid) -> RepositoryResult<Option<i32>> {
        let attempts: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE payments
            SET verification_attempts = verification_attempts + 1, updated_at = NOW()
            WHERE id = $1 AND status = 'created'
            RETURNING verification_attempts
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        if attempts.is_none() {
            // Distinguish "left created" from "does not exist".
            self.fetch_required(id).await?;
        }
        Ok(attempts)
    }

    async fn set_reconciliation(
        &self,
        id: Uuid,
        status: ReconciliationStatus,
        result: Option<&ReconciliationResult>,
        error: Option<&str>,
    ) -> RepositoryResult<()> {
        let result = result
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| RepositoryError::Corrupt(e.to_string()))?;

        let done = sqlx::query(
            r#"
            UPDATE payments
            SET reconciliation_status = $2, reconciliation_result = $3,
                reconciliation_error = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(result)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        if done.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("payment {}", id)));
        }
        Ok(())
    }

    async fn claim_reconciliation_retry(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let done = sqlx::query(
            r#"
            UPDATE payments
            SET reconciliation_status = 'pending', reconciliation_error = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'paid'
              AND (reconciliation_status = 'failed'
                   OR (COALESCE(reconciliation_status, 'pending') = 'pending'
                       AND updated_at < $2))
            "#,
        )
        .bind(id)
        .bind(stale_before)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(done.rows_affected() == 1)
    }

    async fn claim_refund(&self, id: Uuid, stale_before: DateTime<Utc>) -> RepositoryResult<bool> {
        let done = sqlx::query(
            r#"
            UPDATE payments
            SET refund_claimed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'paid'
              AND (refund_claimed_at IS NULL OR refund_claimed_at < $2)
            "#,
        )
        .bind(id)
        .bind(stale_before)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(done.rows_affected() == 1)
    }

    async fn release_refund(&self, id: Uuid) -> RepositoryResult<()> {
        sqlx::query(
            "UPDATE payments SET refund_claimed_at = NULL, updated_at = NOW() \
             WHERE id = $1 AND status = 'paid'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn list(&self, filter: &PaymentFilter) -> RepositoryResult<Page<PaymentRecord>> {
        let status = filter.status.map(|s| s.as_str());
        let payment_type = filter.payment_type.map(|t| t.as_str());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM payments
            WHERE ($1::text IS NULL OR user_id = $1)
              AND ($2::text IS NULL OR status = $2)
              AND ($3::text IS NULL OR payment_type = $3)
            "#,
        )
        .bind(&filter.user_id)
        .bind(status)
        .bind(payment_type)
        .fetch_one(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let rows = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT * FROM payments
            WHERE ($1::text IS NULL OR user_id = $1)
              AND ($2::text IS NULL OR status = $2)
              AND ($3::text IS NULL OR payment_type = $3)
            ORDER BY created_at DESC, id
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(&filter.user_id)
        .bind(status)
        .bind(payment_type)
        .bind(i64::from(filter.limit))
        .bind(filter.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let items = rows
            .into_iter()
            .map(PaymentRow::into_domain)
            .collect::<RepositoryResult<Vec<_>>>()?;

        Ok(Page { items, total })
    }

    async fn stats_by_status(
        &self,
        payment_type: Option<PaymentType>,
    ) -> RepositoryResult<Vec<StatusStats>> {
        let rows = sqlx::query_as::<_, StatsRow>(
            r#"
            SELECT status, COUNT(*) AS count, COALESCE(SUM(amount), 0) AS total_amount
            FROM payments
            WHERE ($1::text IS NULL OR payment_type = $1)
            GROUP BY status
            ORDER BY status
            "#,
        )
        .bind(payment_type.map(|t| t.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter()
            .map(|row| {
                Ok(StatusStats {
                    status: parse_column("status", &row.status)?,
                    count: row.count,
                    total_amount: row.total_amount,
                })
            })
            .collect()
    }

    async fn ping(&self) -> RepositoryResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(())
    }
}

fn parse_column<T: std::str::FromStr>(column: &str, value: &str) -> RepositoryResult<T> {
    value
        .parse()
        .map_err(|_| RepositoryError::Corrupt(format!("{} = '{}'", column, value)))
}

fn parse_json<T: serde::de::DeserializeOwned>(
    column: &str,
    value: Option<serde_json::Value>,
) -> RepositoryResult<Option<T>> {
    value
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| RepositoryError::Corrupt(format!("{}: {}", column, e)))
}

#[derive(Debug, sqlx::FromRow)]
struct StatsRow {
    status: String,
    count: i64,
    total_amount: BigDecimal,
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    user_id: String,
    amount: BigDecimal,
    amount_minor: i64,
    currency: String,
    order_id: String,
    gateway_order_id: String,
    receipt: String,
    payment_type: String,
    reference_id: String,
    status: String,
    gateway_payment_id: Option<String>,
    signature: Option<String>,
    error_code: Option<String>,
    error_description: Option<String>,
    refund_id: Option<String>,
    refund_amount: Option<BigDecimal>,
    refunded_at: Option<DateTime<Utc>>,
    refund_reason: Option<String>,
    refund_claimed_at: Option<DateTime<Utc>>,
    coupon: Option<serde_json::Value>,
    original_amount: Option<BigDecimal>,
    discounted_amount: Option<BigDecimal>,
    metadata: serde_json::Value,
    verification_attempts: i32,
    reconciliation_status: Option<String>,
    reconciliation_result: Option<serde_json::Value>,
    reconciliation_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PaymentRow {
    fn into_domain(self) -> RepositoryResult<PaymentRecord> {
        let payment_type: PaymentType = parse_column("payment_type", &self.payment_type)?;
        let metadata = PaymentMetadata::parse(payment_type, self.metadata)
            .map_err(|e| RepositoryError::Corrupt(e.to_string()))?;
        let reconciliation_status = self
            .reconciliation_status
            .as_deref()
            .map(|s| parse_column::<ReconciliationStatus>("reconciliation_status", s))
            .transpose()?;

        Ok(PaymentRecord {
            id: self.id,
            user_id: self.user_id,
            amount: self.amount,
            amount_minor: self.amount_minor,
            currency: self.currency,
            order_id: self.order_id,
            gateway_order_id: self.gateway_order_id,
            receipt: self.receipt,
            payment_type,
            reference_id: self.reference_id,
            status: parse_column::<PaymentStatus>("status", &self.status)?,
            gateway_payment_id: self.gateway_payment_id,
            signature: self.signature,
            error_code: self.error_code,
            error_description: self.error_description,
            refund_id: self.refund_id,
            refund_amount: self.refund_amount,
            refunded_at: self.refunded_at,
            refund_reason: self.refund_reason,
            refund_claimed_at: self.refund_claimed_at,
            coupon: parse_json::<CouponSnapshot>("coupon", self.coupon)?,
            original_amount: self.original_amount,
            discounted_amount: self.discounted_amount,
            metadata,
            verification_attempts: self.verification_attempts,
            reconciliation_status,
            reconciliation_result: parse_json::<ReconciliationResult>(
                "reconciliation_result",
                self.reconciliation_result,
            )?,
            reconciliation_error: self.reconciliation_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

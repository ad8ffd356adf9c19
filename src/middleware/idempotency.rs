use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::auth::USER_ID_HEADER;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const REPLAYED_HEADER: &str = "idempotent-replayed";

const IDEMPOTENCY_TTL: u64 = 86400; // 24 hours in seconds
const LOCK_TTL: u64 = 300;
const IDEMPOTENCY_PREFIX: &str = "idempotency:";
const PROCESSING: &str = "PROCESSING";
const MAX_KEY_LEN: usize = 128;
const MAX_CACHED_BODY: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyStatus {
    New,
    Processing,
    Completed(CachedResponse),
}

/// Storage for idempotency keys. `begin` must claim a new key atomically.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn begin(&self, key: &str) -> anyhow::Result<IdempotencyStatus>;
    async fn complete(&self, key: &str, response: CachedResponse) -> anyhow::Result<()>;
    async fn release(&self, key: &str) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct RedisIdempotencyStore {
    redis_client: redis::Client,
}

impl RedisIdempotencyStore {
    pub fn new(redis_url: &str) -> anyhow::Result<Self> {
        let redis_client = redis::Client::open(redis_url)?;
        Ok(Self { redis_client })
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn begin(&self, key: &str) -> anyhow::Result<IdempotencyStatus> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let key = format!("{}{}", IDEMPOTENCY_PREFIX, key);

        // SET NX so two concurrent first requests cannot both proceed
        let acquired: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(PROCESSING)
            .arg("NX")
            .arg("EX")
            .arg(LOCK_TTL)
            .query_async(&mut conn)
            .await?;
        if acquired.is_some() {
            return Ok(IdempotencyStatus::New);
        }

        let existing: Option<String> = conn.get(&key).await?;
        match existing {
            Some(value) if value != PROCESSING => {
                let cached: CachedResponse = serde_json::from_str(&value)?;
                Ok(IdempotencyStatus::Completed(cached))
            }
            _ => Ok(IdempotencyStatus::Processing),
        }
    }

    async fn complete(&self, key: &str, response: CachedResponse) -> anyhow::Result<()> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let key = format!("{}{}", IDEMPOTENCY_PREFIX, key);
        let serialized = serde_json::to_string(&response)?;

        let _: () = conn.set_ex(&key, serialized, IDEMPOTENCY_TTL).await?;
        Ok(())
    }

    async fn release(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let key = format!("{}{}", IDEMPOTENCY_PREFIX, key);
        let _: () = conn.del(&key).await?;
        Ok(())
    }
}

/// Replays the first successful response for a repeated `Idempotency-Key`.
/// Keys are scoped by caller; requests without a key pass straight through.
pub async fn idempotency_middleware(
    State(store): State<Arc<dyn IdempotencyStore>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(raw_key) = request.headers().get(IDEMPOTENCY_KEY_HEADER) else {
        return next.run(request).await;
    };
    let key = match raw_key.to_str() {
        Ok(k) if !k.trim().is_empty() && k.len() <= MAX_KEY_LEN => k.trim().to_string(),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": "Invalid idempotency key",
                    "code": "VALIDATION_ERROR",
                    "status": 400
                })),
            )
                .into_response();
        }
    };
    let Some(user_id) = request
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        // Unauthenticated; the handler rejects it
        return next.run(request).await;
    };
    let scoped_key = format!("{}:{}", user_id, key);

    match store.begin(&scoped_key).await {
        Ok(IdempotencyStatus::New) => {
            let response = next.run(request).await;

            if !response.status().is_success() {
                if let Err(e) = store.release(&scoped_key).await {
                    tracing::error!("Failed to release idempotency lock: {}", e);
                }
                return response;
            }

            let (parts, body) = response.into_parts();
            let bytes = match axum::body::to_bytes(body, MAX_CACHED_BODY).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!("Failed to buffer response for idempotency cache: {}", e);
                    if let Err(e) = store.release(&scoped_key).await {
                        tracing::error!("Failed to release idempotency lock: {}", e);
                    }
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
            };

            let cached = CachedResponse {
                status: parts.status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            };
            if let Err(e) = store.complete(&scoped_key, cached).await {
                tracing::error!("Failed to store idempotency response: {}", e);
            }

            Response::from_parts(parts, Body::from(bytes))
        }
        Ok(IdempotencyStatus::Processing) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "error": "A request with this idempotency key is still being processed",
                "code": "IDEMPOTENCY_IN_FLIGHT",
                "status": 409
            })),
        )
            .into_response(),
        Ok(IdempotencyStatus::Completed(cached)) => {
            tracing::info!(idempotency_key = %key, "Replaying cached response");
            let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK);
            let mut response = (status, cached.body).into_response();
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            response
                .headers_mut()
                .insert(REPLAYED_HEADER, HeaderValue::from_static("true"));
            response
        }
        Err(e) => {
            tracing::error!("Idempotency check failed: {}", e);
            // On Redis failure, proceed with request (fail open)
            next.run(request).await
        }
    }
}

use axum::{
    async_trait,
    extract::{FromRequest, Request, State},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::gateway::signature::{verify_webhook_signature, SignatureError};
use crate::use_cases::WebhookOutcome;
use crate::AppState;

pub const SIGNATURE_HEADER: &str = "X-Razorpay-Signature";
const MAX_WEBHOOK_BODY: usize = 1024 * 1024;

/// Extractor that verifies the X-Razorpay-Signature header
/// against the raw request body using HMAC-SHA256
pub struct VerifiedWebhook {
    pub body: Vec<u8>,
}

#[async_trait]
impl FromRequest<AppState> for VerifiedWebhook {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let signature = req
            .headers()
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                tracing::warn!("Webhook without signature header");
                AppError::Unauthorized(format!("missing {} header", SIGNATURE_HEADER))
            })?;

        let body = axum::body::to_bytes(req.into_body(), MAX_WEBHOOK_BODY)
            .await
            .map_err(|_| AppError::Validation("webhook body could not be read".to_string()))?
            .to_vec();

        match verify_webhook_signature(&state.webhook_secret, &body, &signature) {
            Ok(()) => Ok(VerifiedWebhook { body }),
            Err(SignatureError::InvalidSecret) => Err(AppError::Internal(
                "invalid webhook secret configuration".to_string(),
            )),
            Err(e) => {
                tracing::warn!("Webhook authentication failed: {}", e);
                Err(AppError::Unauthorized(
                    "webhook signature verification failed".to_string(),
                ))
            }
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub status: WebhookOutcome,
}

#[utoipa::path(
    post,
    path = "/payments/webhook",
    params((
        "X-Razorpay-Signature" = String,
        Header,
        description = "hex HMAC-SHA256 of the raw body"
    )),
    request_body(
        content = String,
        description = "Raw gateway event envelope",
        content_type = "application/json"
    ),
    responses(
        (status = 200, description = "Event acknowledged", body = WebhookAck),
        (status = 401, description = "Signature missing or invalid")
    ),
    tag = "Payments"
)]
pub async fn gateway_webhook(
    State(state): State<AppState>,
    webhook: VerifiedWebhook,
) -> Result<Json<WebhookAck>, AppError> {
    let status = state.webhook.handle(&webhook.body).await?;
    Ok(Json(WebhookAck { status }))
}

use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{
    CreateOrderRequest, GatewayError, GatewayOrder, GatewayPayment, GatewayRefund,
    PaymentGateway, RefundRequest,
};
use crate::config::GatewayConfig;
use crate::validation::is_gateway_id;

type Breaker = StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>;

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// HTTP client for the Razorpay orders, payments and refunds API.
#[derive(Clone)]
pub struct RazorpayClient {
    client: Client,
    base_url: String,
    key_id: String,
    key_secret: String,
    circuit_breaker: Breaker,
}

impl RazorpayClient {
    pub fn new(config: &GatewayConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(config.circuit_reset_secs),
            Duration::from_secs(config.circuit_reset_secs * 2),
        );
        let policy =
            failure_policy::consecutive_failures(config.circuit_failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        RazorpayClient {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            key_id: config.key_id.clone(),
            key_secret: config.key_secret.clone(),
            circuit_breaker,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    fn payment_url(&self, gateway_payment_id: &str, suffix: &str) -> Result<String, GatewayError> {
        if !is_gateway_id(gateway_payment_id) {
            return Err(GatewayError::InvalidId(gateway_payment_id.to_string()));
        }
        Ok(self.url(&format!("payments/{}{}", gateway_payment_id, suffix)))
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.key_id, Some(&self.key_secret))
    }

    /// Runs `request` through the breaker. Only transient failures count
    /// towards opening it; a 4xx rejection is the caller's problem.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        let result = self
            .circuit_breaker
            .call_with(
                |e: &GatewayError| e.is_transient(),
                async move {
                    let response = request.send().await.map_err(map_transport_error)?;
                    decode(response).await
                },
            )
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => {
                tracing::warn!("Gateway call rejected, circuit breaker is open");
                Err(GatewayError::CircuitOpen)
            }
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

fn map_transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Unavailable(err.to_string())
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
    let status = response.status();
    let bytes = response.bytes().await.map_err(map_transport_error)?;

    if !status.is_success() {
        let (code, description) = match serde_json::from_slice::<ErrorEnvelope>(&bytes) {
            Ok(envelope) => (
                envelope.error.code.unwrap_or_else(|| "UNKNOWN".to_string()),
                envelope.error.description.unwrap_or_default(),
            ),
            Err(_) => (
                "UNKNOWN".to_string(),
                String::from_utf8_lossy(&bytes).chars().take(200).collect(),
            ),
        };
        return Err(GatewayError::Rejected {
            status: status.as_u16(),
            code,
            description,
        });
    }

    serde_json::from_slice(&bytes).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl PaymentGateway for RazorpayClient {
    async fn create_order(
        &self,
        request: &CreateOrderRequest,
    ) -> Result<GatewayOrder, GatewayError> {
        let body = json!({
            "amount": request.amount_minor,
            "currency": request.currency,
            "receipt": request.receipt,
            "notes": request.notes,
        });
        let builder = self.authed(self.client.post(self.url("orders"))).json(&body);

        let order: GatewayOrder = self.send(builder).await?;
        tracing::debug!(
            gateway_order_id = %order.id,
            receipt = %request.receipt,
            "Gateway order created"
        );
        Ok(order)
    }

    async fn fetch_payment(
        &self,
        gateway_payment_id: &str,
    ) -> Result<GatewayPayment, GatewayError> {
        let url = self.payment_url(gateway_payment_id, "")?;
        let builder = self.authed(self.client.get(url));
        self.send(builder).await
    }

    async fn refund(
        &self,
        gateway_payment_id: &str,
        request: &RefundRequest,
    ) -> Result<GatewayRefund, GatewayError> {
        let body = json!({
            "amount": request.amount_minor,
            "notes": request.notes,
        });
        let url = self.payment_url(gateway_payment_id, "/refund")?;
        let builder = self.authed(self.client.post(url)).json(&body);
        self.send(builder).await
    }

    fn client_key(&self) -> &str {
        &self.key_id
    }

    fn circuit_state(&self) -> &'static str {
        if self.circuit_breaker.is_call_permitted() {
            "closed"
        } else {
            "open"
        }
    }
}

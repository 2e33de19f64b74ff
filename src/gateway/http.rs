use async_trait::async_trait;
use std::time::Duration;

use super::{GatewayError, InitiatePayment, InitiationAck, PaymentGateway};
use crate::utils::{
    retry_on_transient, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, RetryConfig,
};

/// reqwest-backed gateway client. Each call is retried on transient errors and
/// guarded by a circuit breaker; the request id doubles as idempotency key.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    circuit_breaker: CircuitBreaker,
    retry_config: RetryConfig,
}

impl HttpGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let cb_config = CircuitBreakerConfig {
            failure_threshold: 5,
            open_for: Duration::from_secs(30),
            success_threshold: 2,
        };

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            circuit_breaker: CircuitBreaker::new("payment_gateway", cb_config),
            retry_config: RetryConfig::conservative(),
        })
    }

    pub fn circuit_breaker(&self) -> CircuitBreaker {
        self.circuit_breaker.clone()
    }

    async fn send_once(&self, request: &InitiatePayment) -> Result<InitiationAck, GatewayError> {
        let response = self
            .client
            .post(format!("{}/payments/initiate", self.base_url))
            .header("Idempotency-Key", request.request_id.to_string())
            .json(request)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected { status: status.as_u16(), body });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        Ok(InitiationAck::from_response(body))
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn initiate(&self, request: &InitiatePayment) -> Result<InitiationAck, GatewayError> {
        let result = retry_on_transient(self.retry_config.clone(), move |attempt| async move {
            tracing::debug!(
                attempt = attempt,
                request_id = %request.request_id,
                "Initiating gateway payment"
            );

            match self.circuit_breaker.call(self.send_once(request)).await {
                Ok(ack) => Ok(ack),
                Err(CircuitBreakerError::CircuitOpen) => Err(GatewayError::CircuitOpen),
                Err(CircuitBreakerError::OperationFailed(e)) => Err(e),
            }
        })
        .await;

        let ack = result.into_result()?;

        tracing::info!(
            request_id = %request.request_id,
            checkout_reference = ?ack.checkout_reference,
            "Gateway accepted payment initiation"
        );

        Ok(ack)
    }
}

use crate::errors::ServiceError;
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Client for the external hosted-payment gateway.
///
/// The gateway hosts the card form; we only create a session carrying the
/// amount, the purchaser email, and enough opaque metadata (cart id,
/// shipping address) to reconcile the asynchronous completion webhook.
#[derive(Clone)]
pub struct PaymentGateway {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

/// Input for creating a hosted checkout session
#[derive(Debug, Clone)]
pub struct CreateSessionInput {
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    pub customer_email: String,
    pub cart_id: Uuid,
    pub success_url: String,
    pub cancel_url: String,
    /// Echoed back verbatim in the completion webhook.
    pub metadata: Vec<(String, String)>,
}

/// Hosted session reference returned to the caller for redirect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySession {
    pub id: String,
    pub url: String,
}

impl PaymentGateway {
    pub fn new(base_url: String, secret_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            secret_key,
        }
    }

    /// Creates a hosted checkout session.
    ///
    /// # Errors
    ///
    /// * `GatewayError` - transport failure or a non-success gateway reply
    #[instrument(skip(self, input), fields(cart_id = %input.cart_id, amount_minor = input.amount_minor))]
    pub async fn create_session(
        &self,
        input: CreateSessionInput,
    ) -> Result<GatewaySession, ServiceError> {
        let mut params: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("success_url".into(), input.success_url),
            ("cancel_url".into(), input.cancel_url),
            ("customer_email".into(), input.customer_email),
            ("client_reference_id".into(), input.cart_id.to_string()),
            (
                "line_items[0][price_data][currency]".into(),
                input.currency,
            ),
            (
                "line_items[0][price_data][unit_amount]".into(),
                input.amount_minor.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".into(),
                input.description,
            ),
            ("line_items[0][quantity]".into(), "1".into()),
        ];
        for (key, value) in input.metadata {
            params.push((format!("metadata[{}]", key), value));
        }

        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.base_url))
            .bearer_auth(&self.secret_key)
            .timeout(Duration::from_secs(15))
            .form(&params)
            .send()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("session request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, %body, "gateway rejected session creation");
            return Err(ServiceError::GatewayError(format!(
                "gateway returned {}",
                status
            )));
        }

        let session: GatewaySession = response
            .json()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("invalid session response: {}", e)))?;

        info!(session_id = %session.id, "created hosted checkout session");
        Ok(session)
    }
}

/// Converts a decimal amount to the currency's minor unit (cents).
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::from(100))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| {
            ServiceError::InternalError(format!("amount {} out of range for minor units", amount))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn minor_units_are_cents() {
        assert_eq!(to_minor_units(dec!(210)).unwrap(), 21000);
        assert_eq!(to_minor_units(dec!(49.99)).unwrap(), 4999);
        assert_eq!(to_minor_units(dec!(0)).unwrap(), 0);
    }

    #[test]
    fn minor_units_round_half_away_from_zero() {
        assert_eq!(to_minor_units(dec!(1.005)).unwrap(), 101);
    }
}

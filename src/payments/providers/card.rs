use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    GatewaySession, ProviderName, SessionRequest, Settlement, SettlementRequest,
};
use crate::payments::utils::PaymentHttpClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

const PROVIDER: &str = "card";

#[derive(Debug, Clone)]
pub struct CardGatewayConfig {
    pub secret_key: String,
    pub base_url: String,
    /// `{CHECKOUT_SESSION_ID}` is substituted by the gateway on redirect
    pub success_url: String,
    pub cancel_url: String,
    pub timeout_secs: u64,
}

impl Default for CardGatewayConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            base_url: "https://api.stripe.com/v1".to_string(),
            success_url: "http://localhost:4200/payment-success?session_id={CHECKOUT_SESSION_ID}"
                .to_string(),
            cancel_url: "http://localhost:4200/payment-cancel".to_string(),
            timeout_secs: 30,
        }
    }
}

impl CardGatewayConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let secret_key =
            std::env::var("CARD_GATEWAY_SECRET_KEY").map_err(|_| PaymentError::ValidationError {
                message: "CARD_GATEWAY_SECRET_KEY environment variable is required".to_string(),
                field: Some("CARD_GATEWAY_SECRET_KEY".to_string()),
            })?;
        let defaults = Self::default();

        Ok(Self {
            base_url: std::env::var("CARD_GATEWAY_BASE_URL").unwrap_or(defaults.base_url),
            success_url: std::env::var("CARD_GATEWAY_SUCCESS_URL").unwrap_or(defaults.success_url),
            cancel_url: std::env::var("CARD_GATEWAY_CANCEL_URL").unwrap_or(defaults.cancel_url),
            timeout_secs: std::env::var("CARD_GATEWAY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
            secret_key,
        })
    }
}

/// Hosted card checkout (Stripe-compatible checkout sessions API)
pub struct CardGateway {
    config: CardGatewayConfig,
    http: PaymentHttpClient,
}

impl CardGateway {
    pub fn new(config: CardGatewayConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(PROVIDER, Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(CardGatewayConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }
}

#[async_trait]
impl PaymentGateway for CardGateway {
    async fn create_session(&self, request: SessionRequest) -> PaymentResult<GatewaySession> {
        let form = build_session_form(&self.config, &request)?;
        let raw: CheckoutSession = self
            .http
            .post_form(
                &self.endpoint("/checkout/sessions"),
                Some(&self.config.secret_key),
                &form,
            )
            .await?;

        let checkout_url = raw
            .url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| PaymentError::MalformedResponse {
                provider: PROVIDER.to_string(),
                message: "checkout session without url".to_string(),
            })?;

        info!(
            order_id = request.order_id,
            payment_id = %request.payment_id,
            session_id = %raw.id,
            "card checkout session created"
        );

        Ok(GatewaySession {
            reference: raw.id,
            checkout_url,
            provider_token: None,
            expires_at: raw.expires_at.and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)),
        })
    }

    async fn get_settlement(&self, request: SettlementRequest) -> PaymentResult<Settlement> {
        let raw: CheckoutSession = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/checkout/sessions/{}", request.reference)),
                Some(&self.config.secret_key),
                None,
                &[],
            )
            .await?;
        Ok(normalize_session(&raw))
    }

    fn name(&self) -> ProviderName {
        ProviderName::CardGateway
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub expires_at: Option<i64>,
}

pub fn build_session_form(
    config: &CardGatewayConfig,
    request: &SessionRequest,
) -> PaymentResult<Vec<(String, String)>> {
    let unit_amount = request.amount.to_minor_units()?;
    let pairs = [
        ("mode", "payment".to_string()),
        ("payment_method_types[0]", "card".to_string()),
        ("success_url", config.success_url.clone()),
        ("cancel_url", config.cancel_url.clone()),
        ("client_reference_id", request.payment_id.to_string()),
        ("line_items[0][quantity]", "1".to_string()),
        (
            "line_items[0][price_data][currency]",
            request.amount.currency.to_lowercase(),
        ),
        ("line_items[0][price_data][unit_amount]", unit_amount.to_string()),
        (
            "line_items[0][price_data][product_data][name]",
            format!("Order #{}", request.order_id),
        ),
        ("metadata[order_id]", request.order_id.to_string()),
        ("metadata[payment_id]", request.payment_id.to_string()),
    ];
    Ok(pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect())
}

pub fn normalize_session(raw: &CheckoutSession) -> Settlement {
    match raw.payment_status.as_deref() {
        Some("paid") | Some("no_payment_required") => Settlement::Paid {
            transaction_id: raw.id.clone(),
        },
        other => Settlement::NotPaid {
            reason: format!(
                "checkout session {} with payment_status {}",
                raw.status.as_deref().unwrap_or("unknown"),
                other.unwrap_or("unknown")
            ),
        },
    }
}

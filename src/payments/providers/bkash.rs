use crate::logging::mask_token;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    GatewaySession, ProviderName, SessionRequest, Settlement, SettlementRequest,
};
use crate::payments::utils::PaymentHttpClient;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const PROVIDER: &str = "bkash";
const SUCCESS_CODE: &str = "0000";

#[derive(Debug, Clone)]
pub struct BkashConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub app_key: String,
    pub app_secret: String,
    pub callback_url: String,
    pub default_payer_reference: String,
    pub grant_token_path: String,
    pub create_payment_path: String,
    pub execute_payment_path: String,
    pub timeout_secs: u64,
    /// How long a granted token is reused before a new grant
    pub token_ttl: Duration,
}

impl Default for BkashConfig {
    fn default() -> Self {
        Self {
            base_url: "https://tokenized.sandbox.bka.sh/v1.2.0-beta".to_string(),
            username: String::new(),
            password: String::new(),
            app_key: String::new(),
            app_secret: String::new(),
            callback_url: "http://localhost:8000/payments/bkash/callback".to_string(),
            default_payer_reference: "01700000000".to_string(),
            grant_token_path: "/tokenized/checkout/token/grant".to_string(),
            create_payment_path: "/tokenized/checkout/create".to_string(),
            execute_payment_path: "/tokenized/checkout/execute".to_string(),
            timeout_secs: 30,
            token_ttl: Duration::from_secs(55 * 60),
        }
    }
}

impl BkashConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let required = |name: &str| {
            std::env::var(name).map_err(|_| PaymentError::ValidationError {
                message: format!("{} environment variable is required", name),
                field: Some(name.to_string()),
            })
        };
        let defaults = Self::default();

        Ok(Self {
            username: required("BKASH_USERNAME")?,
            password: required("BKASH_PASSWORD")?,
            app_key: required("BKASH_APP_KEY")?,
            app_secret: required("BKASH_APP_SECRET")?,
            base_url: std::env::var("BKASH_BASE_URL").unwrap_or(defaults.base_url),
            callback_url: std::env::var("BKASH_CALLBACK_URL").unwrap_or(defaults.callback_url),
            default_payer_reference: std::env::var("BKASH_PAYER_REFERENCE")
                .unwrap_or(defaults.default_payer_reference),
            grant_token_path: std::env::var("BKASH_GRANT_TOKEN_PATH")
                .unwrap_or(defaults.grant_token_path),
            create_payment_path: std::env::var("BKASH_CREATE_PAYMENT_PATH")
                .unwrap_or(defaults.create_payment_path),
            execute_payment_path: std::env::var("BKASH_EXECUTE_PAYMENT_PATH")
                .unwrap_or(defaults.execute_payment_path),
            timeout_secs: std::env::var("BKASH_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
            token_ttl: std::env::var("BKASH_TOKEN_TTL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.token_ttl),
        })
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    issued_at: Instant,
}

/// bKash tokenized checkout.
///
/// Every call carries a grant token in the raw `authorization` header. The
/// token used to create a payment is handed back as
/// [`GatewaySession::provider_token`] because bKash only executes a payment
/// with the token it was created under.
pub struct BkashGateway {
    config: BkashConfig,
    http: PaymentHttpClient,
    token: RwLock<Option<CachedToken>>,
}

impl BkashGateway {
    pub fn new(config: BkashConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(PROVIDER, Duration::from_secs(config.timeout_secs))?;
        Ok(Self {
            config,
            http,
            token: RwLock::new(None),
        })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(BkashConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn grant_token(&self) -> PaymentResult<String> {
        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.issued_at.elapsed() < self.config.token_ttl {
                    return Ok(token.value.clone());
                }
            }
        }

        let payload = serde_json::json!({
            "app_key": self.config.app_key,
            "app_secret": self.config.app_secret,
        });
        let raw: BkashTokenResponse = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(&self.config.grant_token_path),
                None,
                Some(&payload),
                &[
                    ("username", self.config.username.as_str()),
                    ("password", self.config.password.as_str()),
                    ("accept", "application/json"),
                ],
            )
            .await?;

        let value = raw
            .id_token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| PaymentError::AuthenticationError {
                provider: PROVIDER.to_string(),
                message: raw
                    .status_message
                    .unwrap_or_else(|| "grant token response without id_token".to_string()),
            })?;

        debug!(token = %mask_token(&value), "bkash grant token issued");
        *self.token.write().await = Some(CachedToken {
            value: value.clone(),
            issued_at: Instant::now(),
        });
        Ok(value)
    }

    /// Drop the cached grant if it is the one that was just refused
    async fn forget_token(&self, token: &str) {
        let mut cached = self.token.write().await;
        if cached.as_ref().is_some_and(|t| t.value == token) {
            *cached = None;
        }
    }

    async fn post(&self, path: &str, body: &JsonValue, token: &str) -> PaymentResult<JsonValue> {
        self.http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(path),
                None,
                Some(body),
                &[
                    ("authorization", token),
                    ("x-app-key", self.config.app_key.as_str()),
                    ("accept", "application/json"),
                ],
            )
            .await
    }
}

#[async_trait]
impl PaymentGateway for BkashGateway {
    async fn create_session(&self, request: SessionRequest) -> PaymentResult<GatewaySession> {
        let token = self.grant_token().await?;
        let payload = build_create_payload(&self.config, &request);

        let raw = self
            .post(&self.config.create_payment_path, &payload, &token)
            .await?;
        let session = normalize_create(&raw, token)?;

        info!(
            order_id = request.order_id,
            payment_id = %request.payment_id,
            reference = %session.reference,
            "bkash payment created"
        );
        Ok(session)
    }

    async fn get_settlement(&self, request: SettlementRequest) -> PaymentResult<Settlement> {
        let token = match request.provider_token {
            Some(token) => token,
            None => {
                warn!(
                    payment_id = %request.payment_id,
                    "no stored bkash token for payment, using a fresh grant"
                );
                self.grant_token().await?
            }
        };

        let payload = serde_json::json!({ "paymentID": request.reference });
        let outcome = match self
            .post(&self.config.execute_payment_path, &payload, &token)
            .await
        {
            Ok(raw) => normalize_execute(&raw),
            Err(e) => Err(e),
        };

        if let Err(PaymentError::AuthenticationError { message, .. }) = &outcome {
            warn!(
                payment_id = %request.payment_id,
                error = %message,
                "bkash rejected the execute token"
            );
            self.forget_token(&token).await;
        }
        outcome
    }

    fn name(&self) -> ProviderName {
        ProviderName::BkashWallet
    }
}

#[derive(Debug, Deserialize)]
struct BkashTokenResponse {
    id_token: Option<String>,
    #[serde(rename = "statusMessage")]
    status_message: Option<String>,
}

pub fn build_create_payload(config: &BkashConfig, request: &SessionRequest) -> JsonValue {
    let payer_reference = request
        .payer_reference
        .clone()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| config.default_payer_reference.clone());

    serde_json::json!({
        "mode": "0011",
        "payerReference": payer_reference,
        "callbackURL": config.callback_url,
        "amount": request.amount.to_gateway_string(),
        "currency": request.amount.currency,
        "intent": "sale",
        "merchantInvoiceNumber": format!("INV{}-{}", request.order_id, request.payment_id.simple()),
    })
}

fn text_field<'a>(raw: &'a JsonValue, name: &str) -> Option<&'a str> {
    raw.get(name)
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn rejected(raw: &JsonValue) -> Option<PaymentError> {
    let code = text_field(raw, "statusCode").or_else(|| text_field(raw, "errorCode"))?;
    if code == SUCCESS_CODE {
        return None;
    }
    let message = text_field(raw, "statusMessage")
        .or_else(|| text_field(raw, "errorMessage"))
        .unwrap_or("request rejected");
    Some(PaymentError::ProviderError {
        provider: PROVIDER.to_string(),
        message: message.to_string(),
        provider_code: Some(code.to_string()),
        retryable: false,
    })
}

pub fn normalize_create(raw: &JsonValue, token: String) -> PaymentResult<GatewaySession> {
    if let Some(err) = rejected(raw) {
        return Err(err);
    }

    let reference = text_field(raw, "paymentID").ok_or_else(|| PaymentError::MalformedResponse {
        provider: PROVIDER.to_string(),
        message: "create response without paymentID".to_string(),
    })?;
    let checkout_url = text_field(raw, "bkashURL").ok_or_else(|| PaymentError::MalformedResponse {
        provider: PROVIDER.to_string(),
        message: "create response without bkashURL".to_string(),
    })?;

    Ok(GatewaySession {
        reference: reference.to_string(),
        checkout_url: checkout_url.to_string(),
        provider_token: Some(token),
        expires_at: None,
    })
}

/// Execute codes that say nothing about whether the customer paid.
///
/// These surface as errors so the payment keeps its state and the caller can
/// ask again once the cause is gone.
fn execute_failure(code: &str, message: &str) -> Option<PaymentError> {
    let provider_error = |retryable| PaymentError::ProviderError {
        provider: PROVIDER.to_string(),
        message: message.to_string(),
        provider_code: Some(code.to_string()),
        retryable,
    };

    match code {
        // invalid app key, invalid or expired grant token
        "2001" | "2079" => Some(PaymentError::AuthenticationError {
            provider: PROVIDER.to_string(),
            message: format!("{} ({})", message, code),
        }),
        // process failed, system error, maintenance
        "2003" | "9999" | "503" => Some(provider_error(true)),
        // execute already ran; only a status query can tell the outcome
        "2062" | "2117" => Some(provider_error(false)),
        _ => None,
    }
}

/// Interpret an execute response.
///
/// Paid requires a transaction id plus either `transactionStatus ==
/// "Completed"` or `statusMessage == "Successful"`. Auth and system failures
/// are errors, a rejection of the payment itself is `NotPaid`, and a body
/// with no status at all is malformed.
pub fn normalize_execute(raw: &JsonValue) -> PaymentResult<Settlement> {
    let transaction_status = text_field(raw, "transactionStatus");
    let status_message = text_field(raw, "statusMessage");
    let trx_id = text_field(raw, "trxID");
    let code = text_field(raw, "statusCode").or_else(|| text_field(raw, "errorCode"));

    let completed = transaction_status == Some("Completed") || status_message == Some("Successful");
    if completed {
        if let Some(trx_id) = trx_id {
            return Ok(Settlement::Paid {
                transaction_id: trx_id.to_string(),
            });
        }
    }

    let reason = status_message
        .or_else(|| text_field(raw, "errorMessage"))
        .or(transaction_status);

    if let Some(code) = code.filter(|c| *c != SUCCESS_CODE) {
        let message = reason.unwrap_or("request rejected");
        if let Some(err) = execute_failure(code, message) {
            return Err(err);
        }
        return Ok(Settlement::NotPaid {
            reason: format!("{} ({})", message, code),
        });
    }

    if reason.is_none() {
        // The API gateway in front of bKash answers a bad token with a bare message
        if let Some(message) = text_field(raw, "message") {
            return Err(PaymentError::AuthenticationError {
                provider: PROVIDER.to_string(),
                message: message.to_string(),
            });
        }
        return Err(PaymentError::MalformedResponse {
            provider: PROVIDER.to_string(),
            message: "execute response without status".to_string(),
        });
    }

    let reason = if completed {
        "completed without trxID".to_string()
    } else {
        reason.unwrap_or("payment not completed").to_string()
    };
    Ok(Settlement::NotPaid { reason })
}

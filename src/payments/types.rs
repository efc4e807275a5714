use crate::payments::error::PaymentError;
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ProviderName {
    /// Mobile-wallet checkout (bKash tokenized checkout)
    #[serde(rename = "bkash")]
    BkashWallet,
    /// Hosted card checkout session
    #[serde(rename = "card")]
    CardGateway,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::BkashWallet => "bkash",
            ProviderName::CardGateway => "card",
        }
    }

    /// Settlement currency; each gateway account settles in exactly one
    pub fn currency(&self) -> &'static str {
        match self {
            ProviderName::BkashWallet => "BDT",
            ProviderName::CardGateway => "USD",
        }
    }

    pub fn all() -> [ProviderName; 2] {
        [ProviderName::BkashWallet, ProviderName::CardGateway]
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "bkash" | "bkash_wallet" | "bkash-wallet" => Ok(ProviderName::BkashWallet),
            "card" | "card_gateway" | "card-gateway" | "stripe" => Ok(ProviderName::CardGateway),
            _ => Err(PaymentError::UnsupportedProvider {
                provider: value.to_string(),
            }),
        }
    }
}

/// Lifecycle of one payment attempt.
///
/// `Pending -> Initiated -> {Completed | Failed}`, with `Cancelled`
/// reachable from either non-terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PaymentStatus {
    Pending,
    Initiated,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_label())
    }
}

impl PaymentStatus {
    pub fn valid_transitions(&self) -> &'static [PaymentStatus] {
        match self {
            PaymentStatus::Pending => &[
                PaymentStatus::Initiated,
                PaymentStatus::Failed,
                PaymentStatus::Cancelled,
            ],
            PaymentStatus::Initiated => &[
                PaymentStatus::Completed,
                PaymentStatus::Failed,
                PaymentStatus::Cancelled,
            ],
            PaymentStatus::Completed | PaymentStatus::Failed | PaymentStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: PaymentStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed | PaymentStatus::Failed | PaymentStatus::Cancelled
        )
    }

    /// Counts toward the one-active-payment-per-order-and-provider rule
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status.to_lowercase().as_str() {
            "pending" => Some(PaymentStatus::Pending),
            "initiated" => Some(PaymentStatus::Initiated),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            "cancelled" => Some(PaymentStatus::Cancelled),
            _ => None,
        }
    }

    pub fn to_db_status(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Initiated => "initiated",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    /// Wire label used in API responses and order-service updates
    pub fn as_label(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Initiated => "Initiated",
            PaymentStatus::Completed => "Completed",
            PaymentStatus::Failed => "Failed",
            PaymentStatus::Cancelled => "Cancelled",
        }
    }
}

/// Fixed-point amount in a single currency.
///
/// Amounts carry at most two fractional digits and are never converted
/// through floating point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    #[serde(
        serialize_with = "serialize_amount",
        deserialize_with = "deserialize_amount"
    )]
    pub amount: BigDecimal,
    pub currency: String,
}

impl Money {
    pub fn new(amount: BigDecimal, currency: impl Into<String>) -> Result<Self, PaymentError> {
        validate_amount(&amount)?;
        let currency = currency.into();
        if currency.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "currency is required".to_string(),
                field: Some("currency".to_string()),
            });
        }
        Ok(Self { amount, currency })
    }

    /// Amount formatted with exactly two decimals, e.g. `"19.99"`
    pub fn to_gateway_string(&self) -> String {
        format_amount(&self.amount)
    }

    /// Integer minor units (cents), e.g. `1999` for `19.99`
    pub fn to_minor_units(&self) -> Result<i64, PaymentError> {
        let (digits, _) = self.amount.with_scale(2).as_bigint_and_exponent();
        digits.to_i64().ok_or_else(|| PaymentError::ValidationError {
            message: format!("amount {} is out of range", self.to_gateway_string()),
            field: Some("amount".to_string()),
        })
    }
}

/// Amount must be positive with no more than two fractional digits
pub fn validate_amount(amount: &BigDecimal) -> Result<(), PaymentError> {
    if *amount <= BigDecimal::from(0) {
        return Err(PaymentError::InvalidAmount {
            amount: amount.to_string(),
            reason: "amount must be greater than zero".to_string(),
        });
    }
    let (_, scale) = amount.normalized().as_bigint_and_exponent();
    if scale > 2 {
        return Err(PaymentError::InvalidAmount {
            amount: amount.to_string(),
            reason: "amount supports at most two decimal places".to_string(),
        });
    }
    Ok(())
}

pub fn parse_amount(raw: &str) -> Result<BigDecimal, PaymentError> {
    let amount = BigDecimal::from_str(raw.trim()).map_err(|_| PaymentError::InvalidAmount {
        amount: raw.to_string(),
        reason: "not a decimal number".to_string(),
    })?;
    validate_amount(&amount)?;
    Ok(amount)
}

pub fn format_amount(amount: &BigDecimal) -> String {
    amount.with_scale(2).to_string()
}

pub fn serialize_amount<S: Serializer>(
    amount: &BigDecimal,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_amount(amount))
}

/// Accepts `"19.99"` or `19.99`.
///
/// JSON numbers are taken through their shortest textual form, so `19.99`
/// arrives as exactly 19.99 rather than the nearest binary float.
pub fn deserialize_amount<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BigDecimal, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawAmount {
        Text(String),
        Number(serde_json::Number),
    }

    let text = match RawAmount::deserialize(deserializer)? {
        RawAmount::Text(text) => text,
        RawAmount::Number(number) => number.to_string(),
    };
    BigDecimal::from_str(text.trim()).map_err(serde::de::Error::custom)
}

/// Input to [`PaymentGateway::create_session`](super::provider::PaymentGateway::create_session)
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub payment_id: Uuid,
    pub order_id: i64,
    pub amount: Money,
    /// Customer reference forwarded to gateways that need one
    pub payer_reference: Option<String>,
}

/// Remote checkout session created by a gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySession {
    /// Gateway-assigned id (bKash `paymentID`, checkout session id)
    pub reference: String,
    pub checkout_url: String,
    /// Credential that later settlement calls for this payment must reuse
    pub provider_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct SettlementRequest {
    pub payment_id: Uuid,
    pub reference: String,
    pub provider_token: Option<String>,
}

/// Normalized answer to "has this payment been captured?"
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Paid { transaction_id: String },
    NotPaid { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_name_parsing_accepts_aliases() {
        assert_eq!(
            ProviderName::from_str("bKash").unwrap(),
            ProviderName::BkashWallet
        );
        assert_eq!(
            ProviderName::from_str("stripe").unwrap(),
            ProviderName::CardGateway
        );
        assert!(ProviderName::from_str("paypal").is_err());
    }

    #[test]
    fn payment_status_transitions() {
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Initiated));
        assert!(PaymentStatus::Initiated.can_transition_to(PaymentStatus::Completed));
        assert!(PaymentStatus::Initiated.can_transition_to(PaymentStatus::Cancelled));
        assert!(!PaymentStatus::Pending.can_transition_to(PaymentStatus::Completed));
        assert!(!PaymentStatus::Completed.can_transition_to(PaymentStatus::Failed));
        assert!(PaymentStatus::Failed.valid_transitions().is_empty());
    }

    #[test]
    fn payment_status_db_round_trip() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Initiated,
            PaymentStatus::Completed,
            PaymentStatus::Failed,
            PaymentStatus::Cancelled,
        ] {
            assert_eq!(
                PaymentStatus::from_db_status(status.to_db_status()),
                Some(status)
            );
        }
        assert_eq!(PaymentStatus::from_db_status("refunded"), None);
    }

    #[test]
    fn gateway_string_has_exactly_two_decimals() {
        let money = Money::new(parse_amount("19.99").unwrap(), "USD").unwrap();
        assert_eq!(money.to_gateway_string(), "19.99");

        let whole = Money::new(parse_amount("100").unwrap(), "USD").unwrap();
        assert_eq!(whole.to_gateway_string(), "100.00");

        let tenth = Money::new(parse_amount("0.5").unwrap(), "BDT").unwrap();
        assert_eq!(tenth.to_gateway_string(), "0.50");
    }

    #[test]
    fn minor_units_are_exact() {
        let money = Money::new(parse_amount("19.99").unwrap(), "USD").unwrap();
        assert_eq!(money.to_minor_units().unwrap(), 1999);

        let money = Money::new(parse_amount("0.07").unwrap(), "USD").unwrap();
        assert_eq!(money.to_minor_units().unwrap(), 7);
    }

    #[test]
    fn invalid_amounts_are_rejected() {
        assert!(parse_amount("0").is_err());
        assert!(parse_amount("-5.00").is_err());
        assert!(parse_amount("1.999").is_err());
        assert!(parse_amount("abc").is_err());
        assert!(parse_amount("1.990").is_ok());
    }

    #[test]
    fn json_number_amount_does_not_drift() {
        #[derive(Deserialize)]
        struct Body {
            #[serde(deserialize_with = "deserialize_amount")]
            amount: BigDecimal,
        }

        let from_number: Body = serde_json::from_str(r#"{"amount": 19.99}"#).unwrap();
        let from_text: Body = serde_json::from_str(r#"{"amount": "19.99"}"#).unwrap();
        assert_eq!(format_amount(&from_number.amount), "19.99");
        assert_eq!(from_number.amount, from_text.amount);
    }

    #[test]
    fn money_serializes_amount_as_fixed_string() {
        let money = Money::new(parse_amount("5").unwrap(), "BDT").unwrap();
        let json = serde_json::to_value(&money).unwrap();
        assert_eq!(json["amount"], "5.00");
        assert_eq!(json["currency"], "BDT");
    }
}

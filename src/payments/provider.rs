use crate::payments::error::PaymentResult;
use crate::payments::types::{
    GatewaySession, ProviderName, SessionRequest, Settlement, SettlementRequest,
};
use async_trait::async_trait;

/// Capability every payment gateway exposes to the orchestrator.
///
/// Implementations make exactly one attempt per call; retrying is the
/// caller's decision.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a remote checkout session for the payment
    async fn create_session(&self, request: SessionRequest) -> PaymentResult<GatewaySession>;

    /// Ask the gateway whether the session has been paid.
    ///
    /// `Ok(Settlement::NotPaid)` means the gateway answered and the money was
    /// not captured; `Err` means the gateway could not be asked.
    async fn get_settlement(&self, request: SettlementRequest) -> PaymentResult<Settlement>;

    fn name(&self) -> ProviderName;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{parse_amount, Money};
    use uuid::Uuid;

    struct MockGateway;

    #[async_trait]
    impl PaymentGateway for MockGateway {
        async fn create_session(&self, request: SessionRequest) -> PaymentResult<GatewaySession> {
            Ok(GatewaySession {
                reference: format!("mock_{}", request.order_id),
                checkout_url: "https://example.com/pay".to_string(),
                provider_token: None,
                expires_at: None,
            })
        }

        async fn get_settlement(&self, request: SettlementRequest) -> PaymentResult<Settlement> {
            Ok(Settlement::Paid {
                transaction_id: request.reference,
            })
        }

        fn name(&self) -> ProviderName {
            ProviderName::CardGateway
        }
    }

    #[tokio::test]
    async fn trait_can_be_implemented_by_mock_gateway() {
        let gateway: Box<dyn PaymentGateway> = Box::new(MockGateway);
        let payment_id = Uuid::new_v4();

        let session = gateway
            .create_session(SessionRequest {
                payment_id,
                order_id: 42,
                amount: Money::new(parse_amount("100.00").unwrap(), "USD").unwrap(),
                payer_reference: None,
            })
            .await
            .expect("session creation should succeed");
        assert_eq!(session.reference, "mock_42");

        let settlement = gateway
            .get_settlement(SettlementRequest {
                payment_id,
                reference: session.reference.clone(),
                provider_token: None,
            })
            .await
            .expect("settlement lookup should succeed");
        assert_eq!(
            settlement,
            Settlement::Paid {
                transaction_id: "mock_42".to_string()
            }
        );
    }
}

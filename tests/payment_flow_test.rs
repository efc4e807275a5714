//! End-to-end payment confirmation through both HTTP surfaces, with the
//! payment service updating orders in-process.

use async_trait::async_trait;
use axum::{body::Body, Router};
use http::{Request, StatusCode};
use serde_json::{json, Value};
use shopfront_payments::api::{self, orders::OrdersState, payments::PaymentsState};
use shopfront_payments::cache::{CacheClient, InMemoryCache};
use shopfront_payments::clients::{LocalOrderServiceClient, OrderClientError, OrderServiceClient};
use shopfront_payments::context::RequestContext;
use shopfront_payments::database::memory::{InMemoryOrderStore, InMemoryPaymentStore};
use shopfront_payments::health::HealthChecker;
use shopfront_payments::payments::types::{
    GatewaySession, ProviderName, SessionRequest, Settlement, SettlementRequest,
};
use shopfront_payments::payments::{GatewayRegistry, PaymentGateway, PaymentResult};
use shopfront_payments::services::{
    OrchestratorConfig, OrderStatusProjector, PaymentOrchestrator, PaymentStatusUpdate,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::util::ServiceExt;
use uuid::Uuid;

const USER: &str = "5f1e9a52-3c7b-4d0e-9a41-7b2f6c8d9e10";

struct ScriptedGateway {
    transaction_id: &'static str,
    settle_delay: Option<Duration>,
    sessions: AtomicUsize,
    settlements: AtomicUsize,
    amounts: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    fn paying(transaction_id: &'static str) -> Self {
        Self {
            transaction_id,
            settle_delay: None,
            sessions: AtomicUsize::new(0),
            settlements: AtomicUsize::new(0),
            amounts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_session(&self, request: SessionRequest) -> PaymentResult<GatewaySession> {
        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.amounts
            .lock()
            .unwrap()
            .push(request.amount.to_gateway_string());
        Ok(GatewaySession {
            reference: format!("cs_test_{}", n),
            checkout_url: format!("https://checkout.example/cs_test_{}", n),
            provider_token: None,
            expires_at: None,
        })
    }

    async fn get_settlement(&self, _request: SettlementRequest) -> PaymentResult<Settlement> {
        self.settlements.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.settle_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(Settlement::Paid {
            transaction_id: self.transaction_id.to_string(),
        })
    }

    fn name(&self) -> ProviderName {
        ProviderName::CardGateway
    }
}

/// Order client that records calls and optionally refuses them
#[derive(Default)]
struct RecordingOrders {
    calls: Mutex<Vec<PaymentStatusUpdate>>,
    reject_with: Option<u16>,
}

#[async_trait]
impl OrderServiceClient for RecordingOrders {
    async fn update_payment_status(
        &self,
        _ctx: &RequestContext,
        update: PaymentStatusUpdate,
    ) -> Result<(), OrderClientError> {
        self.calls.lock().unwrap().push(update);
        match self.reject_with {
            Some(status) => Err(OrderClientError::Rejected { status }),
            None => Ok(()),
        }
    }
}

struct TestApp {
    payments: Router,
    orders: Router,
    payment_store: InMemoryPaymentStore,
    gateway: Arc<ScriptedGateway>,
}

fn cache() -> CacheClient {
    CacheClient::new(Arc::new(InMemoryCache::new()), Duration::from_secs(60))
}

fn payments_router(
    store: InMemoryPaymentStore,
    gateway: Arc<ScriptedGateway>,
    orders: Arc<dyn OrderServiceClient>,
    gateway_timeout: Duration,
) -> Router {
    let gateways: Vec<Arc<dyn PaymentGateway>> = vec![gateway];
    let orchestrator = PaymentOrchestrator::new(
        Arc::new(store),
        GatewayRegistry::with_gateways(gateways),
        orders,
        cache(),
        OrchestratorConfig {
            gateway_timeout,
            ..OrchestratorConfig::default()
        },
    );
    api::with_request_layers(api::payments::router(PaymentsState {
        orchestrator: Arc::new(orchestrator),
        health: HealthChecker::new("payment-service"),
    }))
}

/// Both services over shared in-memory order storage
fn setup(gateway: ScriptedGateway) -> TestApp {
    let projector = Arc::new(OrderStatusProjector::new(
        Arc::new(InMemoryOrderStore::new()),
        cache(),
    ));
    let payment_store = InMemoryPaymentStore::new();
    let gateway = Arc::new(gateway);

    let payments = payments_router(
        payment_store.clone(),
        gateway.clone(),
        Arc::new(LocalOrderServiceClient::new(projector.clone())),
        Duration::from_secs(5),
    );
    let orders = api::with_request_layers(api::orders::router(OrdersState {
        projector,
        health: HealthChecker::new("order-service"),
    }));

    TestApp {
        payments,
        orders,
        payment_store,
        gateway,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn create_order(app: &TestApp, total: &str) -> i64 {
    let request = Request::builder()
        .method("POST")
        .uri("/orders")
        .header("content-type", "application/json")
        .header("x-user-id", USER)
        .body(Body::from(
            json!({ "totalAmount": total, "userEmail": "buyer@example.com" }).to_string(),
        ))
        .unwrap();
    let (status, body) = send(&app.orders, request).await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_i64().unwrap()
}

async fn get_order(app: &TestApp, order_id: i64) -> Value {
    let request = Request::builder()
        .uri(format!("/orders/{}", order_id))
        .header("x-user-id", USER)
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app.orders, request).await;
    assert_eq!(status, StatusCode::OK);
    body
}

#[tokio::test]
async fn test_card_payment_marks_order_paid() {
    let app = setup(ScriptedGateway::paying("pi_3Nq"));
    let order_id = create_order(&app, "19.99").await;

    let (status, initiated) = send(
        &app.payments,
        post_json(
            "/payments/card/initiate",
            json!({ "orderId": order_id, "amount": 19.99 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(initiated["status"], "Initiated");
    assert_eq!(initiated["checkoutUrl"], "https://checkout.example/cs_test_1");
    assert_eq!(app.gateway.amounts.lock().unwrap().as_slice(), ["19.99"]);

    let (status, confirmed) = send(
        &app.payments,
        post_json("/payments/card/confirm", json!({ "orderId": order_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmed["status"], "Success");
    assert_eq!(confirmed["transactionId"], "pi_3Nq");
    assert_eq!(confirmed["paymentId"], initiated["paymentId"]);

    let order = get_order(&app, order_id).await;
    assert_eq!(order["status"], "Paid");
    assert_eq!(order["transactionId"], "pi_3Nq");
    assert_eq!(order["totalAmount"], "19.99");
    assert_eq!(order["paymentId"], initiated["paymentId"]);

    let (status, view) = send(
        &app.payments,
        Request::builder()
            .uri(format!("/payments/status/{}", order_id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["paymentStatus"], "Completed");
}

#[tokio::test]
async fn test_second_confirm_reports_already_completed() {
    let app = setup(ScriptedGateway::paying("pi_once"));
    let order_id = create_order(&app, "42.00").await;
    send(
        &app.payments,
        post_json(
            "/payments/card/initiate",
            json!({ "orderId": order_id, "amount": "42.00" }),
        ),
    )
    .await;

    let confirm = || post_json("/payments/card/confirm", json!({ "orderId": order_id }));
    let (first, _) = send(&app.payments, confirm()).await;
    let (second, body) = send(&app.payments, confirm()).await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "AlreadyCompleted");
    assert_eq!(app.gateway.settlements.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_initiates_share_one_payment() {
    let app = setup(ScriptedGateway::paying("pi_race"));
    let order_id = create_order(&app, "10.00").await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let router = app.payments.clone();
        handles.push(tokio::spawn(async move {
            send(
                &router,
                post_json(
                    "/payments/card/initiate",
                    json!({ "orderId": order_id, "amount": "10.00" }),
                ),
            )
            .await
        }));
    }

    let mut payment_ids = Vec::new();
    for handle in handles {
        let (status, body) = handle.await.unwrap();
        assert_eq!(status, StatusCode::OK, "unexpected body: {}", body);
        payment_ids.push(body["paymentId"].as_str().unwrap().to_string());
    }
    payment_ids.dedup();
    assert_eq!(payment_ids.len(), 1);
    assert_eq!(app.payment_store.all().await.len(), 1);
}

#[tokio::test]
async fn test_paid_order_ignores_late_failure() {
    let app = setup(ScriptedGateway::paying("pi_guard"));
    let order_id = create_order(&app, "5.00").await;
    send(
        &app.payments,
        post_json(
            "/payments/card/initiate",
            json!({ "orderId": order_id, "amount": "5.00" }),
        ),
    )
    .await;
    send(
        &app.payments,
        post_json("/payments/card/confirm", json!({ "orderId": order_id })),
    )
    .await;

    let late = Request::builder()
        .method("PATCH")
        .uri(format!("/orders/{}/payment-status", order_id))
        .header("content-type", "application/json")
        .header("authorization", "Bearer service-token")
        .body(Body::from(
            json!({ "paymentId": "stale", "paymentStatus": "Failed" }).to_string(),
        ))
        .unwrap();
    let (status, body) = send(&app.orders, late).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Paid");
    assert_eq!(body["paymentStatus"], "Completed");
    assert_ne!(body["paymentId"], "stale");
}

#[tokio::test]
async fn test_cancelling_second_attempt_keeps_order_paid() {
    let app = setup(ScriptedGateway::paying("pi_first"));
    let order_id = create_order(&app, "15.00").await;
    let initiate = || {
        post_json(
            "/payments/card/initiate",
            json!({ "orderId": order_id, "amount": "15.00" }),
        )
    };

    let (_, first) = send(&app.payments, initiate()).await;
    let (status, _) = send(
        &app.payments,
        post_json("/payments/card/confirm", json!({ "orderId": order_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, second) = send(&app.payments, initiate()).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(second["paymentId"], first["paymentId"]);

    let (status, cancelled) = send(
        &app.payments,
        Request::builder()
            .method("POST")
            .uri(format!(
                "/payments/{}/cancel",
                second["paymentId"].as_str().unwrap()
            ))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["paymentStatus"], "Cancelled");

    let order = get_order(&app, order_id).await;
    assert_eq!(order["status"], "Paid");
    assert_eq!(order["paymentId"], first["paymentId"]);
    assert_eq!(order["transactionId"], "pi_first");
}

#[tokio::test]
async fn test_payment_status_update_requires_bearer() {
    let app = setup(ScriptedGateway::paying("pi_auth"));
    let order_id = create_order(&app, "5.00").await;

    let request = Request::builder()
        .method("PATCH")
        .uri(format!("/orders/{}/payment-status", order_id))
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "paymentId": "p1", "paymentStatus": "Completed" }).to_string(),
        ))
        .unwrap();
    let (status, _) = send(&app.orders, request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(get_order(&app, order_id).await["status"], "Created");
}

#[tokio::test]
async fn test_confirm_without_payment_is_not_found() {
    let app = setup(ScriptedGateway::paying("pi_none"));

    let (status, body) = send(
        &app.payments,
        post_json("/payments/card/confirm", json!({ "orderId": 9999 })),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "NotFound");
}

#[tokio::test]
async fn test_settlement_timeout_leaves_order_untouched() {
    let gateway = Arc::new(ScriptedGateway {
        settle_delay: Some(Duration::from_millis(500)),
        ..ScriptedGateway::paying("pi_slow")
    });
    let orders = Arc::new(RecordingOrders::default());
    let payments = payments_router(
        InMemoryPaymentStore::new(),
        gateway,
        orders.clone(),
        Duration::from_millis(50),
    );

    send(
        &payments,
        post_json("/payments/card/initiate", json!({ "orderId": 7, "amount": "3.50" })),
    )
    .await;
    let (status, body) = send(
        &payments,
        post_json("/payments/card/confirm", json!({ "orderId": 7 })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["status"], "GatewayUnavailable");
    assert!(orders.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_order_update_failure_is_reported() {
    let orders = Arc::new(RecordingOrders {
        reject_with: Some(503),
        ..RecordingOrders::default()
    });
    let store = InMemoryPaymentStore::new();
    let payments = payments_router(
        store.clone(),
        Arc::new(ScriptedGateway::paying("pi_orphan")),
        orders.clone(),
        Duration::from_secs(5),
    );

    send(
        &payments,
        post_json("/payments/card/initiate", json!({ "orderId": 8, "amount": "12.00" })),
    )
    .await;
    let (status, body) = send(
        &payments,
        post_json("/payments/card/confirm", json!({ "orderId": 8 })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["status"], "OrderUpdateFailed");
    assert_eq!(body["transactionId"], "pi_orphan");

    // The payment stays completed; only the order side lags behind
    let payments = store.all().await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].transaction_id.as_deref(), Some("pi_orphan"));

    let calls = orders.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].order_id, 8);
    assert_eq!(calls[0].payment_status, "Completed");
}

#[tokio::test]
async fn test_unknown_payment_id_is_not_found() {
    let app = setup(ScriptedGateway::paying("pi_lookup"));
    let (status, _) = send(
        &app.payments,
        Request::builder()
            .uri(format!("/payments/{}", Uuid::new_v4()))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_settled_payment_is_found_by_transaction_id() {
    let app = setup(ScriptedGateway::paying("pi_lookup"));
    let order_id = create_order(&app, "12.00").await;
    let lookup = || {
        Request::builder()
            .uri("/payments/transaction/pi_lookup")
            .body(Body::empty())
            .unwrap()
    };

    let (status, _) = send(&app.payments, lookup()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, initiated) = send(
        &app.payments,
        post_json(
            "/payments/card/initiate",
            json!({ "orderId": order_id, "amount": "12.00" }),
        ),
    )
    .await;
    send(
        &app.payments,
        post_json("/payments/card/confirm", json!({ "orderId": order_id })),
    )
    .await;

    let (status, payment) = send(&app.payments, lookup()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payment["id"], initiated["paymentId"]);
    assert_eq!(payment["orderId"], order_id);
    assert_eq!(payment["status"], "Completed");
    assert!(payment.get("providerToken").is_none());
}

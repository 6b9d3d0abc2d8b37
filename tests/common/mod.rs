#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{self, Body},
    http::{Method, Request},
    middleware,
    response::Response,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::{json, Value};
use storefront_payments::{
    app_router,
    auth::ADMIN_ROLE,
    config::AppConfig,
    db,
    entities::{order, payment_event, product, user},
    events::{self, EventSender},
    middleware_helpers::request_id::request_id_middleware,
    services::{
        invoice_gateway::GatewayClient, notifications::LogNotifier, pricing::to_minor,
        webhook_signature::WebhookVerifier,
    },
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::MockServer;

pub const WEBHOOK_SECRET: &str = "whsec_integration_test_secret";
pub const GATEWAY_TIMEOUT: Duration = Duration::from_millis(500);

/// Settings a test may change before the app is built.
pub struct TestOptions {
    pub webhook_secret: Option<String>,
    pub shipping_fee: Decimal,
    pub discount_percent: Decimal,
    pub tax_enabled: bool,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            webhook_secret: Some(WEBHOOK_SECRET.to_string()),
            shipping_fee: Decimal::ZERO,
            discount_percent: Decimal::ZERO,
            tax_enabled: true,
        }
    }
}

/// Full router over an in-memory SQLite database and a wiremock gateway.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: MockServer,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_options(TestOptions::default()).await
    }

    pub async fn with_options(options: TestOptions) -> Self {
        let gateway = MockServer::start().await;

        let mut cfg = AppConfig::new(
            "sqlite::memory:",
            "test_secret_key_for_testing_purposes_only_32chars",
            gateway.uri(),
        );
        cfg.environment = "test".to_string();
        cfg.gateway.api_key = "gw-test-key".to_string();
        cfg.gateway.webhook_secret = options.webhook_secret;
        cfg.checkout.shipping_fee = options.shipping_fee;
        cfg.checkout.discount_percent = options.discount_percent;
        cfg.checkout.tax_enabled = options.tax_enabled;
        cfg.checkout.storefront_url = "https://shop.test".to_string();

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(64);
        let event_task = tokio::spawn(events::process_events(event_rx, Arc::new(LogNotifier)));

        let client = GatewayClient::new(&gateway.uri(), "gw-test-key", GATEWAY_TIMEOUT)
            .expect("gateway client");
        let state = AppState::new(
            Arc::new(pool),
            cfg,
            Arc::new(EventSender::new(event_tx)),
            Arc::new(client),
        );

        let router = app_router(state.clone()).layer(middleware::from_fn(request_id_middleware));

        Self {
            router,
            state,
            gateway,
            _event_task: event_task,
        }
    }

    pub fn token_for(&self, user_id: &str) -> String {
        self.state
            .auth
            .issue_token(user_id, None, &["customer"])
            .expect("token")
    }

    pub fn admin_token(&self) -> String {
        self.state
            .auth
            .issue_token("ops-admin", None, &[ADMIN_ROLE])
            .expect("token")
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Posts the payload to the webhook endpoint with an optional signature header.
    pub async fn post_webhook(&self, payload: &Value, signature: Option<String>) -> Response {
        let bytes = serde_json::to_vec(payload).expect("webhook json");
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header("content-type", "application/json");
        if let Some(sig) = signature {
            builder = builder.header("x-gateway-signature", sig);
        }
        let request = builder.body(Body::from(bytes)).expect("webhook request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during webhook request")
    }

    pub fn sign(payload: &Value) -> String {
        let bytes = serde_json::to_vec(payload).expect("webhook json");
        WebhookVerifier::new(Some(WEBHOOK_SECRET.to_string()))
            .sign(&bytes)
            .expect("signature")
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            name: Set(name.to_string()),
            price_minor: Set(to_minor(price)),
            stock: Set(stock),
            is_active: Set(true),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    pub async fn seed_user(&self) -> user::Model {
        let id = Uuid::new_v4().to_string();
        user::ActiveModel {
            id: Set(id.clone()),
            first_name: Set("Nour".to_string()),
            last_name: Set("Samir".to_string()),
            email: Set(format!("{}@example.com", &id[..8])),
            phone: Set(Some("01001234567".to_string())),
            address: Set(Some("7 Talaat Harb St, Cairo".to_string())),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed user")
    }

    pub async fn stock_of(&self, product_id: &str) -> i32 {
        product::Entity::find_by_id(product_id.to_string())
            .one(&*self.state.db)
            .await
            .expect("product query")
            .expect("product exists")
            .stock
    }

    pub async fn order(&self, order_id: &str) -> order::Model {
        order::Entity::find_by_id(order_id.to_string())
            .one(&*self.state.db)
            .await
            .expect("order query")
            .expect("order exists")
    }

    pub async fn payment_events(&self) -> Vec<payment_event::Model> {
        payment_event::Entity::find()
            .all(&*self.state.db)
            .await
            .expect("payment events")
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub fn created_invoice(invoice_id: u64, key: &str) -> Value {
    json!({
        "status": "success",
        "data": {
            "invoiceId": invoice_id,
            "invoiceKey": key,
            "url": format!("https://pay.gateway.test/invoice/{}", invoice_id)
        }
    })
}

pub fn invoice_status(key: &str, status: &str) -> Value {
    json!({
        "status": "success",
        "data": {
            "invoiceKey": key,
            "invoiceStatus": status,
            "paymentMethod": "card",
            "total": "114.00",
            "referenceNumber": "REF-7781",
            "updatedAt": "2024-06-01T10:00:00Z"
        }
    })
}

//! Storefront payments library
//!
//! Checkout, invoice-gateway integration and payment reconciliation for the
//! storefront order flow.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod services;
pub mod tracing;

use axum::{
    extract::{FromRef, State},
    response::Json,
    routing::{delete, get, post},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::{
    auth::{AuthConfig, AuthService},
    events::EventSender,
    services::{
        catalog::CatalogService, contact::PhoneNormalizer, identity::IdentityService,
        invoice_gateway::InvoiceGateway, orders::OrderService, payments::PaymentService,
        webhook_signature::WebhookVerifier,
    },
};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<EventSender>,
    pub auth: Arc<AuthService>,
    pub order_service: Arc<OrderService>,
    pub payment_service: Arc<PaymentService>,
}

impl AppState {
    /// Wires the service graph over a connected database and gateway.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn InvoiceGateway>,
    ) -> Self {
        let auth = Arc::new(AuthService::new(AuthConfig::from(&config)));
        let payment_service = Arc::new(PaymentService::new(
            db.clone(),
            gateway,
            IdentityService::new(db.clone()),
            WebhookVerifier::new(config.gateway.webhook_secret.clone()),
            PhoneNormalizer::new(config.gateway.country_code.clone()),
            event_sender.clone(),
            config.checkout.clone(),
        ));
        let order_service = Arc::new(OrderService::new(
            db.clone(),
            CatalogService::new(db.clone()),
            payment_service.clone(),
            event_sender.clone(),
            config.checkout.clone(),
            config.gateway.currency.clone(),
        ));

        Self {
            db,
            config,
            event_sender,
            auth,
            order_service,
            payment_service,
        }
    }
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

// Common response wrappers
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Routes mounted under `/api/v1`.
pub fn api_v1_routes() -> Router<AppState> {
    let orders = Router::new()
        .route("/", post(handlers::orders::create_order))
        .route("/:order_id", get(handlers::orders::get_order))
        .route("/:order_id/cancel", post(handlers::orders::cancel_order));

    let payments = Router::new()
        .route("/invoice/create", post(handlers::payments::create_invoice))
        .route("/invoice/:order_id", delete(handlers::payments::delete_invoice))
        .route("/status/:order_id", get(handlers::payments::payment_status))
        // Authenticated by signature, not bearer token.
        .route("/webhook", post(handlers::payment_webhooks::payment_webhook));

    Router::new()
        .nest("/orders", orders)
        .nest("/payments", payments)
}

/// Full application router without transport layers.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(api_status))
        .nest("/api/v1", api_v1_routes())
        .with_state(state)
}

async fn api_status() -> ApiResult<Value> {
    let status_data = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "git": option_env!("GIT_HASH").unwrap_or("unknown"),
        "build_time": option_env!("BUILD_TIME").unwrap_or("unknown"),
        "service": "storefront-payments",
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(State(state): State<AppState>) -> ApiResult<Value> {
    let db_status = match state.db.ping().await {
        Ok(_) => "healthy",
        Err(e) => {
            ::tracing::warn!(error = %e, "Database ping failed");
            "unhealthy"
        }
    };

    Ok(Json(ApiResponse::success(json!({
        "status": db_status,
        "checks": { "database": db_status },
        "timestamp": Utc::now().to_rfc3339(),
    }))))
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }
}

//! Status polling, invoice re-creation and invoice deletion against a mocked
//! gateway.

mod common;

use std::time::Duration;

use axum::http::Method;
use common::{created_invoice, invoice_status, response_json, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;
use storefront_payments::entities::order::{FulfillmentStatus, PaymentStatus};
use wiremock::{
    matchers::{method, path, query_param},
    Mock, ResponseTemplate,
};

/// Places a one-item gateway order whose invoice the gateway creates as `invoice_id`.
async fn order_with_invoice(app: &TestApp, token: &str, invoice_id: u64) -> String {
    let product = app.seed_product("Desk Lamp", dec!(100.00), 10).await;

    Mock::given(method("POST"))
        .and(path("/invoices"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(created_invoice(invoice_id, &format!("key-{}", invoice_id))),
        )
        .up_to_n_times(1)
        .mount(&app.gateway)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({ "items": [{ "productId": product.id, "quantity": 1 }] })),
            Some(token),
        )
        .await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    assert_eq!(body["data"]["invoice"]["invoiceId"], invoice_id.to_string());
    body["data"]["order"]["id"].as_str().unwrap().to_string()
}

async fn mount_status(app: &TestApp, invoice_id: u64, status: &str, times: Option<u64>) {
    let key = format!("key-{}", invoice_id);
    let mock = Mock::given(method("GET"))
        .and(path(format!("/invoices/{}", invoice_id)))
        .and(query_param("invoice_key", key.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(invoice_status(&key, status)));
    match times {
        Some(n) => mock.up_to_n_times(n).mount(&app.gateway).await,
        None => mock.mount(&app.gateway).await,
    }
}

#[tokio::test]
async fn polling_paid_applies_the_transition_once() {
    let app = TestApp::new().await;
    let shopper = app.seed_user().await;
    let token = app.token_for(&shopper.id);
    let order_id = order_with_invoice(&app, &token, 981).await;
    mount_status(&app, 981, "paid", None).await;

    let uri = format!("/api/v1/payments/status/{}", order_id);
    let first = response_json(app.request(Method::GET, &uri, None, Some(&token)).await).await;
    assert_eq!(first["data"]["paymentStatus"], "paid");
    assert_eq!(first["data"]["changed"], true);
    assert_eq!(first["data"]["paymentReference"], "REF-7781");
    assert!(first["data"]["paidAt"].is_string());

    let second = response_json(app.request(Method::GET, &uri, None, Some(&token)).await).await;
    assert_eq!(second["data"]["paymentStatus"], "paid");
    assert_eq!(second["data"]["changed"], false);
    assert_eq!(second["data"]["paidAt"], first["data"]["paidAt"]);

    let events = app.payment_events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].source, "poll");
    assert_eq!(events[0].from_status, "pending");
    assert_eq!(events[0].to_status, "paid");

    let order = app.order(&order_id).await;
    assert_eq!(order.fulfillment_status(), FulfillmentStatus::Confirmed);
    assert_eq!(order.gateway_status.as_deref(), Some("paid"));
}

#[tokio::test]
async fn expired_invoice_can_still_be_settled_late() {
    let app = TestApp::new().await;
    let shopper = app.seed_user().await;
    let token = app.token_for(&shopper.id);
    let order_id = order_with_invoice(&app, &token, 990).await;
    let uri = format!("/api/v1/payments/status/{}", order_id);

    mount_status(&app, 990, "expired", Some(1)).await;
    let failed = response_json(app.request(Method::GET, &uri, None, Some(&token)).await).await;
    assert_eq!(failed["data"]["paymentStatus"], "failed");

    mount_status(&app, 990, "paid", None).await;
    let paid = response_json(app.request(Method::GET, &uri, None, Some(&token)).await).await;
    assert_eq!(paid["data"]["paymentStatus"], "paid");
    assert_eq!(app.payment_events().await.len(), 2);
}

#[tokio::test]
async fn paid_orders_ignore_later_gateway_statuses() {
    let app = TestApp::new().await;
    let shopper = app.seed_user().await;
    let token = app.token_for(&shopper.id);
    let order_id = order_with_invoice(&app, &token, 991).await;
    let uri = format!("/api/v1/payments/status/{}", order_id);

    mount_status(&app, 991, "paid", Some(1)).await;
    app.request(Method::GET, &uri, None, Some(&token)).await;

    mount_status(&app, 991, "cancelled", None).await;
    let late = response_json(app.request(Method::GET, &uri, None, Some(&token)).await).await;
    assert_eq!(late["data"]["paymentStatus"], "paid");
    assert_eq!(late["data"]["changed"], false);
    assert_eq!(app.order(&order_id).await.payment_status(), PaymentStatus::Paid);
    assert_eq!(app.payment_events().await.len(), 1);
}

#[tokio::test]
async fn create_returns_the_pending_invoice_instead_of_a_new_one() {
    let app = TestApp::new().await;
    let shopper = app.seed_user().await;
    let token = app.token_for(&shopper.id);
    let order_id = order_with_invoice(&app, &token, 992).await;
    mount_status(&app, 992, "unpaid", None).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/invoice/create",
            Some(json!({ "orderId": order_id })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["data"]["reused"], true);
    assert_eq!(body["data"]["invoiceId"], "992");

    let posts = app
        .gateway
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.as_str() == "POST")
        .count();
    assert_eq!(posts, 1);
}

#[tokio::test]
async fn create_replaces_an_expired_invoice() {
    let app = TestApp::new().await;
    let shopper = app.seed_user().await;
    let token = app.token_for(&shopper.id);
    let order_id = order_with_invoice(&app, &token, 993).await;
    mount_status(&app, 993, "expired", None).await;

    Mock::given(method("POST"))
        .and(path("/invoices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(created_invoice(994, "key-994")))
        .expect(1)
        .mount(&app.gateway)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/invoice/create",
            Some(json!({ "orderId": order_id })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["data"]["invoiceId"], "994");
    assert_eq!(body["data"]["reused"], false);

    let order = app.order(&order_id).await;
    assert_eq!(order.invoice_ref.as_deref(), Some("key-994"));
    assert_eq!(order.invoice_attempts, 2);
    assert_eq!(order.payment_status(), PaymentStatus::Pending);

    let events = app.payment_events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].source, "create_invoice");
}

#[tokio::test]
async fn create_on_a_paid_invoice_reconciles_and_conflicts() {
    let app = TestApp::new().await;
    let shopper = app.seed_user().await;
    let token = app.token_for(&shopper.id);
    let order_id = order_with_invoice(&app, &token, 995).await;
    mount_status(&app, 995, "paid", None).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/invoice/create",
            Some(json!({ "orderId": order_id })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 409);
    assert_eq!(app.order(&order_id).await.payment_status(), PaymentStatus::Paid);
}

#[tokio::test]
async fn delete_clears_linkage_and_status_then_reports_missing_invoice() {
    let app = TestApp::new().await;
    let shopper = app.seed_user().await;
    let token = app.token_for(&shopper.id);
    let order_id = order_with_invoice(&app, &token, 996).await;

    Mock::given(method("DELETE"))
        .and(path("/invoices/996"))
        .and(query_param("invoice_key", "key-996"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "success" })))
        .expect(1)
        .mount(&app.gateway)
        .await;

    let uri = format!("/api/v1/payments/invoice/{}", order_id);
    let response = app.request(Method::DELETE, &uri, None, Some(&token)).await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["data"]["deleted"], true);

    let order = app.order(&order_id).await;
    assert!(order.invoice_id.is_none());
    assert!(order.invoice_ref.is_none());
    assert!(order.gateway_status.is_none());

    let status_uri = format!("/api/v1/payments/status/{}", order_id);
    let status = app.request(Method::GET, &status_uri, None, Some(&token)).await;
    assert_eq!(status.status(), 404);
}

#[tokio::test]
async fn deleting_a_paid_invoice_is_refused_before_any_gateway_call() {
    let app = TestApp::new().await;
    let shopper = app.seed_user().await;
    let token = app.token_for(&shopper.id);
    let order_id = order_with_invoice(&app, &token, 997).await;
    mount_status(&app, 997, "paid", None).await;
    app.request(
        Method::GET,
        &format!("/api/v1/payments/status/{}", order_id),
        None,
        Some(&token),
    )
    .await;

    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "success" })))
        .expect(0)
        .mount(&app.gateway)
        .await;

    let response = app
        .request(
            Method::DELETE,
            &format!("/api/v1/payments/invoice/{}", order_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 400);
    assert!(app.order(&order_id).await.invoice_id.is_some());
}

#[tokio::test]
async fn another_customer_cannot_poll_or_create() {
    let app = TestApp::new().await;
    let owner = app.seed_user().await;
    let stranger = app.seed_user().await;
    let order_id = order_with_invoice(&app, &app.token_for(&owner.id), 998).await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(invoice_status("key-998", "paid")))
        .expect(0)
        .mount(&app.gateway)
        .await;

    let token = app.token_for(&stranger.id);
    let poll = app
        .request(
            Method::GET,
            &format!("/api/v1/payments/status/{}", order_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(poll.status(), 403);

    let create = app
        .request(
            Method::POST,
            "/api/v1/payments/invoice/create",
            Some(json!({ "orderId": order_id })),
            Some(&token),
        )
        .await;
    assert_eq!(create.status(), 403);
}

#[tokio::test]
async fn status_timeout_surfaces_as_gateway_timeout() {
    let app = TestApp::new().await;
    let shopper = app.seed_user().await;
    let token = app.token_for(&shopper.id);
    let order_id = order_with_invoice(&app, &token, 999).await;

    Mock::given(method("GET"))
        .and(path("/invoices/999"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(invoice_status("key-999", "paid"))
                .set_delay(Duration::from_millis(1_500)),
        )
        .mount(&app.gateway)
        .await;

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/payments/status/{}", order_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 504);
    assert_eq!(app.order(&order_id).await.payment_status(), PaymentStatus::Pending);
}

#[tokio::test]
async fn gateway_credential_failure_is_unauthorized() {
    let app = TestApp::new().await;
    let shopper = app.seed_user().await;
    let token = app.token_for(&shopper.id);
    let order_id = order_with_invoice(&app, &token, 1000).await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "bad key" })))
        .mount(&app.gateway)
        .await;

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/payments/status/{}", order_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 401);
}

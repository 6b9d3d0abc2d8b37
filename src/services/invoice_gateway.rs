//! HTTP client for the external invoicing gateway.
//!
//! Every call is a single request answered with a `{status, data}` envelope.
//! Nothing is retried here; the payment service decides what to do with
//! each [`GatewayError`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, RequestBuilder, StatusCode};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::GatewayConfig;
use crate::services::contact::CustomerSnapshot;
use crate::services::pricing::{compute_amount, DiscountOptions, InvoiceItem, TaxOptions};

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// HTTP 401/403 from the gateway.
    #[error("gateway rejected credentials: {0}")]
    Auth(String),
    /// HTTP 400/422, or a precondition that failed before sending.
    #[error("gateway rejected request: {0}")]
    Validation(String),
    #[error("gateway resource not found: {0}")]
    NotFound(String),
    /// No response received. A timed-out create may still have succeeded remotely.
    #[error("gateway unreachable: {message}")]
    Transport { timed_out: bool, message: String },
    /// A response arrived but not in the expected envelope.
    #[error("unexpected gateway response: {0}")]
    Protocol(String),
}

impl GatewayError {
    pub fn is_transport(&self) -> bool {
        matches!(self, GatewayError::Transport { .. })
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        GatewayError::Transport {
            timed_out: err.is_timeout(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectUrls {
    pub success_url: String,
    pub fail_url: String,
    pub pending_url: String,
}

#[derive(Debug, Clone)]
pub struct CreateInvoiceRequest {
    pub order_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub due_date: NaiveDate,
    pub customer: CustomerSnapshot,
    pub redirect_urls: RedirectUrls,
    pub items: Vec<InvoiceItem>,
    pub tax: Option<TaxOptions>,
    pub discount: Option<DiscountOptions>,
    /// Sent as `Idempotency-Key`; reused when retrying an unknown outcome.
    pub idempotency_key: Option<String>,
}

impl CreateInvoiceRequest {
    /// Local preconditions checked before any network traffic.
    pub fn validate(&self) -> Result<(), GatewayError> {
        let missing = self.customer.missing_fields();
        if !missing.is_empty() {
            return Err(GatewayError::Validation(format!(
                "customer is missing {}",
                missing.join(", ")
            )));
        }

        let urls = [
            ("successUrl", &self.redirect_urls.success_url),
            ("failUrl", &self.redirect_urls.fail_url),
            ("pendingUrl", &self.redirect_urls.pending_url),
        ];
        if let Some((name, _)) = urls.iter().find(|(_, u)| u.trim().is_empty()) {
            return Err(GatewayError::Validation(format!("{} is required", name)));
        }

        if self.currency.trim().is_empty() {
            return Err(GatewayError::Validation("currency is required".into()));
        }

        let expected = compute_amount(&self.items, self.tax.as_ref(), self.discount.as_ref())
            .map_err(|e| GatewayError::Validation(e.to_string()))?;
        if expected != self.amount {
            return Err(GatewayError::Validation(format!(
                "amount {} does not match computed amount {}",
                self.amount, expected
            )));
        }
        Ok(())
    }
}

/// Identifiers of a freshly created invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceLink {
    pub invoice_id: String,
    pub invoice_ref: String,
    pub invoice_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceStatus {
    pub invoice_status: String,
    pub payment_method: Option<String>,
    pub amount: Option<Decimal>,
    pub reference_number: Option<String>,
    pub updated_at: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InvoiceGateway: Send + Sync {
    async fn create_invoice(
        &self,
        request: &CreateInvoiceRequest,
    ) -> Result<InvoiceLink, GatewayError>;

    async fn check_invoice_status(
        &self,
        invoice_id: &str,
        invoice_ref: &str,
    ) -> Result<InvoiceStatus, GatewayError>;

    async fn delete_invoice(&self, invoice_id: &str, invoice_ref: &str)
        -> Result<(), GatewayError>;
}

/// reqwest-backed [`InvoiceGateway`].
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl GatewayClient {
    pub fn new(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("gateway base url {} cannot carry a path", base_url);
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("storefront-payments/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url,
            api_key: api_key.into(),
        })
    }

    pub fn from_config(config: &GatewayConfig) -> anyhow::Result<Self> {
        Self::new(
            &config.base_url,
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn invoice_url(&self, invoice_id: Option<&str>, invoice_ref: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("invoices");
            if let Some(id) = invoice_id {
                segments.push(id);
            }
        }
        if let Some(reference) = invoice_ref {
            url.query_pairs_mut().append_pair("invoice_key", reference);
        }
        url
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        resource: &str,
    ) -> Result<Option<T>, GatewayError> {
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(GatewayError::from_reqwest)?;

        let status = response.status();
        let body = response.bytes().await.map_err(GatewayError::from_reqwest)?;
        debug!(status = status.as_u16(), bytes = body.len(), "gateway responded");

        match status {
            s if s.is_success() => parse_envelope(&body),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(GatewayError::Validation(error_message(&body)))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(GatewayError::Auth(error_message(&body)))
            }
            StatusCode::NOT_FOUND => Err(GatewayError::NotFound(resource.to_string())),
            other => Err(GatewayError::Protocol(format!(
                "unexpected HTTP status {}: {}",
                other.as_u16(),
                error_message(&body)
            ))),
        }
    }
}

#[async_trait]
impl InvoiceGateway for GatewayClient {
    #[instrument(skip(self, request), fields(order_id = %request.order_id, amount = %request.amount))]
    async fn create_invoice(
        &self,
        request: &CreateInvoiceRequest,
    ) -> Result<InvoiceLink, GatewayError> {
        request.validate()?;

        let body = CreateInvoiceBody::from(request);
        let mut builder = self.http.post(self.invoice_url(None, None)).json(&body);
        if let Some(key) = &request.idempotency_key {
            builder = builder.header(IDEMPOTENCY_HEADER, key);
        }

        let data: CreatedInvoiceData = self
            .send(builder, "invoice endpoint")
            .await?
            .ok_or_else(|| GatewayError::Protocol("create response carried no data".into()))?;

        if data.url.trim().is_empty() || data.invoice_key.trim().is_empty() {
            return Err(GatewayError::Protocol(
                "create response is missing invoice key or url".into(),
            ));
        }

        Ok(InvoiceLink {
            invoice_id: data.invoice_id,
            invoice_ref: data.invoice_key,
            invoice_url: data.url,
        })
    }

    #[instrument(skip(self, invoice_ref), fields(invoice_id = %invoice_id))]
    async fn check_invoice_status(
        &self,
        invoice_id: &str,
        invoice_ref: &str,
    ) -> Result<InvoiceStatus, GatewayError> {
        require_pair(invoice_id, invoice_ref)?;

        let builder = self.http.get(self.invoice_url(Some(invoice_id), Some(invoice_ref)));
        let data: InvoiceStatusData = self
            .send(builder, &format!("invoice {}", invoice_id))
            .await?
            .ok_or_else(|| GatewayError::Protocol("status response carried no data".into()))?;

        if let Some(returned) = data.invoice_key.as_deref() {
            if returned != invoice_ref {
                warn!(invoice_id, "gateway returned a different invoice key");
                return Err(GatewayError::Validation(format!(
                    "invoice reference does not match invoice {}",
                    invoice_id
                )));
            }
        }

        Ok(InvoiceStatus {
            invoice_status: data.invoice_status,
            payment_method: data.payment_method,
            amount: data.total,
            reference_number: data.reference_number,
            updated_at: data.updated_at,
        })
    }

    #[instrument(skip(self, invoice_ref), fields(invoice_id = %invoice_id))]
    async fn delete_invoice(
        &self,
        invoice_id: &str,
        invoice_ref: &str,
    ) -> Result<(), GatewayError> {
        require_pair(invoice_id, invoice_ref)?;

        let builder = self
            .http
            .delete(self.invoice_url(Some(invoice_id), Some(invoice_ref)));
        let _: Option<Value> = self.send(builder, &format!("invoice {}", invoice_id)).await?;
        Ok(())
    }
}

fn require_pair(invoice_id: &str, invoice_ref: &str) -> Result<(), GatewayError> {
    if invoice_id.trim().is_empty() || invoice_ref.trim().is_empty() {
        return Err(GatewayError::Validation(
            "both invoice id and invoice reference are required".into(),
        ));
    }
    Ok(())
}

#[derive(Deserialize)]
struct Envelope<T> {
    status: String,
    #[serde(default = "Option::default")]
    data: Option<T>,
    #[serde(default)]
    message: Option<Value>,
}

fn parse_envelope<T: DeserializeOwned>(body: &[u8]) -> Result<Option<T>, GatewayError> {
    let envelope: Envelope<T> = serde_json::from_slice(body)
        .map_err(|e| GatewayError::Protocol(format!("malformed envelope: {}", e)))?;
    if !envelope.status.eq_ignore_ascii_case("success") {
        return Err(GatewayError::Protocol(format!(
            "envelope status '{}'{}",
            envelope.status,
            envelope
                .message
                .map(|m| format!(": {}", value_text(&m)))
                .unwrap_or_default()
        )));
    }
    Ok(envelope.data)
}

fn error_message(body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        if let Some(message) = value.get("message") {
            return value_text(message);
        }
    }
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        "no details".to_string()
    } else {
        text.chars().take(300).collect()
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) if !s.trim().is_empty() => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "invalid invoice id: {}",
            other
        ))),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateInvoiceBody<'a> {
    cart_total: Decimal,
    currency: &'a str,
    due_date: String,
    customer: CustomerBody<'a>,
    redirection_urls: RedirectBody<'a>,
    cart_items: Vec<CartItemBody<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tax_data: Option<TaxBody<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    discount_data: Option<DiscountBody>,
    pay_load: PayloadBody<'a>,
}

#[derive(Serialize)]
struct CustomerBody<'a> {
    first_name: &'a str,
    last_name: &'a str,
    email: &'a str,
    phone: &'a str,
    address: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RedirectBody<'a> {
    success_url: &'a str,
    fail_url: &'a str,
    pending_url: &'a str,
}

#[derive(Serialize)]
struct CartItemBody<'a> {
    name: &'a str,
    price: Decimal,
    quantity: u32,
}

#[derive(Serialize)]
struct TaxBody<'a> {
    code: &'a str,
    percent: Decimal,
}

#[derive(Serialize)]
struct DiscountBody {
    #[serde(rename = "type")]
    kind: &'static str,
    value: Decimal,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PayloadBody<'a> {
    order_id: &'a str,
}

impl<'a> From<&'a CreateInvoiceRequest> for CreateInvoiceBody<'a> {
    fn from(req: &'a CreateInvoiceRequest) -> Self {
        Self {
            cart_total: req.amount,
            currency: &req.currency,
            due_date: req.due_date.format("%Y-%m-%d").to_string(),
            customer: CustomerBody {
                first_name: &req.customer.first_name,
                last_name: &req.customer.last_name,
                email: &req.customer.email,
                phone: &req.customer.phone,
                address: &req.customer.address,
            },
            redirection_urls: RedirectBody {
                success_url: &req.redirect_urls.success_url,
                fail_url: &req.redirect_urls.fail_url,
                pending_url: &req.redirect_urls.pending_url,
            },
            cart_items: req
                .items
                .iter()
                .map(|item| CartItemBody {
                    name: &item.name,
                    price: item.price,
                    quantity: item.quantity,
                })
                .collect(),
            tax_data: req.tax.as_ref().map(|tax| TaxBody {
                code: tax.code_or_default(),
                percent: tax.percent,
            }),
            discount_data: req.discount.map(|discount| match discount {
                DiscountOptions::Fixed(value) => DiscountBody {
                    kind: "literal",
                    value,
                },
                DiscountOptions::Percent(value) => DiscountBody { kind: "pcg", value },
            }),
            pay_load: PayloadBody {
                order_id: &req.order_id,
            },
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedInvoiceData {
    #[serde(deserialize_with = "id_string")]
    invoice_id: String,
    invoice_key: String,
    url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvoiceStatusData {
    #[serde(default)]
    invoice_key: Option<String>,
    invoice_status: String,
    #[serde(default)]
    payment_method: Option<String>,
    #[serde(default)]
    total: Option<Decimal>,
    #[serde(default)]
    reference_number: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GatewayClient {
        GatewayClient::new(&server.uri(), "test-api-key", Duration::from_millis(500)).unwrap()
    }

    fn request() -> CreateInvoiceRequest {
        let items = vec![InvoiceItem::new("Desk lamp", dec!(100.00), 1)];
        let tax = Some(TaxOptions::percent(dec!(14)));
        CreateInvoiceRequest {
            order_id: "order-42".into(),
            amount: dec!(114.00),
            currency: "EGP".into(),
            due_date: NaiveDate::from_ymd_opt(2026, 10, 22).unwrap(),
            customer: CustomerSnapshot {
                first_name: "Omar".into(),
                last_name: "Hassan".into(),
                email: "omar@example.com".into(),
                phone: "+201012345678".into(),
                address: "5 Tahrir Sq".into(),
            },
            redirect_urls: RedirectUrls {
                success_url: "https://shop.test/payment/success?orderId=order-42".into(),
                fail_url: "https://shop.test/payment/fail?orderId=order-42".into(),
                pending_url: "https://shop.test/payment/pending?orderId=order-42".into(),
            },
            items,
            tax,
            discount: None,
            idempotency_key: Some("order-42-0".into()),
        }
    }

    #[tokio::test]
    async fn create_invoice_posts_envelope_and_returns_link() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/invoices"))
            .and(header("authorization", "Bearer test-api-key"))
            .and(header("idempotency-key", "order-42-0"))
            .and(body_partial_json(json!({
                "cartTotal": "114.00",
                "currency": "EGP",
                "dueDate": "2026-10-22",
                "taxData": {"code": "T1"},
                "customer": {"phone": "+201012345678"},
                "payLoad": {"orderId": "order-42"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"invoiceId": 981, "invoiceKey": "key-981", "url": "https://pay.test/i/981"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let link = client(&server).create_invoice(&request()).await.unwrap();
        assert_eq!(link.invoice_id, "981");
        assert_eq!(link.invoice_ref, "key-981");
        assert_eq!(link.invoice_url, "https://pay.test/i/981");
    }

    #[tokio::test]
    async fn incomplete_customer_is_rejected_before_sending() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut req = request();
        req.customer.email = String::new();
        let err = client(&server).create_invoice(&req).await.unwrap_err();
        assert_matches!(err, GatewayError::Validation(msg) if msg.contains("email"));
    }

    #[tokio::test]
    async fn mismatched_amount_is_rejected_before_sending() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut req = request();
        req.amount = dec!(100.00);
        let err = client(&server).create_invoice(&req).await.unwrap_err();
        assert_matches!(err, GatewayError::Validation(_));

        let mut req = request();
        req.redirect_urls.pending_url = " ".into();
        let err = client(&server).create_invoice(&req).await.unwrap_err();
        assert_matches!(err, GatewayError::Validation(msg) if msg.contains("pendingUrl"));
    }

    #[tokio::test]
    async fn http_statuses_map_to_error_taxonomy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/invoices/1"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "bad key"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/invoices/2"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"message": "invoice_key invalid"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/invoices/3"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/invoices/4"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/invoices/5"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let c = client(&server);
        assert_matches!(
            c.check_invoice_status("1", "k").await,
            Err(GatewayError::Auth(msg)) if msg == "bad key"
        );
        assert_matches!(
            c.check_invoice_status("2", "k").await,
            Err(GatewayError::Validation(msg)) if msg == "invoice_key invalid"
        );
        assert_matches!(
            c.check_invoice_status("3", "k").await,
            Err(GatewayError::NotFound(_))
        );
        assert_matches!(
            c.check_invoice_status("4", "k").await,
            Err(GatewayError::Protocol(_))
        );
        assert_matches!(
            c.check_invoice_status("5", "k").await,
            Err(GatewayError::Protocol(_))
        );
    }

    #[tokio::test]
    async fn check_status_sends_pair_and_reads_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/invoices/981"))
            .and(query_param("invoice_key", "key-981"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {
                    "invoiceKey": "key-981",
                    "invoiceStatus": "paid",
                    "paymentMethod": "card",
                    "total": 114.0,
                    "referenceNumber": "REF-77",
                    "updatedAt": "2026-10-19T10:00:00Z"
                }
            })))
            .mount(&server)
            .await;

        let status = client(&server)
            .check_invoice_status("981", "key-981")
            .await
            .unwrap();
        assert_eq!(status.invoice_status, "paid");
        assert_eq!(status.payment_method.as_deref(), Some("card"));
        assert_eq!(status.amount, Some(dec!(114)));
        assert_eq!(status.reference_number.as_deref(), Some("REF-77"));
    }

    #[tokio::test]
    async fn check_status_rejects_foreign_invoice_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/invoices/981"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"invoiceKey": "other", "invoiceStatus": "paid"}
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .check_invoice_status("981", "key-981")
            .await
            .unwrap_err();
        assert_matches!(err, GatewayError::Validation(_));
    }

    #[tokio::test]
    async fn error_envelope_is_a_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/invoices/981"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "error",
                "message": "cannot delete"
            })))
            .mount(&server)
            .await;

        let err = client(&server).delete_invoice("981", "key-981").await.unwrap_err();
        assert_matches!(err, GatewayError::Protocol(msg) if msg.contains("cannot delete"));
    }

    #[tokio::test]
    async fn delete_accepts_success_without_data() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/invoices/981"))
            .and(query_param("invoice_key", "key-981"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).delete_invoice("981", "key-981").await.unwrap();
    }

    #[tokio::test]
    async fn missing_pair_half_is_rejected_locally() {
        let server = MockServer::start().await;
        let c = client(&server);
        assert_matches!(
            c.check_invoice_status("981", "").await,
            Err(GatewayError::Validation(_))
        );
        assert_matches!(c.delete_invoice("", "key").await, Err(GatewayError::Validation(_)));
    }

    #[tokio::test]
    async fn slow_gateway_surfaces_as_timed_out_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "success", "data": {"invoiceStatus": "paid"}}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .check_invoice_status("981", "key-981")
            .await
            .unwrap_err();
        assert_matches!(err, GatewayError::Transport { timed_out: true, .. });
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn unreachable_gateway_is_a_transport_error() {
        let c = GatewayClient::new("http://127.0.0.1:9", "k", Duration::from_millis(500)).unwrap();
        let err = c.check_invoice_status("1", "k").await.unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn base_url_with_path_keeps_prefix() {
        let c = GatewayClient::new("https://gw.test/api/v2", "k", Duration::from_secs(1)).unwrap();
        assert_eq!(
            c.invoice_url(Some("9"), Some("a b")).as_str(),
            "https://gw.test/api/v2/invoices/9?invoice_key=a+b"
        );
        assert_eq!(c.invoice_url(None, None).as_str(), "https://gw.test/api/v2/invoices");
    }
}

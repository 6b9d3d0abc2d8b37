//! Order/invoice reconciliation.
//!
//! Every payment-status change funnels through [`PaymentService::apply_gateway_status`],
//! which writes with a compare-and-swap on the status it read and the invoice
//! the signal was checked against. Polls and webhooks racing on the same order
//! therefore apply a transition once, and a signal for a replaced invoice never
//! lands.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::{Expr, SimpleExpr},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use strum::{AsRefStr, IntoStaticStr};
use tracing::{error, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    config::CheckoutConfig,
    db::DbPool,
    entities::{
        order::{self, Entity as Order, FulfillmentStatus, PaymentMethod, PaymentStatus},
        payment_event,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        contact::{CustomerSnapshot, PhoneNormalizer},
        identity::IdentityService,
        invoice_gateway::{CreateInvoiceRequest, GatewayError, InvoiceGateway, RedirectUrls},
        orders::{load_items, load_owned_order},
        payment_status::map_gateway_status,
        pricing::{compute_amount, to_minor, with_shipping},
        webhook_signature::WebhookVerifier,
    },
};

const MAX_CAS_ATTEMPTS: usize = 3;

/// What triggered a payment-state write; recorded on the audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum TransitionSource {
    CreateInvoice,
    Poll,
    Webhook,
    DeleteInvoice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceOutcome {
    pub order_id: String,
    pub invoice_id: String,
    pub invoice_ref: String,
    pub invoice_url: String,
    /// True when an existing pending invoice was returned instead of a new one.
    pub reused: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusOutcome {
    pub order_id: String,
    pub payment_status: PaymentStatus,
    pub gateway_status: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_reference: Option<String>,
    pub changed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookOutcome {
    pub applied: bool,
    pub payment_status: PaymentStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub order_id: String,
    pub deleted: bool,
}

/// Body the gateway posts to the webhook endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    #[serde(alias = "invoice_id", deserialize_with = "string_or_number")]
    pub invoice_id: String,
    #[serde(alias = "invoice_ref", alias = "invoiceKey", alias = "invoice_key")]
    pub invoice_ref: String,
    #[serde(alias = "invoice_status", alias = "invoiceStatus")]
    pub status: String,
    #[serde(alias = "order_id")]
    pub order_id: String,
    #[serde(default, alias = "reference_number")]
    pub reference_number: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

/// Result of one reconciliation attempt.
#[derive(Debug, Clone)]
pub struct Transition {
    pub changed: bool,
    pub order: order::Model,
}

#[derive(Clone)]
pub struct PaymentService {
    db_pool: Arc<DbPool>,
    gateway: Arc<dyn InvoiceGateway>,
    identity: IdentityService,
    verifier: WebhookVerifier,
    phones: PhoneNormalizer,
    event_sender: Arc<EventSender>,
    checkout: CheckoutConfig,
}

impl PaymentService {
    pub fn new(
        db_pool: Arc<DbPool>,
        gateway: Arc<dyn InvoiceGateway>,
        identity: IdentityService,
        verifier: WebhookVerifier,
        phones: PhoneNormalizer,
        event_sender: Arc<EventSender>,
        checkout: CheckoutConfig,
    ) -> Self {
        Self {
            db_pool,
            gateway,
            identity,
            verifier,
            phones,
            event_sender,
            checkout,
        }
    }

    /// Idempotent invoice creation for an order the caller owns.
    #[instrument(skip(self), fields(user_id = %user.user_id))]
    pub async fn create_invoice(
        &self,
        user: &AuthUser,
        order_id: &str,
    ) -> Result<InvoiceOutcome, ServiceError> {
        let order = load_owned_order(&*self.db_pool, user, order_id).await?;
        self.create_invoice_for_order(&order).await
    }

    /// Returns the order's live invoice, or creates one.
    ///
    /// An existing invoice is queried first: pending is reused, paid is
    /// reconciled and rejected, expired/cancelled or missing is replaced.
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn create_invoice_for_order(
        &self,
        order: &order::Model,
    ) -> Result<InvoiceOutcome, ServiceError> {
        ensure_invoiceable(order)?;

        if let Some((invoice_id, invoice_ref)) = order.invoice_pair() {
            match self
                .gateway
                .check_invoice_status(invoice_id, invoice_ref)
                .await
            {
                Ok(report) => match map_gateway_status(&report.invoice_status) {
                    PaymentStatus::Pending => {
                        if let Some(url) = order.invoice_url.clone() {
                            info!(invoice_id, "Reusing pending invoice");
                            return Ok(InvoiceOutcome {
                                order_id: order.id.clone(),
                                invoice_id: invoice_id.to_string(),
                                invoice_ref: invoice_ref.to_string(),
                                invoice_url: url,
                                reused: true,
                            });
                        }
                        warn!(invoice_id, "Pending invoice has no stored url; replacing it");
                    }
                    PaymentStatus::Paid => {
                        self.apply_gateway_status(
                            order,
                            &report.invoice_status,
                            report.reference_number,
                            TransitionSource::CreateInvoice,
                        )
                        .await?;
                        return Err(ServiceError::Conflict(format!(
                            "order {} has already been paid",
                            order.id
                        )));
                    }
                    PaymentStatus::Failed => {
                        info!(invoice_id, gateway_status = %report.invoice_status, "Previous invoice is dead; creating a replacement");
                    }
                },
                Err(GatewayError::NotFound(_)) => {
                    warn!(invoice_id, "Previous invoice no longer exists at the gateway; creating a replacement");
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.create_remote_invoice(order).await
    }

    async fn create_remote_invoice(
        &self,
        order: &order::Model,
    ) -> Result<InvoiceOutcome, ServiceError> {
        let profile = self.identity.get_user(&order.user_id).await?;
        let customer = CustomerSnapshot::assemble(order, profile.as_ref(), &self.phones)?;

        let items = load_items(&*self.db_pool, &order.id).await?;
        let lines = with_shipping(
            items.iter().map(|i| i.to_invoice_item()).collect(),
            order.shipping(),
        );
        let pricing = order.pricing_options();
        let amount = compute_amount(&lines, pricing.tax.as_ref(), pricing.discount.as_ref())?;
        if to_minor(amount) != order.total_minor {
            error!(order_id = %order.id, computed = %amount, stored = %order.total(), "Invoice amount differs from order total");
            return Err(ServiceError::InternalError(format!(
                "order {} total does not match its lines",
                order.id
            )));
        }

        if order.invoice_outcome_unknown {
            info!(order_id = %order.id, attempt = order.invoice_attempts, "Retrying invoice creation with the previous idempotency key");
        }

        let request = CreateInvoiceRequest {
            order_id: order.id.clone(),
            amount,
            currency: order.currency.clone(),
            due_date: (Utc::now()
                + ChronoDuration::days(i64::from(self.checkout.invoice_due_days)))
            .date_naive(),
            customer,
            redirect_urls: self.redirect_urls(&order.id)?,
            items: lines,
            tax: pricing.tax,
            discount: pricing.discount,
            idempotency_key: Some(format!("{}-{}", order.id, order.invoice_attempts)),
        };

        let link = match self.gateway.create_invoice(&request).await {
            Ok(link) => link,
            Err(e) => {
                let unknown = e.is_transport();
                let mut update = Order::update_many()
                    .col_expr(order::Column::InvoiceOutcomeUnknown, Expr::value(unknown))
                    .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(order::Column::Id.eq(order.id.as_str()));
                if !unknown {
                    update = update.col_expr(
                        order::Column::InvoiceAttempts,
                        Expr::col(order::Column::InvoiceAttempts).add(1),
                    );
                }
                update.exec(&*self.db_pool).await?;
                warn!(order_id = %order.id, error = %e, outcome_unknown = unknown, "Invoice creation failed");
                return Err(e.into());
            }
        };

        let from = order.payment_status();
        let txn = self.db_pool.begin().await?;
        let result = Order::update_many()
            .col_expr(order::Column::InvoiceId, Expr::value(Some(link.invoice_id.clone())))
            .col_expr(order::Column::InvoiceRef, Expr::value(Some(link.invoice_ref.clone())))
            .col_expr(order::Column::InvoiceUrl, Expr::value(Some(link.invoice_url.clone())))
            .col_expr(order::Column::GatewayStatus, Expr::value(Some("pending".to_string())))
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Pending.to_string()),
            )
            .col_expr(order::Column::InvoiceOutcomeUnknown, Expr::value(false))
            .col_expr(
                order::Column::InvoiceAttempts,
                Expr::col(order::Column::InvoiceAttempts).add(1),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(order::Column::Version, Expr::col(order::Column::Version).add(1))
            .filter(order::Column::Id.eq(order.id.as_str()))
            .filter(order::Column::Version.eq(order.version))
            .exec(&txn)
            .await?;

        if result.rows_affected != 1 {
            warn!(order_id = %order.id, invoice_id = %link.invoice_id, "Order changed while creating invoice; remote invoice left unlinked");
            return Err(ServiceError::Conflict(format!(
                "order {} changed while creating invoice",
                order.id
            )));
        }

        if order.invoice_pair().is_some() || from != PaymentStatus::Pending {
            record_event(
                &txn,
                &order.id,
                TransitionSource::CreateInvoice,
                from,
                PaymentStatus::Pending,
                Some("pending"),
                Some(&link.invoice_id),
            )
            .await?;
        }
        txn.commit().await?;

        info!(order_id = %order.id, invoice_id = %link.invoice_id, "Invoice created");
        Ok(InvoiceOutcome {
            order_id: order.id.clone(),
            invoice_id: link.invoice_id,
            invoice_ref: link.invoice_ref,
            invoice_url: link.invoice_url,
            reused: false,
        })
    }

    /// Polls the gateway and reconciles the order.
    #[instrument(skip(self), fields(user_id = %user.user_id))]
    pub async fn check_status(
        &self,
        user: &AuthUser,
        order_id: &str,
    ) -> Result<StatusOutcome, ServiceError> {
        let order = load_owned_order(&*self.db_pool, user, order_id).await?;
        let (invoice_id, invoice_ref) = order.invoice_pair().ok_or_else(|| {
            ServiceError::NotFound(format!("order {} has no invoice", order_id))
        })?;

        let report = self
            .gateway
            .check_invoice_status(invoice_id, invoice_ref)
            .await?;
        let transition = self
            .apply_gateway_status(
                &order,
                &report.invoice_status,
                report.reference_number,
                TransitionSource::Poll,
            )
            .await?;

        let order = transition.order;
        Ok(StatusOutcome {
            payment_status: order.payment_status(),
            order_id: order.id,
            gateway_status: order.gateway_status,
            paid_at: order.paid_at,
            payment_reference: order.payment_reference,
            changed: transition.changed,
        })
    }

    /// Authenticates and applies a gateway webhook.
    #[instrument(skip(self, body, signature), fields(bytes = body.len()))]
    pub async fn handle_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, ServiceError> {
        if !self.verifier.is_enforcing() {
            warn!("Webhook secret not configured; accepting webhook without signature check");
        }
        if !self.verifier.verify(body, signature) {
            counter!("storefront_payments.webhooks", 1, "outcome" => "bad_signature");
            warn!(signature_present = signature.is_some(), "Webhook signature verification failed");
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ));
        }

        let payload: WebhookPayload = serde_json::from_slice(body).map_err(|e| {
            counter!("storefront_payments.webhooks", 1, "outcome" => "malformed");
            ServiceError::ValidationError(format!("malformed webhook payload: {}", e))
        })?;
        if payload.order_id.trim().is_empty()
            || payload.invoice_id.trim().is_empty()
            || payload.invoice_ref.trim().is_empty()
        {
            return Err(ServiceError::ValidationError(
                "webhook payload requires orderId, invoiceId and invoiceRef".to_string(),
            ));
        }

        let order = Order::find_by_id(payload.order_id.clone())
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", payload.order_id))
            })?;

        let matches = order.invoice_pair().map_or(false, |(id, reference)| {
            id == payload.invoice_id && reference == payload.invoice_ref
        });
        if !matches {
            counter!("storefront_payments.webhooks", 1, "outcome" => "pair_mismatch");
            warn!(
                order_id = %order.id,
                invoice_id = %payload.invoice_id,
                "Webhook invoice identifiers do not match the order"
            );
            return Err(ServiceError::Conflict(
                "invoice identifiers do not match the order".to_string(),
            ));
        }

        let transition = self
            .apply_gateway_status(
                &order,
                &payload.status,
                payload.reference_number,
                TransitionSource::Webhook,
            )
            .await?;
        counter!("storefront_payments.webhooks", 1, "outcome" => "accepted");

        Ok(WebhookOutcome {
            applied: transition.changed,
            payment_status: transition.order.payment_status(),
        })
    }

    /// Deletes the order's remote invoice and clears the linkage.
    #[instrument(skip(self), fields(user_id = %user.user_id))]
    pub async fn delete_invoice(
        &self,
        user: &AuthUser,
        order_id: &str,
    ) -> Result<DeleteOutcome, ServiceError> {
        let order = load_owned_order(&*self.db_pool, user, order_id).await?;
        let from = order.payment_status();
        if from == PaymentStatus::Paid {
            return Err(ServiceError::InvalidOperation(format!(
                "invoice of paid order {} cannot be deleted",
                order_id
            )));
        }
        let (invoice_id, invoice_ref) = order.invoice_pair().ok_or_else(|| {
            ServiceError::NotFound(format!("order {} has no invoice", order_id))
        })?;

        match self.gateway.delete_invoice(invoice_id, invoice_ref).await {
            Ok(()) => {}
            Err(GatewayError::NotFound(_)) => {
                warn!(invoice_id, "Invoice already gone at the gateway; clearing linkage");
            }
            Err(e) => return Err(e.into()),
        }

        let txn = self.db_pool.begin().await?;
        let result = Order::update_many()
            .col_expr(order::Column::InvoiceId, Expr::value(Option::<String>::None))
            .col_expr(order::Column::InvoiceRef, Expr::value(Option::<String>::None))
            .col_expr(order::Column::InvoiceUrl, Expr::value(Option::<String>::None))
            .col_expr(order::Column::GatewayStatus, Expr::value(Option::<String>::None))
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Pending.to_string()),
            )
            .col_expr(order::Column::InvoiceOutcomeUnknown, Expr::value(false))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(order::Column::Version, Expr::col(order::Column::Version).add(1))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.eq(from.to_string()))
            .filter(order::Column::InvoiceId.eq(invoice_id))
            .exec(&txn)
            .await?;
        if result.rows_affected != 1 {
            return Err(ServiceError::Conflict(format!(
                "order {} changed while deleting its invoice",
                order_id
            )));
        }

        record_event(
            &txn,
            order_id,
            TransitionSource::DeleteInvoice,
            from,
            PaymentStatus::Pending,
            None,
            Some(invoice_id),
        )
        .await?;
        txn.commit().await?;

        info!(order_id, invoice_id, "Invoice deleted");
        Ok(DeleteOutcome {
            order_id: order_id.to_string(),
            deleted: true,
        })
    }

    /// Maps `gateway_status` and applies it to the order at most once.
    ///
    /// The write is conditioned on the payment status that was read. Entering
    /// `paid` stamps the payment time and reference and confirms a pending
    /// order in the same transaction.
    #[instrument(skip(self, order, reference), fields(order_id = %order.id, source = source.as_ref()))]
    pub async fn apply_gateway_status(
        &self,
        order: &order::Model,
        gateway_status: &str,
        reference: Option<String>,
        source: TransitionSource,
    ) -> Result<Transition, ServiceError> {
        let source_label: &'static str = source.into();
        let target = map_gateway_status(gateway_status);
        let mut current = order.clone();

        for _ in 0..MAX_CAS_ATTEMPTS {
            if current.invoice_id != order.invoice_id || current.invoice_ref != order.invoice_ref {
                counter!("storefront_payments.transitions", 1, "source" => source_label, "outcome" => "stale_invoice");
                warn!(
                    checked_invoice = ?order.invoice_id,
                    linked_invoice = ?current.invoice_id,
                    "Invoice was replaced before the status could be applied"
                );
                return Err(ServiceError::Conflict(format!(
                    "invoice of order {} changed before the status could be applied",
                    order.id
                )));
            }


            let from = current.payment_status();
            if from == target || !from.can_transition_to(target) {
                if from != target {
                    info!(from = %from, to = %target, "Ignoring status that would leave a terminal state");
                }
                counter!("storefront_payments.transitions", 1, "source" => source_label, "outcome" => "noop");
                return Ok(Transition {
                    changed: false,
                    order: current,
                });
            }

            let now = Utc::now();
            let txn = self.db_pool.begin().await?;
            let mut update = Order::update_many()
                .col_expr(order::Column::PaymentStatus, Expr::value(target.to_string()))
                .col_expr(
                    order::Column::GatewayStatus,
                    Expr::value(Some(gateway_status.trim().to_ascii_lowercase())),
                )
                .col_expr(order::Column::UpdatedAt, Expr::value(now))
                .col_expr(order::Column::Version, Expr::col(order::Column::Version).add(1))
                .filter(order::Column::Id.eq(current.id.as_str()))
                .filter(order::Column::PaymentStatus.eq(from.to_string()))
                .filter(linked_to(order::Column::InvoiceId, current.invoice_id.as_deref()))
                .filter(linked_to(order::Column::InvoiceRef, current.invoice_ref.as_deref()));
            if target == PaymentStatus::Paid {
                let reference = reference
                    .clone()
                    .filter(|r| !r.trim().is_empty())
                    .or_else(|| current.invoice_id.clone());
                update = update
                    .col_expr(order::Column::PaidAt, Expr::value(Some(now)))
                    .col_expr(order::Column::PaymentReference, Expr::value(reference));
            }

            let result = update.exec(&txn).await?;
            if result.rows_affected != 1 {
                txn.rollback().await?;
                info!(from = %from, "Order changed concurrently; re-reading");
                current = Order::find_by_id(current.id.clone())
                    .one(&*self.db_pool)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Order {} not found", order.id))
                    })?;
                continue;
            }

            if target == PaymentStatus::Paid {
                Order::update_many()
                    .col_expr(
                        order::Column::Status,
                        Expr::value(FulfillmentStatus::Confirmed.to_string()),
                    )
                    .filter(order::Column::Id.eq(current.id.as_str()))
                    .filter(order::Column::Status.eq(FulfillmentStatus::Pending.to_string()))
                    .exec(&txn)
                    .await?;
            }

            record_event(
                &txn,
                &current.id,
                source,
                from,
                target,
                Some(gateway_status),
                current.invoice_id.as_deref(),
            )
            .await?;
            txn.commit().await?;

            counter!("storefront_payments.transitions", 1, "source" => source_label, "outcome" => "applied");
            info!(from = %from, to = %target, "Payment status updated");
            if target == PaymentStatus::Paid
                && current.fulfillment_status() == FulfillmentStatus::Cancelled
            {
                warn!("Payment received for a cancelled order; refund must be handled outside this service");
            }

            if let Err(e) = self
                .event_sender
                .send(Event::PaymentStatusChanged {
                    order_id: current.id.clone(),
                    from,
                    to: target,
                })
                .await
            {
                warn!(error = %e, "Failed to publish payment status change");
            }

            let updated = Order::find_by_id(current.id.clone())
                .one(&*self.db_pool)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order.id)))?;
            return Ok(Transition {
                changed: true,
                order: updated,
            });
        }

        Err(ServiceError::Conflict(format!(
            "order {} is being updated concurrently",
            order.id
        )))
    }

    fn redirect_urls(&self, order_id: &str) -> Result<RedirectUrls, ServiceError> {
        let base = Url::parse(&self.checkout.storefront_url).map_err(|e| {
            ServiceError::InternalError(format!("invalid storefront url: {}", e))
        })?;
        let build = |outcome: &str| {
            let mut url = base.clone();
            if let Ok(mut segments) = url.path_segments_mut() {
                segments.pop_if_empty().extend(["payment", outcome]);
            }
            url.query_pairs_mut().append_pair("orderId", order_id);
            url.to_string()
        };
        Ok(RedirectUrls {
            success_url: build("success"),
            fail_url: build("fail"),
            pending_url: build("pending"),
        })
    }
}

fn linked_to(column: order::Column, value: Option<&str>) -> SimpleExpr {
    match value {
        Some(v) => column.eq(v),
        None => column.is_null(),
    }
}

fn ensure_invoiceable(order: &order::Model) -> Result<(), ServiceError> {
    if order.fulfillment_status() == FulfillmentStatus::Cancelled {
        return Err(ServiceError::InvalidOperation(format!(
            "order {} is cancelled",
            order.id
        )));
    }
    if order.payment_method() != Some(PaymentMethod::Gateway) {
        return Err(ServiceError::InvalidOperation(format!(
            "order {} is not paid through the invoice gateway",
            order.id
        )));
    }
    if order.payment_status() == PaymentStatus::Paid {
        return Err(ServiceError::Conflict(format!(
            "order {} has already been paid",
            order.id
        )));
    }
    Ok(())
}

async fn record_event<C: ConnectionTrait>(
    conn: &C,
    order_id: &str,
    source: TransitionSource,
    from: PaymentStatus,
    to: PaymentStatus,
    gateway_status: Option<&str>,
    invoice_id: Option<&str>,
) -> Result<(), ServiceError> {
    payment_event::ActiveModel {
        id: Set(Uuid::new_v4().to_string()),
        order_id: Set(order_id.to_string()),
        source: Set(source.as_ref().to_string()),
        from_status: Set(from.to_string()),
        to_status: Set(to.to_string()),
        gateway_status: Set(gateway_status.map(str::to_string)),
        invoice_id: Set(invoice_id.map(str::to_string)),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?;
    Ok(())
}

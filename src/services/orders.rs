use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::AuthUser,
    config::CheckoutConfig,
    db::DbPool,
    entities::{
        order::{self, Entity as Order, FulfillmentStatus, PaymentMethod, PaymentStatus},
        order_item::{self, Entity as OrderItem},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        catalog::CatalogService,
        payments::{InvoiceOutcome, PaymentService},
        pricing::{
            compute_breakdown, round_money, to_minor, with_shipping, InvoiceItem,
            PricingOptions,
        },
    },
};

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    #[validate(length(min = 1, message = "productId is required"))]
    pub product_id: String,
    #[validate(range(min = 1, max = 1000, message = "quantity must be between 1 and 1000"))]
    pub quantity: u32,
}

/// Shipping contact captured at checkout; blanks fall back to the profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ShippingDetails {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub phone: Option<String>,
    #[validate(length(max = 500))]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[validate(length(min = 1, message = "cart must contain at least one item"))]
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub shipping: Option<ShippingDetails>,
}

impl CheckoutRequest {
    fn validate_all(&self) -> Result<(), ServiceError> {
        self.validate()?;
        for item in &self.items {
            item.validate()?;
        }
        if let Some(shipping) = &self.shipping {
            shipping.validate()?;
        }
        Ok(())
    }

    /// Cart lines with repeated products merged, in first-seen order.
    fn merged_lines(&self) -> Vec<(String, u32)> {
        let mut lines: Vec<(String, u32)> = Vec::with_capacity(self.items.len());
        for item in &self.items {
            match lines.iter_mut().find(|(id, _)| *id == item.product_id) {
                Some((_, qty)) => *qty = qty.saturating_add(item.quantity),
                None => lines.push((item.product_id.clone(), item.quantity)),
            }
        }
        lines
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemResponse {
    pub product_id: String,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: String,
    pub user_id: String,
    pub status: String,
    pub payment_status: String,
    pub payment_method: String,
    pub currency: String,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub items: Vec<OrderItemResponse>,
    pub invoice_id: Option<String>,
    pub invoice_url: Option<String>,
    pub gateway_status: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_reference: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderResponse {
    pub fn from_parts(order: order::Model, items: Vec<order_item::Model>) -> Self {
        let items = items
            .into_iter()
            .map(|item| OrderItemResponse {
                unit_price: item.unit_price(),
                line_total: round_money(item.unit_price() * Decimal::from(item.quantity)),
                product_id: item.product_id,
                name: item.name,
                quantity: item.quantity,
            })
            .collect();

        Self {
            subtotal: order.subtotal(),
            tax: order.tax(),
            shipping: order.shipping(),
            discount: order.discount(),
            total: order.total(),
            id: order.id,
            user_id: order.user_id,
            status: order.status,
            payment_status: order.payment_status,
            payment_method: order.payment_method,
            currency: order.currency,
            items,
            invoice_id: order.invoice_id,
            invoice_url: order.invoice_url,
            gateway_status: order.gateway_status,
            paid_at: order.paid_at,
            payment_reference: order.payment_reference,
            cancelled_at: order.cancelled_at,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResponse {
    pub order: OrderResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice: Option<InvoiceOutcome>,
}

/// Loads an order the caller is allowed to act on.
pub(crate) async fn load_owned_order<C: ConnectionTrait>(
    conn: &C,
    user: &AuthUser,
    order_id: &str,
) -> Result<order::Model, ServiceError> {
    let order = Order::find_by_id(order_id.to_string())
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

    if !user.can_access(&order.user_id) {
        warn!(order_id, user_id = %user.user_id, "caller does not own order");
        return Err(ServiceError::Forbidden(
            "order belongs to another customer".to_string(),
        ));
    }
    Ok(order)
}

pub(crate) async fn load_items<C: ConnectionTrait>(
    conn: &C,
    order_id: &str,
) -> Result<Vec<order_item::Model>, ServiceError> {
    Ok(OrderItem::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .order_by_asc(order_item::Column::Position)
        .all(conn)
        .await?)
}

/// Checkout, lookup and cancellation of orders.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    catalog: CatalogService,
    payments: Arc<PaymentService>,
    event_sender: Arc<EventSender>,
    checkout: CheckoutConfig,
    currency: String,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        catalog: CatalogService,
        payments: Arc<PaymentService>,
        event_sender: Arc<EventSender>,
        checkout: CheckoutConfig,
        currency: String,
    ) -> Self {
        Self {
            db_pool,
            catalog,
            payments,
            event_sender,
            checkout,
            currency,
        }
    }

    /// Creates an order from a cart.
    ///
    /// Stock is reserved all-or-nothing inside one transaction. For gateway
    /// orders an invoice is then attempted; its failure leaves the order in
    /// place without an invoice.
    #[instrument(skip(self, request), fields(user_id = %user.user_id))]
    pub async fn checkout(
        &self,
        user: &AuthUser,
        request: CheckoutRequest,
    ) -> Result<CheckoutResponse, ServiceError> {
        request.validate_all()?;
        let payment_method = request.payment_method.unwrap_or(PaymentMethod::Gateway);
        let lines = request.merged_lines();
        let order_id = Uuid::new_v4().to_string();

        let txn = self.db_pool.begin().await?;

        let ids: Vec<String> = lines.iter().map(|(id, _)| id.clone()).collect();
        let products: HashMap<String, _> = self
            .catalog
            .get_products(&txn, &ids)
            .await?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();

        let mut priced = Vec::with_capacity(lines.len());
        for (product_id, quantity) in &lines {
            let product = products
                .get(product_id)
                .filter(|p| p.is_active)
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "product {} is not available",
                        product_id
                    ))
                })?;
            let requested = i32::try_from(*quantity).unwrap_or(i32::MAX);
            if product.stock < requested {
                return Err(ServiceError::InsufficientStock(format!(
                    "insufficient stock for product {}: requested {}, available {}",
                    product_id, quantity, product.stock
                )));
            }
            priced.push((product, *quantity));
        }

        let goods: Vec<InvoiceItem> = priced
            .iter()
            .map(|(p, qty)| InvoiceItem::new(p.name.clone(), p.price(), *qty))
            .collect();
        let goods_subtotal: Decimal = goods.iter().map(InvoiceItem::line_total).sum();
        let shipping = round_money(self.checkout.shipping_fee);
        let pricing = PricingOptions {
            tax: self.checkout.tax_options(),
            discount: self.checkout.discount_options(),
        };
        let breakdown = compute_breakdown(
            &with_shipping(goods, shipping),
            pricing.tax.as_ref(),
            pricing.discount.as_ref(),
        )?;

        for (product, quantity) in &priced {
            let delta = i32::try_from(*quantity).unwrap_or(i32::MAX);
            self.catalog.adjust_stock(&txn, &product.id, -delta).await?;
        }

        let shipping_details = request.shipping.unwrap_or_default();
        let now = Utc::now();
        let order = order::ActiveModel {
            id: Set(order_id.clone()),
            user_id: Set(user.user_id.clone()),
            status: Set(FulfillmentStatus::Pending.to_string()),
            payment_status: Set(PaymentStatus::Pending.to_string()),
            payment_method: Set(payment_method.to_string()),
            currency: Set(self.currency.clone()),
            subtotal_minor: Set(to_minor(goods_subtotal)),
            tax_minor: Set(to_minor(breakdown.tax)),
            shipping_minor: Set(to_minor(shipping)),
            discount_minor: Set(to_minor(breakdown.discount)),
            total_minor: Set(to_minor(breakdown.amount)),
            pricing: Set(serde_json::to_value(&pricing)
                .map_err(|e| ServiceError::InternalError(e.to_string()))?),
            ship_first_name: Set(shipping_details.first_name),
            ship_last_name: Set(shipping_details.last_name),
            ship_email: Set(shipping_details.email),
            ship_phone: Set(shipping_details.phone),
            ship_address: Set(shipping_details.address),
            invoice_id: Set(None),
            invoice_ref: Set(None),
            invoice_url: Set(None),
            gateway_status: Set(None),
            invoice_attempts: Set(0),
            invoice_outcome_unknown: Set(false),
            paid_at: Set(None),
            payment_reference: Set(None),
            cancelled_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            version: Set(1),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(order_id = %order_id, error = %e, "Failed to insert order");
            ServiceError::DatabaseError(e)
        })?;

        for (position, (product, quantity)) in priced.iter().enumerate() {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4().to_string()),
                order_id: Set(order_id.clone()),
                product_id: Set(product.id.clone()),
                name: Set(product.name.clone()),
                unit_price_minor: Set(product.price_minor),
                quantity: Set(i32::try_from(*quantity).unwrap_or(i32::MAX)),
                position: Set(i32::try_from(position).unwrap_or(i32::MAX)),
            }
            .insert(&txn)
            .await?;
        }

        txn.commit().await?;
        info!(order_id = %order.id, total = %order.total(), "Order created");

        let email = order.ship_email.clone().or_else(|| user.email.clone());
        if let Err(e) = self
            .event_sender
            .send(Event::OrderCreated {
                order_id: order.id.clone(),
                email,
                total: order.total(),
            })
            .await
        {
            warn!(order_id = %order.id, error = %e, "Failed to publish order confirmation");
        }

        let invoice = if payment_method == PaymentMethod::Gateway {
            match self.payments.create_invoice_for_order(&order).await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    warn!(
                        order_id = %order.id,
                        error = %e,
                        retryable = e.is_retryable(),
                        "Invoice creation failed during checkout; order kept without invoice"
                    );
                    None
                }
            }
        } else {
            None
        };

        let order = Order::find_by_id(order_id.clone())
            .one(&*self.db_pool)
            .await?
            .unwrap_or(order);
        let items = load_items(&*self.db_pool, &order_id).await?;

        Ok(CheckoutResponse {
            order: OrderResponse::from_parts(order, items),
            invoice,
        })
    }

    #[instrument(skip(self), fields(user_id = %user.user_id))]
    pub async fn get_order(
        &self,
        user: &AuthUser,
        order_id: &str,
    ) -> Result<OrderResponse, ServiceError> {
        let order = load_owned_order(&*self.db_pool, user, order_id).await?;
        let items = load_items(&*self.db_pool, order_id).await?;
        Ok(OrderResponse::from_parts(order, items))
    }

    /// Cancels an order and returns its items to stock. An unpaid invoice is
    /// voided at the gateway on a best-effort basis. Paid orders are cancelled
    /// too; no refund is triggered.
    #[instrument(skip(self), fields(user_id = %user.user_id))]
    pub async fn cancel_order(
        &self,
        user: &AuthUser,
        order_id: &str,
    ) -> Result<OrderResponse, ServiceError> {
        let order = load_owned_order(&*self.db_pool, user, order_id).await?;
        let current = order.fulfillment_status();
        match current {
            FulfillmentStatus::Cancelled => {
                return Err(ServiceError::InvalidOperation(format!(
                    "order {} is already cancelled",
                    order_id
                )))
            }
            FulfillmentStatus::Shipped | FulfillmentStatus::Delivered => {
                return Err(ServiceError::InvalidOperation(format!(
                    "order {} has already been {}",
                    order_id, current
                )))
            }
            FulfillmentStatus::Pending | FulfillmentStatus::Confirmed => {}
        }

        let txn = self.db_pool.begin().await?;
        let now = Utc::now();
        let result = Order::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(FulfillmentStatus::Cancelled.to_string()),
            )
            .col_expr(order::Column::CancelledAt, Expr::value(Some(now)))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .col_expr(order::Column::Version, Expr::col(order::Column::Version).add(1))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(current.to_string()))
            .exec(&txn)
            .await?;
        if result.rows_affected != 1 {
            return Err(ServiceError::Conflict(format!(
                "order {} changed while cancelling",
                order_id
            )));
        }

        let items = load_items(&txn, order_id).await?;
        for item in &items {
            match self
                .catalog
                .adjust_stock(&txn, &item.product_id, item.quantity)
                .await
            {
                Ok(()) => {}
                Err(ServiceError::NotFound(_)) => {
                    warn!(order_id, product_id = %item.product_id, "product gone; stock not restored");
                }
                Err(e) => return Err(e),
            }
        }
        txn.commit().await?;

        if order.payment_status() == PaymentStatus::Paid {
            warn!(order_id, "Paid order cancelled; refund must be handled outside this service");
        } else if order.invoice_pair().is_some() {
            match self.payments.delete_invoice(user, order_id).await {
                Ok(_) => info!(order_id, "Invoice voided with the order"),
                Err(e) => {
                    warn!(order_id, error = %e, "Could not void invoice of cancelled order")
                }
            }
        }
        info!(order_id, "Order cancelled");

        if let Err(e) = self
            .event_sender
            .send(Event::OrderCancelled {
                order_id: order_id.to_string(),
            })
            .await
        {
            warn!(order_id, error = %e, "Failed to publish order cancellation");
        }

        let order = Order::find_by_id(order_id.to_string())
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        Ok(OrderResponse::from_parts(order, items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cart(items: &[(&str, u32)]) -> CheckoutRequest {
        CheckoutRequest {
            items: items
                .iter()
                .map(|(id, qty)| CartItem {
                    product_id: id.to_string(),
                    quantity: *qty,
                })
                .collect(),
            payment_method: None,
            shipping: None,
        }
    }

    #[test]
    fn repeated_products_are_merged_in_order() {
        let request = cart(&[("b", 1), ("a", 2), ("b", 3)]);
        assert_eq!(
            request.merged_lines(),
            vec![("b".to_string(), 4), ("a".to_string(), 2)]
        );
    }

    #[test]
    fn empty_cart_and_zero_quantity_are_invalid() {
        assert!(cart(&[]).validate_all().is_err());
        assert!(cart(&[("a", 0)]).validate_all().is_err());
        assert!(cart(&[("a", 1)]).validate_all().is_ok());
    }

    #[test]
    fn malformed_shipping_email_is_invalid() {
        let mut request = cart(&[("a", 1)]);
        request.shipping = Some(ShippingDetails {
            email: Some("not-an-email".into()),
            ..Default::default()
        });
        assert!(request.validate_all().is_err());
    }

    #[test]
    fn checkout_request_parses_camel_case() {
        let request: CheckoutRequest = serde_json::from_value(serde_json::json!({
            "items": [{"productId": "p1", "quantity": 2}],
            "paymentMethod": "cash_on_delivery"
        }))
        .unwrap();
        assert_eq!(request.payment_method, Some(PaymentMethod::CashOnDelivery));
        assert_eq!(request.items[0].quantity, 2);
    }
}

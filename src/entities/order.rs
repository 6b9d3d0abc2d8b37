use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::services::pricing::{from_minor, PricingOptions};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub user_id: String,
    /// Fulfillment axis, see [`FulfillmentStatus`].
    pub status: String,
    /// Payment axis, see [`PaymentStatus`].
    pub payment_status: String,
    pub payment_method: String,
    pub currency: String,

    pub subtotal_minor: i64,
    pub tax_minor: i64,
    pub shipping_minor: i64,
    pub discount_minor: i64,
    pub total_minor: i64,
    pub pricing: Json,

    pub ship_first_name: Option<String>,
    pub ship_last_name: Option<String>,
    pub ship_email: Option<String>,
    pub ship_phone: Option<String>,
    pub ship_address: Option<String>,

    // Gateway linkage. `invoice_id` and `invoice_ref` are written together.
    pub invoice_id: Option<String>,
    pub invoice_ref: Option<String>,
    pub invoice_url: Option<String>,
    pub gateway_status: Option<String>,
    pub invoice_attempts: i32,
    pub invoice_outcome_unknown: bool,

    pub paid_at: Option<DateTime<Utc>>,
    pub payment_reference: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
    #[sea_orm(has_many = "super::payment_event::Entity")]
    PaymentEvent,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl Related<super::payment_event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaymentEvent.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        if !insert {
            active_model.updated_at = Set(Utc::now());
        }
        Ok(active_model)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    /// Whether reconciliation may move an order from `self` to `next`.
    /// `Paid` is terminal; a failed invoice can still be settled late.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        match (self, next) {
            (a, b) if a == b => false,
            (PaymentStatus::Paid, _) => false,
            (PaymentStatus::Pending, _) => true,
            (PaymentStatus::Failed, PaymentStatus::Paid) => true,
            (PaymentStatus::Failed, _) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStatus {
    Pending,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Gateway,
    CashOnDelivery,
}

impl Model {
    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
            .parse()
            .unwrap_or(PaymentStatus::Pending)
    }

    pub fn fulfillment_status(&self) -> FulfillmentStatus {
        self.status.parse().unwrap_or(FulfillmentStatus::Pending)
    }

    pub fn payment_method(&self) -> Option<PaymentMethod> {
        self.payment_method.parse().ok()
    }

    /// The stored `(invoice_id, invoice_ref)` pair, if an invoice is linked.
    pub fn invoice_pair(&self) -> Option<(&str, &str)> {
        match (self.invoice_id.as_deref(), self.invoice_ref.as_deref()) {
            (Some(id), Some(reference)) => Some((id, reference)),
            _ => None,
        }
    }

    pub fn pricing_options(&self) -> PricingOptions {
        serde_json::from_value(self.pricing.clone()).unwrap_or_default()
    }

    pub fn subtotal(&self) -> Decimal {
        from_minor(self.subtotal_minor)
    }

    pub fn tax(&self) -> Decimal {
        from_minor(self.tax_minor)
    }

    pub fn shipping(&self) -> Decimal {
        from_minor(self.shipping_minor)
    }

    pub fn discount(&self) -> Decimal {
        from_minor(self.discount_minor)
    }

    pub fn total(&self) -> Decimal {
        from_minor(self.total_minor)
    }
}

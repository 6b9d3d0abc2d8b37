use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::services::pricing::{from_minor, InvoiceItem};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub name: String,
    pub unit_price_minor: i64,
    pub quantity: i32,
    /// Line order within the order.
    pub position: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn unit_price(&self) -> Decimal {
        from_minor(self.unit_price_minor)
    }

    pub fn to_invoice_item(&self) -> InvoiceItem {
        InvoiceItem::new(
            self.name.clone(),
            self.unit_price(),
            u32::try_from(self.quantity).unwrap_or(0),
        )
    }
}

//! sea-orm entities backing orders, their lines, the payment audit trail,
//! and the catalog/profile tables read during checkout.

pub mod order;
pub mod order_item;
pub mod payment_event;
pub mod product;
pub mod user;

// Checkout and reconciliation
pub mod orders;
pub mod payment_status;
pub mod payments;
pub mod pricing;

// Invoice gateway integration
pub mod invoice_gateway;
pub mod webhook_signature;

// Catalog and customer data
pub mod catalog;
pub mod contact;
pub mod identity;

pub mod notifications;

use tracing::warn;

use crate::entities::order::PaymentStatus;

/// Maps a gateway invoice status onto the local payment axis.
///
/// Unrecognised values resolve to `Pending`; they never settle or fail an order.
pub fn map_gateway_status(gateway_status: &str) -> PaymentStatus {
    match gateway_status.trim().to_ascii_lowercase().as_str() {
        "paid" => PaymentStatus::Paid,
        "unpaid" | "pending" => PaymentStatus::Pending,
        "expired" | "cancelled" => PaymentStatus::Failed,
        other => {
            warn!(gateway_status = other, "unrecognised gateway status, treating as pending");
            PaymentStatus::Pending
        }
    }
}

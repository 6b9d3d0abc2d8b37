use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
};
use tracing::info;

use crate::{errors::ServiceError, services::payments::WebhookOutcome, AppState};

pub const SIGNATURE_HEADER: &str = "x-gateway-signature";
const LEGACY_SIGNATURE_HEADER: &str = "x-signature";

// POST /api/v1/payments/webhook
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookOutcome>), ServiceError> {
    let signature = signature_header(&headers);
    let outcome = state
        .payment_service
        .handle_webhook(&body, signature)
        .await?;
    info!(applied = outcome.applied, status = %outcome.payment_status, "Payment webhook processed");
    Ok((StatusCode::OK, Json(outcome)))
}

fn signature_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SIGNATURE_HEADER)
        .or_else(|| headers.get(LEGACY_SIGNATURE_HEADER))
        .and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn primary_header_wins_over_legacy() {
        let mut headers = HeaderMap::new();
        headers.insert(LEGACY_SIGNATURE_HEADER, HeaderValue::from_static("old"));
        assert_eq!(signature_header(&headers), Some("old"));
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_static("new"));
        assert_eq!(signature_header(&headers), Some("new"));
    }

    #[test]
    fn missing_header_yields_none() {
        assert_eq!(signature_header(&HeaderMap::new()), None);
    }
}

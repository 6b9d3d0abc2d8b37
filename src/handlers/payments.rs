use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Deserialize;
use validator::Validate;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::payments::{DeleteOutcome, InvoiceOutcome, StatusOutcome},
    ApiResponse, AppState,
};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvoiceRequest {
    #[validate(length(min = 1, message = "orderId is required"))]
    pub order_id: String,
}

/// Return the order's pending invoice or create one.
pub async fn create_invoice(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateInvoiceRequest>,
) -> Result<Json<ApiResponse<InvoiceOutcome>>, ServiceError> {
    request.validate()?;
    let outcome = state
        .payment_service
        .create_invoice(&auth_user, request.order_id.trim())
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

/// Poll the gateway and reconcile the order's payment status.
pub async fn payment_status(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<StatusOutcome>>, ServiceError> {
    let outcome = state
        .payment_service
        .check_status(&auth_user, &order_id)
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

pub async fn delete_invoice(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<DeleteOutcome>>, ServiceError> {
    let outcome = state
        .payment_service
        .delete_invoice(&auth_user, &order_id)
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

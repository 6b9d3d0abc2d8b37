use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::orders::{CheckoutRequest, CheckoutResponse, OrderResponse},
    ApiResponse, AppState,
};

/// Create an order from the caller's cart.
///
/// Gateway orders get an invoice attempt inline; if the gateway is down the
/// order is still created and `invoice` is omitted.
pub async fn create_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutResponse>>), ServiceError> {
    let created = state.order_service.checkout(&auth_user, request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.order_service.get_order(&auth_user, &order_id).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Cancel an order and return its items to stock.
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .order_service
        .cancel_order(&auth_user, &order_id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

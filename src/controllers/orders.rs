use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::error::BookingResult;
use crate::models::{HolderToken, Order, OrderDetails};
use crate::services::FinalizeOrder;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/{order_id}", get(get_order))
        .route("/orders/{order_id}/cancel", post(cancel_order))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate(range(min = 1))]
    pub event_id: i64,
    #[validate(length(min = 1, max = 100))]
    pub seat_ids: Vec<i64>,
    #[validate(length(min = 1, max = 255))]
    pub holder_token: String,
    #[validate(length(min = 1, max = 100))]
    pub buyer_name: String,
    pub user_id: Option<i64>,
}

// POST /api/orders
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> BookingResult<(StatusCode, Json<OrderDetails>)> {
    req.validate()?;
    let request = FinalizeOrder {
        event_id: req.event_id,
        seat_ids: req.seat_ids,
        holder: HolderToken::parse(req.holder_token)?,
        buyer_name: req.buyer_name,
        user_id: req.user_id,
    };

    let details = state.booking.finalize_order(request).await?;
    Ok((StatusCode::CREATED, Json(details)))
}

// GET /api/orders/{order_id}
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<i64>,
) -> BookingResult<Json<OrderDetails>> {
    Ok(Json(state.booking.order_details(order_id).await?))
}

// POST /api/orders/{order_id}/cancel
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<i64>,
) -> BookingResult<Json<Order>> {
    Ok(Json(state.booking.cancel_order(order_id).await?))
}

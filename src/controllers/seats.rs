use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use crate::error::BookingResult;
use crate::models::HolderToken;
use crate::services::{HeldSeat, SeatFailure};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/seats/hold", post(hold_seats))
        .route("/seats/release", post(release_seats))
}

#[derive(Debug, Deserialize, Validate)]
pub struct HoldRequest {
    #[validate(range(min = 1))]
    pub event_id: i64,
    #[validate(length(min = 1, max = 100))]
    pub seat_ids: Vec<i64>,
    /// Generated by the server when the client has none yet.
    #[validate(length(min = 1, max = 255))]
    pub holder_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HoldResponse {
    pub holder_token: HolderToken,
    pub held: Vec<HeldSeat>,
    pub failed: Vec<SeatFailure>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReleaseRequest {
    #[validate(length(min = 1, max = 100))]
    pub seat_ids: Vec<i64>,
    #[validate(length(min = 1, max = 255))]
    pub holder_token: String,
}

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub released: Vec<i64>,
    pub failed: Vec<SeatFailure>,
}

/// 200 when every seat succeeded, 207 when some were itemized as failures.
fn batch_status(failures: usize) -> StatusCode {
    if failures == 0 {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    }
}

// POST /api/seats/hold
pub async fn hold_seats(
    State(state): State<Arc<AppState>>,
    Json(req): Json<HoldRequest>,
) -> BookingResult<Response> {
    req.validate()?;
    let holder = match req.holder_token {
        Some(raw) => HolderToken::parse(raw)?,
        None => HolderToken::generate(),
    };

    let outcome = state
        .booking
        .hold_seats(req.event_id, &req.seat_ids, &holder)
        .await?;

    let status = batch_status(outcome.failed.len());
    let body = HoldResponse {
        holder_token: holder,
        held: outcome.held,
        failed: outcome.failed,
    };
    Ok((status, Json(body)).into_response())
}

// POST /api/seats/release
pub async fn release_seats(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReleaseRequest>,
) -> BookingResult<Response> {
    req.validate()?;
    let holder = HolderToken::parse(req.holder_token)?;

    let outcome = state.booking.release_seats(&req.seat_ids, &holder).await?;

    let status = batch_status(outcome.failed.len());
    let body = ReleaseResponse {
        released: outcome.released,
        failed: outcome.failed,
    };
    Ok((status, Json(body)).into_response())
}

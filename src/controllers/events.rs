use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::error::BookingResult;
use crate::models::{EventWithVenue, Seat, SeatStatus};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events", get(list_events))
        .route("/events/{event_id}/seats", get(list_event_seats))
}

/// Seat as shown to buyers; the holder token is not exposed.
#[derive(Debug, Serialize)]
pub struct SeatResponse {
    pub id: i64,
    pub row: String,
    pub column: String,
    pub label: String,
    pub status: SeatStatus,
    pub price: Option<i64>,
    pub hold_expires_at: Option<DateTime<Utc>>,
}

impl From<Seat> for SeatResponse {
    fn from(seat: Seat) -> Self {
        let status = seat.effective_status(Utc::now());
        Self {
            label: seat.label(),
            id: seat.id,
            row: seat.row,
            column: seat.column,
            status,
            price: seat.price,
            hold_expires_at: seat.hold_expires_at,
        }
    }
}

// GET /api/events
pub async fn list_events(
    State(state): State<Arc<AppState>>,
) -> BookingResult<Json<Vec<EventWithVenue>>> {
    let events = state.booking.active_events().await?;
    Ok(Json(events))
}

// GET /api/events/{event_id}/seats
pub async fn list_event_seats(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<i64>,
) -> BookingResult<Json<Vec<SeatResponse>>> {
    let seats = state.booking.event_seats(event_id).await?;
    Ok(Json(seats.into_iter().map(SeatResponse::from).collect()))
}

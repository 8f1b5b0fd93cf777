//! Ошибки ядра бронирования.
//!
//! Every failure the reservation engine and the order workflows can report is
//! a [`BookingError`]. Each variant belongs to exactly one [`ErrorKind`], which
//! decides whether the caller may retry and how the HTTP layer answers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::models::OrderStatus;

pub type BookingResult<T> = Result<T, BookingError>;

/// Coarse classification of a [`BookingError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Event, seat or order is absent. Terminal for that identifier.
    NotFound,
    /// Seat sold or held by someone else, order not cancellable, identifier collision.
    Conflict,
    /// Malformed batch, missing price, inactive event.
    Invalid,
    /// Store or lock service unavailable, transaction aborted by the store.
    Transient,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "NOT_FOUND"),
            Self::Conflict => write!(f, "CONFLICT"),
            Self::Invalid => write!(f, "INVALID"),
            Self::Transient => write!(f, "TRANSIENT"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("event {0} not found")]
    EventNotFound(i64),

    #[error("seat {seat_id} not found for event {event_id}")]
    SeatNotFound { event_id: i64, seat_id: i64 },

    #[error("order {0} not found")]
    OrderNotFound(i64),

    #[error("seat {0} is unavailable")]
    SeatUnavailable(i64),

    #[error("seat {0} is locked by another holder")]
    SeatLocked(i64),

    #[error("seat {0} is already sold")]
    SeatAlreadySold(i64),

    #[error("seat {0} is locked by another holder during finalization")]
    SeatLockedByOther(i64),

    #[error("order {order_id} cannot be cancelled, current status: {status}")]
    OrderNotCancellable { order_id: i64, status: OrderStatus },

    #[error("could not generate a unique order number after {0} attempts")]
    OrderNumberExhausted(u32),

    #[error("event {0} is not active")]
    EventInactive(i64),

    #[error("seat {0} has no price defined")]
    SeatPriceMissing(i64),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Request body rejected by its field constraints.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("lock service error: {0}")]
    LockService(#[from] redis::RedisError),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl BookingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EventNotFound(_) | Self::SeatNotFound { .. } | Self::OrderNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::SeatUnavailable(_)
            | Self::SeatLocked(_)
            | Self::SeatAlreadySold(_)
            | Self::SeatLockedByOther(_)
            | Self::OrderNotCancellable { .. }
            | Self::OrderNumberExhausted(_) => ErrorKind::Conflict,
            Self::EventInactive(_) | Self::SeatPriceMissing(_)
            | Self::InvalidRequest(_)
            | Self::Validation(_) => {
                ErrorKind::Invalid
            }
            Self::Database(e) if is_unique_violation(e) => ErrorKind::Conflict,
            Self::Database(_) | Self::LockService(_) | Self::Unavailable(_) => ErrorKind::Transient,
        }
    }

    /// Transient errors left no mutation behind and may be retried as-is.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Seat the error is about, if any. Used to itemize batch failures.
    pub fn seat_id(&self) -> Option<i64> {
        match self {
            Self::SeatNotFound { seat_id, .. } => Some(*seat_id),
            Self::SeatUnavailable(id)
            | Self::SeatLocked(id)
            | Self::SeatAlreadySold(id)
            | Self::SeatLockedByOther(id)
            | Self::SeatPriceMissing(id) => Some(*id),
            _ => None,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EventNotFound(_) => "event_not_found",
            Self::SeatNotFound { .. } => "seat_not_found",
            Self::OrderNotFound(_) => "order_not_found",
            Self::SeatUnavailable(_) => "seat_unavailable",
            Self::SeatLocked(_) => "seat_locked",
            Self::SeatAlreadySold(_) => "seat_already_sold",
            Self::SeatLockedByOther(_) => "seat_locked_by_other",
            Self::OrderNotCancellable { .. } => "order_not_cancellable",
            Self::OrderNumberExhausted(_) => "order_number_exhausted",
            Self::EventInactive(_) => "event_inactive",
            Self::SeatPriceMissing(_) => "seat_price_missing",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Validation(_) => "validation_error",
            Self::Database(e) if is_unique_violation(e) => "unique_constraint_violation",
            Self::Database(_) => "database_unavailable",
            Self::LockService(_) => "lock_service_unavailable",
            Self::Unavailable(_) => "service_unavailable",
        }
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

impl From<validator::ValidationErrors> for BookingError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    details: serde_json::Value,
}

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::Invalid if matches!(self, Self::Validation(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Invalid => StatusCode::BAD_REQUEST,
            ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
        };

        // Детали бэкенда наружу не отдаём
        let message = match self.kind() {
            ErrorKind::Transient => {
                tracing::error!(error = %self, "request failed on backend");
                "A backend service is temporarily unavailable, retry later.".to_string()
            }
            _ => self.to_string(),
        };

        let details = match self.seat_id() {
            Some(seat_id) => serde_json::json!({ "seat_id": seat_id }),
            None => serde_json::json!({}),
        };

        let body = ErrorBody {
            code: self.code(),
            message,
            details,
        };
        (status, Json(body)).into_response()
    }
}

pub mod cancellation;
pub mod cleanup;
pub mod finalization;
pub mod reservation;

use std::sync::Arc;

use crate::config::BookingConfig;
use crate::error::{BookingError, BookingResult};
use crate::locks::LockService;
use crate::models::{EventWithVenue, HolderToken, Order, OrderDetails, Seat};
use crate::store::SeatStore;

pub use cancellation::OrderCanceller;
pub use cleanup::HoldSweeper;
pub use finalization::{FinalizeOrder, OrderFinalizer};
pub use reservation::{
    FailureReason, HeldSeat, HoldOutcome, ReleaseOutcome, ReservationEngine, SeatFailure,
};

/// Upper bound on seats in one hold, release or order request.
pub const MAX_BATCH_SIZE: usize = 100;

/// Validates a seat id batch: non-empty, positive ids, bounded.
/// Returns the ids deduplicated in ascending order.
pub(crate) fn normalize_batch(seat_ids: &[i64]) -> BookingResult<Vec<i64>> {
    if seat_ids.is_empty() {
        return Err(BookingError::InvalidRequest(
            "seat_ids must not be empty".to_string(),
        ));
    }
    if let Some(bad) = seat_ids.iter().find(|id| **id <= 0) {
        return Err(BookingError::InvalidRequest(format!("invalid seat id {bad}")));
    }
    let mut ids = seat_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    if ids.len() > MAX_BATCH_SIZE {
        return Err(BookingError::InvalidRequest(format!(
            "at most {MAX_BATCH_SIZE} seats per request"
        )));
    }
    Ok(ids)
}

/// Entry point of the booking core, shared by the HTTP handlers.
#[derive(Clone)]
pub struct BookingService {
    store: Arc<dyn SeatStore>,
    reservations: ReservationEngine,
    finalizer: OrderFinalizer,
    canceller: OrderCanceller,
    config: BookingConfig,
}

impl BookingService {
    pub fn new(
        store: Arc<dyn SeatStore>,
        locks: Arc<dyn LockService>,
        config: BookingConfig,
    ) -> Self {
        Self {
            reservations: ReservationEngine::new(store.clone(), locks.clone()),
            finalizer: OrderFinalizer::new(store.clone(), locks.clone(), config.finalize_lock_ttl),
            canceller: OrderCanceller::new(store.clone(), locks),
            store,
            config,
        }
    }

    pub fn reservations(&self) -> &ReservationEngine {
        &self.reservations
    }

    /// Holds seats for the configured hold TTL.
    pub async fn hold_seats(
        &self,
        event_id: i64,
        seat_ids: &[i64],
        holder: &HolderToken,
    ) -> BookingResult<HoldOutcome> {
        self.reservations
            .hold_batch(event_id, seat_ids, holder, self.config.hold_ttl)
            .await
    }

    pub async fn release_seats(
        &self,
        seat_ids: &[i64],
        holder: &HolderToken,
    ) -> BookingResult<ReleaseOutcome> {
        self.reservations.release(seat_ids, holder).await
    }

    pub async fn finalize_order(&self, request: FinalizeOrder) -> BookingResult<OrderDetails> {
        self.finalizer.finalize(request).await
    }

    pub async fn cancel_order(&self, order_id: i64) -> BookingResult<Order> {
        self.canceller.cancel(order_id).await
    }

    pub async fn order_details(&self, order_id: i64) -> BookingResult<OrderDetails> {
        let order = self
            .store
            .find_order(order_id)
            .await?
            .ok_or(BookingError::OrderNotFound(order_id))?;
        let items = self.store.order_items(order_id).await?;
        Ok(OrderDetails { order, items })
    }

    pub async fn event_seats(&self, event_id: i64) -> BookingResult<Vec<Seat>> {
        self.reservations.event_seats(event_id).await
    }

    pub async fn active_events(&self) -> BookingResult<Vec<EventWithVenue>> {
        self.store.list_active_events().await
    }

    pub fn sweeper(&self) -> HoldSweeper {
        HoldSweeper::new(self.store.clone())
    }
}

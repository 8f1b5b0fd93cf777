//! Seat reservation engine: hold, release and lazy reconciliation.
//!
//! A hold is two records kept in step: the expiring key in the lock service
//! (the actual mutual exclusion) and the `held` status on the seat row (what
//! listings and finalization read). The lock service decides; the seat row
//! follows, and is corrected lazily whenever it is found stale.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::normalize_batch;
use crate::error::{BookingError, BookingResult};
use crate::locks::{claim, seat_lock_key, Claim, LockService};
use crate::models::{HolderToken, Seat, SeatStatus};
use crate::store::SeatStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeldSeat {
    pub seat_id: i64,
    pub price: i64,
    pub hold_expires_at: DateTime<Utc>,
}

/// Why one seat of a batch could not be held or released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NotFound,
    /// Already sold.
    Unavailable,
    /// Held by another holder.
    Locked,
    PriceMissing,
    /// Release of a seat this holder does not hold (never held or expired).
    NotHeld,
    /// Release of a seat held by another holder.
    HeldByOther,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeatFailure {
    pub seat_id: i64,
    pub reason: FailureReason,
}

impl SeatFailure {
    fn new(seat_id: i64, reason: FailureReason) -> Self {
        Self { seat_id, reason }
    }

    fn into_error(self, event_id: i64) -> BookingError {
        let seat_id = self.seat_id;
        match self.reason {
            FailureReason::NotFound => BookingError::SeatNotFound { event_id, seat_id },
            FailureReason::Unavailable => BookingError::SeatUnavailable(seat_id),
            FailureReason::Locked | FailureReason::HeldByOther => BookingError::SeatLocked(seat_id),
            FailureReason::PriceMissing => BookingError::SeatPriceMissing(seat_id),
            FailureReason::NotHeld => BookingError::InvalidRequest(format!(
                "seat {seat_id} is not held by this holder"
            )),
        }
    }
}

/// Result of a hold batch. Either `held` or `failed` is empty.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HoldOutcome {
    pub held: Vec<HeldSeat>,
    pub failed: Vec<SeatFailure>,
}

impl HoldOutcome {
    fn rejected(failed: Vec<SeatFailure>) -> Self {
        Self {
            held: Vec::new(),
            failed,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Result of a release batch; partial success is allowed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReleaseOutcome {
    pub released: Vec<i64>,
    pub failed: Vec<SeatFailure>,
}

#[derive(Clone)]
pub struct ReservationEngine {
    store: Arc<dyn SeatStore>,
    locks: Arc<dyn LockService>,
}

impl ReservationEngine {
    pub fn new(store: Arc<dyn SeatStore>, locks: Arc<dyn LockService>) -> Self {
        Self { store, locks }
    }

    /// Holds every seat for `holder`, or none of them.
    ///
    /// The first itemized failure of the batch is returned as the error.
    pub async fn hold(
        &self,
        event_id: i64,
        seat_ids: &[i64],
        holder: &HolderToken,
        ttl: Duration,
    ) -> BookingResult<Vec<HeldSeat>> {
        let mut outcome = self.hold_batch(event_id, seat_ids, holder, ttl).await?;
        if outcome.failed.is_empty() {
            Ok(outcome.held)
        } else {
            Err(outcome.failed.swap_remove(0).into_error(event_id))
        }
    }

    /// Same as [`hold`](Self::hold) but per-seat failures come back itemized
    /// instead of as an error. Event-level and backend failures stay errors.
    pub async fn hold_batch(
        &self,
        event_id: i64,
        seat_ids: &[i64],
        holder: &HolderToken,
        ttl: Duration,
    ) -> BookingResult<HoldOutcome> {
        let seat_ids = normalize_batch(seat_ids)?;

        let event = self
            .store
            .find_event(event_id)
            .await?
            .ok_or(BookingError::EventNotFound(event_id))?;
        if !event.is_active {
            return Err(BookingError::EventInactive(event_id));
        }

        let mut seats: HashMap<i64, Seat> = self
            .store
            .find_seats(&seat_ids)
            .await?
            .into_iter()
            .filter(|s| s.event_id == event_id)
            .map(|s| (s.id, s))
            .collect();

        // Быстрая проверка без блокировок: отсекаем заведомо невозможное
        let now = Utc::now();
        let mut failed = Vec::new();
        let mut candidates = Vec::with_capacity(seat_ids.len());
        for seat_id in &seat_ids {
            let Some(seat) = seats.remove(seat_id) else {
                failed.push(SeatFailure::new(*seat_id, FailureReason::NotFound));
                continue;
            };
            let seat = self.reconcile_seat(seat, now).await?;
            if seat.status == SeatStatus::Sold {
                failed.push(SeatFailure::new(seat.id, FailureReason::Unavailable));
            } else if let Some(price) = seat.price {
                candidates.push((seat.id, price));
            } else {
                failed.push(SeatFailure::new(seat.id, FailureReason::PriceMissing));
            }
        }
        if !failed.is_empty() {
            debug!(event_id, failed = failed.len(), "hold rejected before claiming");
            return Ok(HoldOutcome::rejected(failed));
        }

        let mut acquired: Vec<i64> = Vec::new();
        let mut held = Vec::with_capacity(candidates.len());
        for (seat_id, price) in candidates {
            match self.claim_seat(seat_id, holder, ttl, &mut acquired).await {
                Ok(Some(hold_expires_at)) => held.push(HeldSeat {
                    seat_id,
                    price,
                    hold_expires_at,
                }),
                Ok(None) => {
                    self.undo_claims(&acquired, holder).await;
                    return Ok(HoldOutcome::rejected(vec![SeatFailure::new(
                        seat_id,
                        FailureReason::Locked,
                    )]));
                }
                Err(BookingError::SeatUnavailable(id)) => {
                    self.undo_claims(&acquired, holder).await;
                    return Ok(HoldOutcome::rejected(vec![SeatFailure::new(
                        id,
                        FailureReason::Unavailable,
                    )]));
                }
                Err(e) => {
                    self.undo_claims(&acquired, holder).await;
                    return Err(e);
                }
            }
        }

        info!(event_id, holder = %holder, seats = held.len(), "seats held");
        Ok(HoldOutcome {
            held,
            failed: Vec::new(),
        })
    }

    /// Claims one seat in the lock service and mirrors it on the seat row.
    ///
    /// `Ok(None)` means another holder owns the seat. Newly created keys are
    /// recorded in `acquired` so the caller can undo them.
    async fn claim_seat(
        &self,
        seat_id: i64,
        holder: &HolderToken,
        ttl: Duration,
        acquired: &mut Vec<i64>,
    ) -> BookingResult<Option<DateTime<Utc>>> {
        let key = seat_lock_key(seat_id);
        match claim(self.locks.as_ref(), &key, holder, ttl).await? {
            Claim::Contended => return Ok(None),
            Claim::Acquired => acquired.push(seat_id),
            Claim::Refreshed => debug!(seat_id, holder = %holder, "re-entrant hold refreshed"),
        }

        let until = Utc::now() + ttl;
        // Условный UPDATE: проданное место не перезаписываем
        if !self.store.mark_held(seat_id, holder, until).await? {
            return Err(BookingError::SeatUnavailable(seat_id));
        }
        Ok(Some(until))
    }

    /// Releases keys created by a failed batch and clears their seat rows.
    async fn undo_claims(&self, acquired: &[i64], holder: &HolderToken) {
        for seat_id in acquired {
            let key = seat_lock_key(*seat_id);
            if let Err(e) = self.locks.release(&key, holder).await {
                warn!(seat_id, error = %e, "failed to release claim of rejected batch");
            }
            if let Err(e) = self.store.clear_hold(*seat_id, holder).await {
                warn!(seat_id, error = %e, "failed to clear hold of rejected batch");
            }
        }
        if !acquired.is_empty() {
            debug!(holder = %holder, seats = acquired.len(), "rolled back batch claims");
        }
    }

    /// Releases the seats this holder holds; other seats are itemized failures.
    pub async fn release(
        &self,
        seat_ids: &[i64],
        holder: &HolderToken,
    ) -> BookingResult<ReleaseOutcome> {
        let seat_ids = normalize_batch(seat_ids)?;
        let seats: HashMap<i64, Seat> = self
            .store
            .find_seats(&seat_ids)
            .await?
            .into_iter()
            .map(|s| (s.id, s))
            .collect();

        let mut outcome = ReleaseOutcome::default();
        for seat_id in seat_ids {
            let Some(seat) = seats.get(&seat_id) else {
                outcome
                    .failed
                    .push(SeatFailure::new(seat_id, FailureReason::NotFound));
                continue;
            };

            let key = seat_lock_key(seat_id);
            if self.locks.release(&key, holder).await? {
                self.store.clear_hold(seat_id, holder).await?;
                outcome.released.push(seat_id);
                continue;
            }

            let reason = match self.locks.holder(&key).await? {
                Some(_) => FailureReason::HeldByOther,
                None => {
                    // Наша бронь уже истекла: заодно приводим строку в порядок
                    if seat.status == SeatStatus::Held && seat.held_by(holder) {
                        self.store.clear_stale_hold(seat).await?;
                    }
                    FailureReason::NotHeld
                }
            };
            outcome.failed.push(SeatFailure::new(seat_id, reason));
        }

        info!(
            holder = %holder,
            released = outcome.released.len(),
            failed = outcome.failed.len(),
            "seats released"
        );
        Ok(outcome)
    }

    /// Reads a seat with stale hold state corrected. `None` if the seat does not exist.
    pub async fn reconcile(&self, seat_id: i64) -> BookingResult<Option<Seat>> {
        let Some(seat) = self.store.find_seats(&[seat_id]).await?.into_iter().next() else {
            return Ok(None);
        };
        self.reconcile_seat(seat, Utc::now()).await.map(Some)
    }

    /// Seats of an event with their effective statuses.
    pub async fn event_seats(&self, event_id: i64) -> BookingResult<Vec<Seat>> {
        if self.store.find_event(event_id).await?.is_none() {
            return Err(BookingError::EventNotFound(event_id));
        }
        let now = Utc::now();
        let mut seats = Vec::new();
        for seat in self.store.list_event_seats(event_id).await? {
            seats.push(self.reconcile_seat(seat, now).await?);
        }
        Ok(seats)
    }

    /// Returns the seat as it should be observed at `now`.
    ///
    /// A `held` row whose expiry passed or whose lock key is gone, and any
    /// `released` row, reads as `available`; the row is corrected on the way.
    async fn reconcile_seat(&self, mut seat: Seat, now: DateTime<Utc>) -> BookingResult<Seat> {
        let stale = match seat.status {
            SeatStatus::Released => true,
            SeatStatus::Held if !seat.hold_active(now) => true,
            SeatStatus::Held => self
                .locks
                .holder(&seat_lock_key(seat.id))
                .await?
                .is_none(),
            _ => false,
        };
        if !stale {
            return Ok(seat);
        }

        match self.store.clear_stale_hold(&seat).await {
            Ok(true) => debug!(seat_id = seat.id, "stale hold cleared"),
            Ok(false) => {}
            // Исправление оппортунистическое, решение от него не зависит
            Err(e) => warn!(seat_id = seat.id, error = %e, "failed to clear stale hold"),
        }
        seat.status = SeatStatus::Available;
        seat.hold_expires_at = None;
        seat.holder_token = None;
        Ok(seat)
    }
}

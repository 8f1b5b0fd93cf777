//! Order finalization: turns held seats into a registered order.
//!
//! Advisory checks run first without locks for early rejection. The
//! authoritative checks are repeated inside one store transaction, after
//! every seat row has been locked in ascending id order.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::normalize_batch;
use crate::error::{BookingError, BookingResult};
use crate::locks::{claim, seat_lock_key, Claim, LockService};
use crate::models::{HolderToken, NewOrder, OrderDetails, Seat, SeatStatus};
use crate::store::{SeatStore, StoreTransaction};

const MAX_ORDER_NUMBER_ATTEMPTS: u32 = 5;
const MAX_BUYER_NAME_LEN: usize = 100;

/// Input of [`OrderFinalizer::finalize`].
#[derive(Debug, Clone)]
pub struct FinalizeOrder {
    pub event_id: i64,
    pub seat_ids: Vec<i64>,
    pub holder: HolderToken,
    pub buyer_name: String,
    pub user_id: Option<i64>,
}

/// `ORD-` followed by ten upper-case hex digits.
pub fn generate_order_number() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("ORD-{}", hex[..10].to_uppercase())
}

#[derive(Clone)]
pub struct OrderFinalizer {
    store: Arc<dyn SeatStore>,
    locks: Arc<dyn LockService>,
    lock_ttl: Duration,
}

impl OrderFinalizer {
    /// `lock_ttl` is the expiry of the seat locks re-claimed for the duration
    /// of the transaction.
    pub fn new(store: Arc<dyn SeatStore>, locks: Arc<dyn LockService>, lock_ttl: Duration) -> Self {
        Self {
            store,
            locks,
            lock_ttl,
        }
    }

    pub async fn finalize(&self, request: FinalizeOrder) -> BookingResult<OrderDetails> {
        let seat_ids = normalize_batch(&request.seat_ids)?;
        let buyer_name = request.buyer_name.trim().to_string();
        if buyer_name.is_empty() || buyer_name.chars().count() > MAX_BUYER_NAME_LEN {
            return Err(BookingError::InvalidRequest(format!(
                "buyer_name must be 1..={MAX_BUYER_NAME_LEN} characters"
            )));
        }

        self.precheck(request.event_id, &seat_ids).await?;

        let new_order = NewOrder {
            order_number: String::new(),
            event_id: request.event_id,
            user_id: request.user_id,
            total_amount: 0,
            buyer_name,
        };

        let mut tx = self.store.begin().await?;
        let mut claims = TxClaims::default();
        let result = self
            .finalize_in_tx(tx.as_mut(), &seat_ids, &request.holder, new_order, &mut claims)
            .await;

        let details = match result {
            Ok(details) => match tx.commit().await {
                Ok(()) => details,
                Err(e) => {
                    warn!(event_id = request.event_id, error = %e, "order commit failed");
                    self.undo_claims(&claims, &request.holder).await;
                    return Err(e);
                }
            },
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                self.undo_claims(&claims, &request.holder).await;
                debug!(event_id = request.event_id, error = %e, "finalization aborted");
                return Err(e);
            }
        };

        // После коммита блокировки больше не нужны; TTL подстрахует, если удаление не пройдёт
        self.release_claims(&seat_ids, &request.holder).await;

        info!(
            order_id = details.order.id,
            order_number = %details.order.order_number,
            event_id = details.order.event_id,
            seats = details.items.len(),
            total = details.order.total_amount,
            "order registered"
        );
        Ok(details)
    }

    /// Lock-free checks: event active, seats belong to it, priced, not sold.
    async fn precheck(&self, event_id: i64, seat_ids: &[i64]) -> BookingResult<()> {
        let event = self
            .store
            .find_event(event_id)
            .await?
            .ok_or(BookingError::EventNotFound(event_id))?;
        if !event.is_active {
            return Err(BookingError::EventInactive(event_id));
        }

        let seats: HashMap<i64, Seat> = self
            .store
            .find_seats(seat_ids)
            .await?
            .into_iter()
            .map(|s| (s.id, s))
            .collect();
        for seat_id in seat_ids {
            let seat = seats
                .get(seat_id)
                .filter(|s| s.event_id == event_id)
                .ok_or(BookingError::SeatNotFound {
                    event_id,
                    seat_id: *seat_id,
                })?;
            if seat.price.is_none() {
                return Err(BookingError::SeatPriceMissing(seat.id));
            }
            if seat.status == SeatStatus::Sold {
                return Err(BookingError::SeatAlreadySold(seat.id));
            }
        }
        Ok(())
    }

    async fn finalize_in_tx(
        &self,
        tx: &mut dyn StoreTransaction,
        seat_ids: &[i64],
        holder: &HolderToken,
        mut new_order: NewOrder,
        claims: &mut TxClaims,
    ) -> BookingResult<OrderDetails> {
        let event_id = new_order.event_id;
        let seats = tx.lock_seats(seat_ids).await?;
        if seats.len() != seat_ids.len() {
            let missing = seat_ids
                .iter()
                .find(|id| !seats.iter().any(|s| s.id == **id))
                .copied()
                .unwrap_or_default();
            return Err(BookingError::SeatNotFound {
                event_id,
                seat_id: missing,
            });
        }

        let now = Utc::now();
        let mut priced = Vec::with_capacity(seats.len());
        for seat in &seats {
            if seat.event_id != event_id {
                return Err(BookingError::SeatNotFound {
                    event_id,
                    seat_id: seat.id,
                });
            }
            // Сначала проверка продажи, потом захват ключа
            if seat.status == SeatStatus::Sold {
                return Err(BookingError::SeatAlreadySold(seat.id));
            }
            if seat.hold_active(now) && !seat.held_by(holder) {
                return Err(BookingError::SeatLockedByOther(seat.id));
            }
            let price = seat.price.ok_or(BookingError::SeatPriceMissing(seat.id))?;

            let key = seat_lock_key(seat.id);
            match claim(self.locks.as_ref(), &key, holder, self.lock_ttl).await? {
                Claim::Acquired => claims.acquired.push(seat.id),
                Claim::Refreshed => {
                    let until = (seat.hold_active(now) && seat.held_by(holder))
                        .then_some(seat.hold_expires_at)
                        .flatten();
                    claims.refreshed.push((seat.id, until));
                }
                Claim::Contended => return Err(BookingError::SeatLockedByOther(seat.id)),
            }
            priced.push((seat.id, price));
        }

        new_order.total_amount = priced.iter().map(|(_, price)| price).sum();
        let order = insert_with_unique_number(tx, new_order).await?;

        let mut items = Vec::with_capacity(priced.len());
        for (seat_id, price) in priced {
            items.push(tx.insert_order_item(order.id, seat_id, price).await?);
            tx.mark_sold(seat_id).await?;
        }

        Ok(OrderDetails { order, items })
    }

    /// Reverts the claims of an aborted finalization.
    ///
    /// Keys created by this call are removed. Keys the holder already had get
    /// their hold expiry back; a key with no live hold behind it is removed.
    async fn undo_claims(&self, claims: &TxClaims, holder: &HolderToken) {
        self.release_claims(&claims.acquired, holder).await;

        let now = Utc::now();
        for (seat_id, until) in &claims.refreshed {
            let key = seat_lock_key(*seat_id);
            let remaining = until
                .and_then(|until| (until - now).to_std().ok())
                .filter(|left| !left.is_zero());
            let restored = match remaining {
                Some(left) => self.locks.refresh(&key, holder, left).await,
                None => self.locks.release(&key, holder).await,
            };
            if let Err(e) = restored {
                warn!(seat_id, error = %e, "failed to restore seat lock expiry");
            }
        }
    }

    /// Best-effort, holder-checked removal of seat lock keys.
    async fn release_claims(&self, seat_ids: &[i64], holder: &HolderToken) {
        for seat_id in seat_ids {
            if let Err(e) = self.locks.release(&seat_lock_key(*seat_id), holder).await {
                warn!(seat_id, error = %e, "failed to release seat lock");
            }
        }
    }
}

/// Lock keys touched inside one finalization transaction.
#[derive(Debug, Default)]
struct TxClaims {
    /// Seats whose key this call created.
    acquired: Vec<i64>,
    /// Seats whose key the holder already had, with the hold expiry to restore.
    refreshed: Vec<(i64, Option<DateTime<Utc>>)>,
}

async fn insert_with_unique_number(
    tx: &mut dyn StoreTransaction,
    mut new_order: NewOrder,
) -> BookingResult<crate::models::Order> {
    for attempt in 1..=MAX_ORDER_NUMBER_ATTEMPTS {
        new_order.order_number = generate_order_number();
        if let Some(order) = tx.insert_order(&new_order).await? {
            return Ok(order);
        }
        warn!(
            attempt,
            order_number = %new_order.order_number,
            "order number collision, regenerating"
        );
    }
    Err(BookingError::OrderNumberExhausted(MAX_ORDER_NUMBER_ATTEMPTS))
}

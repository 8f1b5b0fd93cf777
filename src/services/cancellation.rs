use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{BookingError, BookingResult};
use crate::locks::{seat_lock_key, LockService};
use crate::models::{HolderToken, Order, OrderStatus, SeatStatus};
use crate::store::{SeatStore, StoreTransaction};

/// Cancels registered orders and puts their seats back on sale.
#[derive(Clone)]
pub struct OrderCanceller {
    store: Arc<dyn SeatStore>,
    locks: Arc<dyn LockService>,
}

impl OrderCanceller {
    pub fn new(store: Arc<dyn SeatStore>, locks: Arc<dyn LockService>) -> Self {
        Self { store, locks }
    }

    /// A second cancel of the same order is rejected with `OrderNotCancellable`.
    pub async fn cancel(&self, order_id: i64) -> BookingResult<Order> {
        let mut tx = self.store.begin().await?;
        let (order, reset) = match self.cancel_in_tx(tx.as_mut(), order_id).await {
            Ok(done) => done,
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(order_id, error = %rollback_err, "rollback failed");
                }
                return Err(e);
            }
        };
        tx.commit().await?;

        // Снимаем только ключи, увиденные до коммита: новый владелец их не теряет
        for (seat_id, holder) in &reset {
            let Some(holder) = holder else { continue };
            if let Err(e) = self.locks.release(&seat_lock_key(*seat_id), holder).await {
                warn!(seat_id, error = %e, "failed to release seat lock after cancellation");
            }
        }

        info!(
            order_id,
            order_number = %order.order_number,
            seats_released = reset.len(),
            "order cancelled"
        );
        Ok(order)
    }

    /// Returns the cancelled order and the seats put back to `available`,
    /// each with the owner of its lock key as seen before commit.
    async fn cancel_in_tx(
        &self,
        tx: &mut dyn StoreTransaction,
        order_id: i64,
    ) -> BookingResult<(Order, Vec<(i64, Option<HolderToken>)>)> {
        let order = tx
            .lock_order(order_id)
            .await?
            .ok_or(BookingError::OrderNotFound(order_id))?;
        if order.status != OrderStatus::Registered {
            return Err(BookingError::OrderNotCancellable {
                order_id,
                status: order.status,
            });
        }

        let order = tx.set_order_status(order_id, OrderStatus::Cancelled).await?;

        let mut seat_ids: Vec<i64> = tx
            .order_items(order_id)
            .await?
            .into_iter()
            .filter_map(|item| item.seat_id)
            .collect();
        seat_ids.sort_unstable();
        seat_ids.dedup();

        let mut reset = Vec::with_capacity(seat_ids.len());
        for seat in tx.lock_seats(&seat_ids).await? {
            if matches!(seat.status, SeatStatus::Sold | SeatStatus::Held) {
                tx.reset_seat(seat.id).await?;
                let holder = match self.locks.holder(&seat_lock_key(seat.id)).await {
                    Ok(holder) => holder,
                    Err(e) => {
                        // Ключ всё равно истечёт по TTL
                        warn!(seat_id = seat.id, error = %e, "failed to read seat lock owner");
                        None
                    }
                };
                reset.push((seat.id, holder));
            }
        }

        tx.delete_order_items(order_id).await?;
        Ok((order, reset))
    }
}

//! Durable store: the transactional system of record.
//!
//! Reads and single-row updates outside of a transaction go through
//! [`SeatStore`]. Anything that must be all-or-nothing runs inside a
//! [`StoreTransaction`] obtained from [`SeatStore::begin`]; dropping a
//! transaction without committing rolls it back.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::BookingResult;
use crate::models::{
    Event, EventWithVenue, HolderToken, NewOrder, Order, OrderItem, OrderStatus, Seat,
};

pub use memory::MemorySeatStore;
pub use postgres::PgSeatStore;

#[async_trait]
pub trait SeatStore: Send + Sync + 'static {
    async fn find_event(&self, event_id: i64) -> BookingResult<Option<Event>>;

    async fn list_active_events(&self) -> BookingResult<Vec<EventWithVenue>>;

    /// Seats of an event ordered by row, column.
    async fn list_event_seats(&self, event_id: i64) -> BookingResult<Vec<Seat>>;

    /// Seats with the given ids, ascending by id. Unknown ids are skipped.
    async fn find_seats(&self, seat_ids: &[i64]) -> BookingResult<Vec<Seat>>;

    /// Marks the seat `held` by `holder` until `until`.
    ///
    /// Refuses to touch a `sold` seat; returns whether the row was updated.
    async fn mark_held(
        &self,
        seat_id: i64,
        holder: &HolderToken,
        until: DateTime<Utc>,
    ) -> BookingResult<bool>;

    /// Resets the seat to `available` if it is still `held` by `holder`.
    async fn clear_hold(&self, seat_id: i64, holder: &HolderToken) -> BookingResult<bool>;

    /// Resets a stale hold (or a `released` label) observed at `observed`.
    ///
    /// Only updates the row if status, holder and expiry still match the
    /// observation, so a fresh hold taken meanwhile is never clobbered.
    async fn clear_stale_hold(&self, observed: &Seat) -> BookingResult<bool>;

    /// Resets every `held` seat whose expiry is before `now`. Returns the count.
    async fn sweep_expired_holds(&self, now: DateTime<Utc>) -> BookingResult<u64>;

    async fn find_order(&self, order_id: i64) -> BookingResult<Option<Order>>;

    async fn order_items(&self, order_id: i64) -> BookingResult<Vec<OrderItem>>;

    async fn begin(&self) -> BookingResult<Box<dyn StoreTransaction>>;
}

#[async_trait]
pub trait StoreTransaction: Send {
    /// Locks the seat rows exclusively, always in ascending id order.
    async fn lock_seats(&mut self, seat_ids: &[i64]) -> BookingResult<Vec<Seat>>;

    /// Inserts the order unless its number is taken, in which case `None`.
    async fn insert_order(&mut self, order: &NewOrder) -> BookingResult<Option<Order>>;

    async fn insert_order_item(
        &mut self,
        order_id: i64,
        seat_id: i64,
        price: i64,
    ) -> BookingResult<OrderItem>;

    /// Sets the seat `sold` and clears hold metadata.
    async fn mark_sold(&mut self, seat_id: i64) -> BookingResult<()>;

    /// Sets the seat `available` and clears hold metadata.
    async fn reset_seat(&mut self, seat_id: i64) -> BookingResult<()>;

    async fn lock_order(&mut self, order_id: i64) -> BookingResult<Option<Order>>;

    async fn set_order_status(&mut self, order_id: i64, status: OrderStatus)
        -> BookingResult<Order>;

    async fn order_items(&mut self, order_id: i64) -> BookingResult<Vec<OrderItem>>;

    async fn delete_order_items(&mut self, order_id: i64) -> BookingResult<u64>;

    async fn commit(self: Box<Self>) -> BookingResult<()>;

    async fn rollback(self: Box<Self>) -> BookingResult<()>;
}

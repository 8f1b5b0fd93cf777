//! In-memory [`SeatStore`] for tests and local runs without Postgres.
//!
//! A transaction owns the whole state mutex for its lifetime and works on a
//! private copy that replaces the shared state on commit. That is stricter
//! than row-level locking (transactions are fully serialized) but gives the
//! same all-or-nothing visibility.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{SeatStore, StoreTransaction};
use crate::error::{BookingError, BookingResult};
use crate::models::{
    Event, EventWithVenue, HolderToken, NewOrder, Order, OrderItem, OrderStatus, Seat, SeatStatus,
    Venue,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    venues: BTreeMap<i64, Venue>,
    events: BTreeMap<i64, Event>,
    seats: BTreeMap<i64, Seat>,
    orders: BTreeMap<i64, Order>,
    items: BTreeMap<i64, OrderItem>,
    next_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn seats_by_ids(&self, seat_ids: &[i64]) -> Vec<Seat> {
        let wanted: HashSet<i64> = seat_ids.iter().copied().collect();
        self.seats
            .values()
            .filter(|s| wanted.contains(&s.id))
            .cloned()
            .collect()
    }

    fn items_of(&self, order_id: i64) -> Vec<OrderItem> {
        self.items
            .values()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect()
    }

    fn set_seat(&mut self, seat_id: i64, status: SeatStatus) {
        if let Some(seat) = self.seats.get_mut(&seat_id) {
            seat.status = status;
            seat.hold_expires_at = None;
            seat.holder_token = None;
        }
    }
}

#[derive(Clone, Default)]
pub struct MemorySeatStore {
    state: Arc<Mutex<MemoryState>>,
    fail_next_commit: Arc<AtomicBool>,
    order_number_collisions: Arc<AtomicU32>,
}

impl MemorySeatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_venue(&self, name: &str, capacity: i32) -> Venue {
        let mut state = self.state.lock().await;
        let venue = Venue {
            id: state.next_id(),
            name: name.to_string(),
            capacity,
            layout: None,
        };
        state.venues.insert(venue.id, venue.clone());
        venue
    }

    pub async fn add_event(&self, venue_id: i64, name: &str, base_price: i64) -> Event {
        let mut state = self.state.lock().await;
        let event = Event {
            id: state.next_id(),
            venue_id,
            name: name.to_string(),
            description: None,
            event_date: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap_or_default(),
            event_time: NaiveTime::from_hms_opt(19, 0, 0).unwrap_or_default(),
            base_price,
            is_active: true,
        };
        state.events.insert(event.id, event.clone());
        event
    }

    pub async fn set_event_active(&self, event_id: i64, active: bool) {
        if let Some(event) = self.state.lock().await.events.get_mut(&event_id) {
            event.is_active = active;
        }
    }

    /// Creates one seat per column label in `row`.
    pub async fn add_seats(
        &self,
        event_id: i64,
        row: &str,
        columns: &[&str],
        price: Option<i64>,
    ) -> Vec<Seat> {
        let mut state = self.state.lock().await;
        let mut created = Vec::with_capacity(columns.len());
        for column in columns {
            let seat = Seat {
                id: state.next_id(),
                event_id,
                row: row.to_string(),
                column: column.to_string(),
                status: SeatStatus::Available,
                price,
                hold_expires_at: None,
                holder_token: None,
            };
            state.seats.insert(seat.id, seat.clone());
            created.push(seat);
        }
        created
    }

    /// Overwrites a seat row as-is, for arranging stale states in tests.
    pub async fn put_seat(&self, seat: Seat) {
        self.state.lock().await.seats.insert(seat.id, seat);
    }

    pub async fn seat(&self, seat_id: i64) -> Option<Seat> {
        self.state.lock().await.seats.get(&seat_id).cloned()
    }

    pub async fn orders(&self) -> Vec<Order> {
        self.state.lock().await.orders.values().cloned().collect()
    }

    pub async fn all_items(&self) -> Vec<OrderItem> {
        self.state.lock().await.items.values().cloned().collect()
    }

    /// Makes the next commit fail as if the store aborted the transaction.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Makes the next `n` order inserts report a taken order number.
    pub fn simulate_order_number_collisions(&self, n: u32) {
        self.order_number_collisions.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl SeatStore for MemorySeatStore {
    async fn find_event(&self, event_id: i64) -> BookingResult<Option<Event>> {
        Ok(self.state.lock().await.events.get(&event_id).cloned())
    }

    async fn list_active_events(&self) -> BookingResult<Vec<EventWithVenue>> {
        let state = self.state.lock().await;
        let mut events: Vec<EventWithVenue> = state
            .events
            .values()
            .filter(|e| e.is_active)
            .filter_map(|e| {
                state.venues.get(&e.venue_id).map(|v| EventWithVenue {
                    event: e.clone(),
                    venue_name: v.name.clone(),
                })
            })
            .collect();
        events.sort_by(|a, b| {
            (a.event.event_date, a.event.event_time, &a.venue_name).cmp(&(
                b.event.event_date,
                b.event.event_time,
                &b.venue_name,
            ))
        });
        Ok(events)
    }

    async fn list_event_seats(&self, event_id: i64) -> BookingResult<Vec<Seat>> {
        let state = self.state.lock().await;
        let mut seats: Vec<Seat> = state
            .seats
            .values()
            .filter(|s| s.event_id == event_id)
            .cloned()
            .collect();
        seats.sort_by(|a, b| (&a.row, &a.column).cmp(&(&b.row, &b.column)));
        Ok(seats)
    }

    async fn find_seats(&self, seat_ids: &[i64]) -> BookingResult<Vec<Seat>> {
        Ok(self.state.lock().await.seats_by_ids(seat_ids))
    }

    async fn mark_held(
        &self,
        seat_id: i64,
        holder: &HolderToken,
        until: DateTime<Utc>,
    ) -> BookingResult<bool> {
        let mut state = self.state.lock().await;
        match state.seats.get_mut(&seat_id) {
            Some(seat) if seat.status != SeatStatus::Sold => {
                seat.status = SeatStatus::Held;
                seat.hold_expires_at = Some(until);
                seat.holder_token = Some(holder.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clear_hold(&self, seat_id: i64, holder: &HolderToken) -> BookingResult<bool> {
        let mut state = self.state.lock().await;
        let matches = state
            .seats
            .get(&seat_id)
            .is_some_and(|s| s.status == SeatStatus::Held && s.held_by(holder));
        if matches {
            state.set_seat(seat_id, SeatStatus::Available);
        }
        Ok(matches)
    }

    async fn clear_stale_hold(&self, observed: &Seat) -> BookingResult<bool> {
        let mut state = self.state.lock().await;
        let matches = state.seats.get(&observed.id).is_some_and(|s| {
            s.status == observed.status
                && s.holder_token == observed.holder_token
                && s.hold_expires_at == observed.hold_expires_at
        });
        if matches {
            state.set_seat(observed.id, SeatStatus::Available);
        }
        Ok(matches)
    }

    async fn sweep_expired_holds(&self, now: DateTime<Utc>) -> BookingResult<u64> {
        let mut state = self.state.lock().await;
        let stale: Vec<i64> = state
            .seats
            .values()
            .filter(|s| match s.status {
                SeatStatus::Held => s.hold_expires_at.is_some_and(|t| t < now),
                SeatStatus::Released => true,
                _ => false,
            })
            .map(|s| s.id)
            .collect();
        for id in &stale {
            state.set_seat(*id, SeatStatus::Available);
        }
        Ok(stale.len() as u64)
    }

    async fn find_order(&self, order_id: i64) -> BookingResult<Option<Order>> {
        Ok(self.state.lock().await.orders.get(&order_id).cloned())
    }

    async fn order_items(&self, order_id: i64) -> BookingResult<Vec<OrderItem>> {
        Ok(self.state.lock().await.items_of(order_id))
    }

    async fn begin(&self) -> BookingResult<Box<dyn StoreTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            fail_commit: self.fail_next_commit.swap(false, Ordering::SeqCst),
            collisions: self.order_number_collisions.clone(),
        }))
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    fail_commit: bool,
    collisions: Arc<AtomicU32>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn lock_seats(&mut self, seat_ids: &[i64]) -> BookingResult<Vec<Seat>> {
        Ok(self.working.seats_by_ids(seat_ids))
    }

    async fn insert_order(&mut self, order: &NewOrder) -> BookingResult<Option<Order>> {
        let collided = self
            .collisions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let taken = self
            .working
            .orders
            .values()
            .any(|o| o.order_number == order.order_number);
        if collided || taken {
            return Ok(None);
        }

        let now = Utc::now();
        let inserted = Order {
            id: self.working.next_id(),
            order_number: order.order_number.clone(),
            event_id: order.event_id,
            user_id: order.user_id,
            total_amount: order.total_amount,
            status: OrderStatus::Registered,
            buyer_name: order.buyer_name.clone(),
            created_at: now,
            updated_at: now,
        };
        self.working.orders.insert(inserted.id, inserted.clone());
        Ok(Some(inserted))
    }

    async fn insert_order_item(
        &mut self,
        order_id: i64,
        seat_id: i64,
        price: i64,
    ) -> BookingResult<OrderItem> {
        // UNIQUE (seat_id)
        if self
            .working
            .items
            .values()
            .any(|i| i.seat_id == Some(seat_id))
        {
            return Err(BookingError::SeatAlreadySold(seat_id));
        }
        let item = OrderItem {
            id: self.working.next_id(),
            order_id,
            seat_id: Some(seat_id),
            quantity: 1,
            price_at_purchase: price,
        };
        self.working.items.insert(item.id, item.clone());
        Ok(item)
    }

    async fn mark_sold(&mut self, seat_id: i64) -> BookingResult<()> {
        self.working.set_seat(seat_id, SeatStatus::Sold);
        Ok(())
    }

    async fn reset_seat(&mut self, seat_id: i64) -> BookingResult<()> {
        self.working.set_seat(seat_id, SeatStatus::Available);
        Ok(())
    }

    async fn lock_order(&mut self, order_id: i64) -> BookingResult<Option<Order>> {
        Ok(self.working.orders.get(&order_id).cloned())
    }

    async fn set_order_status(
        &mut self,
        order_id: i64,
        status: OrderStatus,
    ) -> BookingResult<Order> {
        let order = self
            .working
            .orders
            .get_mut(&order_id)
            .ok_or(BookingError::OrderNotFound(order_id))?;
        order.status = status;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn order_items(&mut self, order_id: i64) -> BookingResult<Vec<OrderItem>> {
        Ok(self.working.items_of(order_id))
    }

    async fn delete_order_items(&mut self, order_id: i64) -> BookingResult<u64> {
        let before = self.working.items.len();
        self.working.items.retain(|_, i| i.order_id != order_id);
        Ok((before - self.working.items.len()) as u64)
    }

    async fn commit(self: Box<Self>) -> BookingResult<()> {
        let MemoryTransaction {
            mut guard,
            working,
            fail_commit,
            ..
        } = *self;
        if fail_commit {
            return Err(BookingError::Unavailable(
                "transaction aborted by store".to_string(),
            ));
        }
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> BookingResult<()> {
        Ok(())
    }
}

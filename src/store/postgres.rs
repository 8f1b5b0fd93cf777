use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use tracing::debug;

use super::{SeatStore, StoreTransaction};
use crate::error::BookingResult;
use crate::models::{
    Event, EventWithVenue, HolderToken, NewOrder, Order, OrderItem, OrderStatus, Seat, SeatStatus,
};

const SEAT_COLUMNS: &str =
    "id, event_id, seat_row, seat_column, status, price, hold_expires_at, holder_token";
const ORDER_COLUMNS: &str =
    "id, order_number, event_id, user_id, total_amount, status, buyer_name, created_at, updated_at";
const ITEM_COLUMNS: &str = "id, order_id, seat_id, quantity, price_at_purchase";

/// PostgreSQL-backed [`SeatStore`].
#[derive(Clone)]
pub struct PgSeatStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgSeatStore {
    /// `lock_timeout` bounds how long a transaction waits for a row lock
    /// before Postgres aborts it.
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }
}

#[async_trait]
impl SeatStore for PgSeatStore {
    async fn find_event(&self, event_id: i64) -> BookingResult<Option<Event>> {
        let event = sqlx::query_as::<_, Event>(
            "SELECT id, venue_id, name, description, event_date, event_time, base_price, is_active
             FROM events
             WHERE id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(event)
    }

    async fn list_active_events(&self) -> BookingResult<Vec<EventWithVenue>> {
        let events = sqlx::query_as::<_, EventWithVenue>(
            "SELECT e.id, e.venue_id, e.name, e.description, e.event_date, e.event_time,
                    e.base_price, e.is_active, v.name AS venue_name
             FROM events e
             JOIN venues v ON v.id = e.venue_id
             WHERE e.is_active
             ORDER BY e.event_date, e.event_time, v.name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    async fn list_event_seats(&self, event_id: i64) -> BookingResult<Vec<Seat>> {
        let seats = sqlx::query_as::<_, Seat>(&format!(
            "SELECT {SEAT_COLUMNS} FROM seats WHERE event_id = $1 ORDER BY seat_row, seat_column"
        ))
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(seats)
    }

    async fn find_seats(&self, seat_ids: &[i64]) -> BookingResult<Vec<Seat>> {
        let seats = sqlx::query_as::<_, Seat>(&format!(
            "SELECT {SEAT_COLUMNS} FROM seats WHERE id = ANY($1) ORDER BY id"
        ))
        .bind(seat_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(seats)
    }

    async fn mark_held(
        &self,
        seat_id: i64,
        holder: &HolderToken,
        until: DateTime<Utc>,
    ) -> BookingResult<bool> {
        let result = sqlx::query(
            "UPDATE seats
             SET status = 'held', hold_expires_at = $2, holder_token = $3
             WHERE id = $1 AND status <> 'sold'",
        )
        .bind(seat_id)
        .bind(until)
        .bind(holder)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_hold(&self, seat_id: i64, holder: &HolderToken) -> BookingResult<bool> {
        let result = sqlx::query(
            "UPDATE seats
             SET status = 'available', hold_expires_at = NULL, holder_token = NULL
             WHERE id = $1 AND status = 'held' AND holder_token = $2",
        )
        .bind(seat_id)
        .bind(holder)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_stale_hold(&self, observed: &Seat) -> BookingResult<bool> {
        let result = sqlx::query(
            "UPDATE seats
             SET status = 'available', hold_expires_at = NULL, holder_token = NULL
             WHERE id = $1
               AND status = $2
               AND holder_token IS NOT DISTINCT FROM $3
               AND hold_expires_at IS NOT DISTINCT FROM $4",
        )
        .bind(observed.id)
        .bind(observed.status.as_str())
        .bind(observed.holder_token.as_ref())
        .bind(observed.hold_expires_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn sweep_expired_holds(&self, now: DateTime<Utc>) -> BookingResult<u64> {
        let result = sqlx::query(
            "UPDATE seats
             SET status = 'available', hold_expires_at = NULL, holder_token = NULL
             WHERE (status = 'held' AND hold_expires_at < $1) OR status = 'released'",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn find_order(&self, order_id: i64) -> BookingResult<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(order)
    }

    async fn order_items(&self, order_id: i64) -> BookingResult<Vec<OrderItem>> {
        let items = sqlx::query_as::<_, OrderItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = $1 ORDER BY id"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn begin(&self) -> BookingResult<Box<dyn StoreTransaction>> {
        let mut tx = self.pool.begin().await?;
        // SET LOCAL не принимает параметры, значение числовое
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn lock_seats(&mut self, seat_ids: &[i64]) -> BookingResult<Vec<Seat>> {
        // ORDER BY id: rows are locked in ascending id order
        let seats = sqlx::query_as::<_, Seat>(&format!(
            "SELECT {SEAT_COLUMNS} FROM seats WHERE id = ANY($1) ORDER BY id FOR UPDATE"
        ))
        .bind(seat_ids)
        .fetch_all(&mut *self.tx)
        .await?;
        debug!(requested = seat_ids.len(), locked = seats.len(), "locked seat rows");
        Ok(seats)
    }

    async fn insert_order(&mut self, order: &NewOrder) -> BookingResult<Option<Order>> {
        let inserted = sqlx::query_as::<_, Order>(&format!(
            "INSERT INTO orders (order_number, event_id, user_id, total_amount, status, buyer_name)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (order_number) DO NOTHING
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(&order.order_number)
        .bind(order.event_id)
        .bind(order.user_id)
        .bind(order.total_amount)
        .bind(OrderStatus::Registered.as_str())
        .bind(&order.buyer_name)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(inserted)
    }

    async fn insert_order_item(
        &mut self,
        order_id: i64,
        seat_id: i64,
        price: i64,
    ) -> BookingResult<OrderItem> {
        let item = sqlx::query_as::<_, OrderItem>(&format!(
            "INSERT INTO order_items (order_id, seat_id, quantity, price_at_purchase)
             VALUES ($1, $2, 1, $3)
             RETURNING {ITEM_COLUMNS}"
        ))
        .bind(order_id)
        .bind(seat_id)
        .bind(price)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(item)
    }

    async fn mark_sold(&mut self, seat_id: i64) -> BookingResult<()> {
        sqlx::query(
            "UPDATE seats
             SET status = $2, hold_expires_at = NULL, holder_token = NULL
             WHERE id = $1",
        )
        .bind(seat_id)
        .bind(SeatStatus::Sold.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn reset_seat(&mut self, seat_id: i64) -> BookingResult<()> {
        sqlx::query(
            "UPDATE seats
             SET status = $2, hold_expires_at = NULL, holder_token = NULL
             WHERE id = $1",
        )
        .bind(seat_id)
        .bind(SeatStatus::Available.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn lock_order(&mut self, order_id: i64) -> BookingResult<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(order)
    }

    async fn set_order_status(
        &mut self,
        order_id: i64,
        status: OrderStatus,
    ) -> BookingResult<Order> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "UPDATE orders SET status = $2, updated_at = NOW()
             WHERE id = $1
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order_id)
        .bind(status.as_str())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(order)
    }

    async fn order_items(&mut self, order_id: i64) -> BookingResult<Vec<OrderItem>> {
        let items = sqlx::query_as::<_, OrderItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = $1 ORDER BY id"
        ))
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(items)
    }

    async fn delete_order_items(&mut self, order_id: i64) -> BookingResult<u64> {
        let result = sqlx::query("DELETE FROM order_items WHERE order_id = $1")
            .bind(order_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> BookingResult<()> {
        let PgTransaction { tx } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> BookingResult<()> {
        let PgTransaction { tx } = *self;
        tx.rollback().await?;
        Ok(())
    }
}

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use seat_booking::config::BookingConfig;
use seat_booking::locks::MemoryLockService;
use seat_booking::models::{HolderToken, Seat};
use seat_booking::services::BookingService;
use seat_booking::store::MemorySeatStore;

/// Booking core wired to in-memory backends, with one event of three seats.
pub struct Fixture {
    pub store: MemorySeatStore,
    pub locks: MemoryLockService,
    pub booking: BookingService,
    pub event_id: i64,
    pub seats: Vec<Seat>,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_hold_ttl(Duration::from_secs(5)).await
    }

    pub async fn with_hold_ttl(hold_ttl: Duration) -> Self {
        let store = MemorySeatStore::new();
        let locks = MemoryLockService::new();
        let venue = store.add_venue("Main Hall", 300).await;
        let event = store.add_event(venue.id, "Opening Night", 100).await;
        let seats = store
            .add_seats(event.id, "A", &["1", "2", "3"], Some(100))
            .await;

        let config = BookingConfig {
            hold_ttl,
            ..BookingConfig::default()
        };
        let booking = BookingService::new(
            Arc::new(store.clone()),
            Arc::new(locks.clone()),
            config,
        );

        Self {
            store,
            locks,
            booking,
            event_id: event.id,
            seats,
        }
    }

    /// Seat id by column label, e.g. `seat("2")` for A2.
    pub fn seat(&self, column: &str) -> i64 {
        self.seats
            .iter()
            .find(|s| s.column == column)
            .map(|s| s.id)
            .expect("unknown seat column")
    }
}

pub fn holder(name: &str) -> HolderToken {
    HolderToken::parse(name).expect("valid holder token")
}

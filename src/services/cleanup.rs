use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::error::BookingResult;
use crate::store::SeatStore;

/// Periodically resets seat rows whose hold expired.
///
/// Correctness never depends on this: expired holds already read as
/// available. The sweep only keeps the stored statuses tidy for listings.
pub struct HoldSweeper {
    store: Arc<dyn SeatStore>,
}

impl HoldSweeper {
    pub fn new(store: Arc<dyn SeatStore>) -> Self {
        Self { store }
    }

    /// Одна итерация очистки
    pub async fn run_once(&self) -> BookingResult<u64> {
        let swept = self.store.sweep_expired_holds(Utc::now()).await?;
        if swept > 0 {
            info!("🧹 Released {} expired seat holds", swept);
        }
        Ok(swept)
    }

    /// Runs forever; meant to be spawned as a background task.
    pub async fn run(self, period: Duration) {
        info!(?period, "hold sweeper started");
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                error!(error = %e, "hold sweep failed");
            }
        }
    }
}

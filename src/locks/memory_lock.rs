use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::LockService;
use crate::error::{BookingError, BookingResult};
use crate::models::HolderToken;

/// In-process [`LockService`] with lazy expiry.
#[derive(Clone, Default)]
pub struct MemoryLockService {
    entries: Arc<Mutex<HashMap<String, (HolderToken, Instant)>>>,
    unavailable: Arc<std::sync::atomic::AtomicBool>,
}

impl MemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the lock service going down (or coming back).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable
            .store(unavailable, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn active_count(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|(_, until)| *until > now)
            .count()
    }

    /// Time left on a live key, `None` if absent or expired.
    pub async fn expires_in(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .get(key)
            .and_then(|(_, until)| until.checked_duration_since(now))
            .filter(|left| !left.is_zero())
    }

    fn check_available(&self) -> BookingResult<()> {
        if self.unavailable.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(BookingError::Unavailable(
                "lock service unreachable".to_string(),
            ));
        }
        Ok(())
    }
}

fn live<'a>(
    entries: &'a HashMap<String, (HolderToken, Instant)>,
    key: &str,
) -> Option<&'a HolderToken> {
    entries
        .get(key)
        .filter(|(_, until)| *until > Instant::now())
        .map(|(holder, _)| holder)
}

#[async_trait]
impl LockService for MemoryLockService {
    async fn try_acquire(
        &self,
        key: &str,
        holder: &HolderToken,
        ttl: Duration,
    ) -> BookingResult<bool> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        if live(&entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(key.to_string(), (holder.clone(), Instant::now() + ttl));
        Ok(true)
    }

    async fn holder(&self, key: &str) -> BookingResult<Option<HolderToken>> {
        self.check_available()?;
        Ok(live(&*self.entries.lock().await, key).cloned())
    }

    async fn refresh(
        &self,
        key: &str,
        holder: &HolderToken,
        ttl: Duration,
    ) -> BookingResult<bool> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        if live(&entries, key) != Some(holder) {
            return Ok(false);
        }
        entries.insert(key.to_string(), (holder.clone(), Instant::now() + ttl));
        Ok(true)
    }

    async fn release(&self, key: &str, holder: &HolderToken) -> BookingResult<bool> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        if live(&entries, key) != Some(holder) {
            return Ok(false);
        }
        entries.remove(key);
        Ok(true)
    }
}

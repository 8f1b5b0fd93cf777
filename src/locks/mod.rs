//! Ephemeral lock service: one expiring key per seat, value = holder token.
//!
//! Set-if-absent on that key is the only mutual exclusion between two
//! requesters holding the same seat.

pub mod memory_lock;
pub mod redis_lock;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::BookingResult;
use crate::models::HolderToken;

pub use memory_lock::MemoryLockService;
pub use redis_lock::RedisLockService;

pub fn seat_lock_key(seat_id: i64) -> String {
    format!("seat_lock:{}", seat_id)
}

#[async_trait]
pub trait LockService: Send + Sync + 'static {
    /// Atomic set-if-absent with expiry. `true` when the key was created.
    async fn try_acquire(&self, key: &str, holder: &HolderToken, ttl: Duration)
        -> BookingResult<bool>;

    async fn holder(&self, key: &str) -> BookingResult<Option<HolderToken>>;

    /// Extends the expiry if the key is still owned by `holder`.
    async fn refresh(&self, key: &str, holder: &HolderToken, ttl: Duration)
        -> BookingResult<bool>;

    /// Deletes the key if it is still owned by `holder`.
    async fn release(&self, key: &str, holder: &HolderToken) -> BookingResult<bool>;
}

/// Result of claiming one seat key for a holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// Key was absent and now belongs to the holder.
    Acquired,
    /// Key already belonged to the holder; expiry extended.
    Refreshed,
    /// Another holder owns the key.
    Contended,
}

/// Claims `key` for `holder`: set-if-absent, or refresh if already ours.
///
/// Handles the key expiring between the failed set and the ownership check
/// by retrying the set once.
pub async fn claim(
    locks: &dyn LockService,
    key: &str,
    holder: &HolderToken,
    ttl: Duration,
) -> BookingResult<Claim> {
    for _ in 0..2 {
        if locks.try_acquire(key, holder, ttl).await? {
            return Ok(Claim::Acquired);
        }
        match locks.holder(key).await? {
            Some(current) if &current == holder => {
                if locks.refresh(key, holder, ttl).await? {
                    return Ok(Claim::Refreshed);
                }
            }
            Some(_) => return Ok(Claim::Contended),
            None => {}
        }
    }
    // Ключ дважды исчез между SET и GET: считаем занятым
    Ok(Claim::Contended)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_per_seat() {
        assert_eq!(seat_lock_key(42), "seat_lock:42");
    }

    #[tokio::test]
    async fn claim_is_reentrant_for_same_holder() {
        let locks = MemoryLockService::new();
        let x = HolderToken::parse("x").unwrap();
        let y = HolderToken::parse("y").unwrap();
        let ttl = Duration::from_secs(30);

        assert_eq!(claim(&locks, "k", &x, ttl).await.unwrap(), Claim::Acquired);
        assert_eq!(claim(&locks, "k", &x, ttl).await.unwrap(), Claim::Refreshed);
        assert_eq!(claim(&locks, "k", &y, ttl).await.unwrap(), Claim::Contended);
    }
}

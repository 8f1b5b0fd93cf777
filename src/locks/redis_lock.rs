use async_trait::async_trait;
use redis::{AsyncCommands, Script};
use std::time::Duration;

use super::LockService;
use crate::error::BookingResult;
use crate::models::HolderToken;
use crate::redis_client::RedisClient;

// Сравнение владельца и действие должны быть атомарны, поэтому Lua
const RELEASE_IF_OWNER: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

const REFRESH_IF_OWNER: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

/// Redis-backed [`LockService`].
#[derive(Clone)]
pub struct RedisLockService {
    redis: RedisClient,
}

impl RedisLockService {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PX 0 is rejected by Redis
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl LockService for RedisLockService {
    async fn try_acquire(
        &self,
        key: &str,
        holder: &HolderToken,
        ttl: Duration,
    ) -> BookingResult<bool> {
        let mut conn = self.redis.conn.clone();
        // SET NX PX: OK если ключ создан, nil если уже занят
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(holder.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(result.is_some())
    }

    async fn holder(&self, key: &str) -> BookingResult<Option<HolderToken>> {
        let mut conn = self.redis.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value.and_then(|v| HolderToken::parse(v).ok()))
    }

    async fn refresh(
        &self,
        key: &str,
        holder: &HolderToken,
        ttl: Duration,
    ) -> BookingResult<bool> {
        let mut conn = self.redis.conn.clone();
        let updated: i64 = Script::new(REFRESH_IF_OWNER)
            .key(key)
            .arg(holder.as_str())
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(updated == 1)
    }

    async fn release(&self, key: &str, holder: &HolderToken) -> BookingResult<bool> {
        let mut conn = self.redis.conn.clone();
        let deleted: i64 = Script::new(RELEASE_IF_OWNER)
            .key(key)
            .arg(holder.as_str())
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }
}

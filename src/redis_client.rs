use redis::{aio::MultiplexedConnection, Client};
use tracing::info;

/// Shared multiplexed connection to the lock service.
#[derive(Clone)]
pub struct RedisClient {
    pub conn: MultiplexedConnection,
}

impl RedisClient {
    pub async fn connect(redis_url: &str) -> redis::RedisResult<Self> {
        let client = Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_tokio_connection().await?;

        // Проверяем соединение сразу, а не на первом SET NX
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!(%pong, "Redis connection established");

        Ok(RedisClient { conn })
    }
}

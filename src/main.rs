use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use seat_booking::{
    app,
    config::{Config, LogFormat},
    database::Database,
    locks::RedisLockService,
    redis_client::RedisClient,
    services::BookingService,
    store::PgSeatStore,
    AppState,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("invalid configuration")?;

    let filter = EnvFilter::new(&config.app.rust_log);
    match config.app.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Plain => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    info!(environment = %config.app.environment, "Starting Seat Booking API");

    // Connect to the database
    let db = Database::connect(&config.database)
        .await
        .context("failed to connect to database")?;
    info!("Database connected");

    db.run_migrations()
        .await
        .context("failed to run migrations")?;

    // Connect to Redis
    let redis = RedisClient::connect(&config.redis.url)
        .await
        .context("failed to connect to Redis")?;

    let store = Arc::new(PgSeatStore::new(db.pool.clone(), config.database.lock_timeout));
    let locks = Arc::new(RedisLockService::new(redis));
    let booking = BookingService::new(store, locks, config.booking.clone());

    // --- Start background tasks ---
    if let Some(period) = config.booking.sweep_interval {
        let sweeper = booking.sweeper();
        task::spawn(sweeper.run(period));
    }

    let app_state = Arc::new(AppState {
        booking,
        config: config.clone(),
    });

    let host: std::net::IpAddr = config
        .app
        .host
        .parse()
        .with_context(|| format!("invalid HOST {}", config.app.host))?;
    let addr = SocketAddr::from((host, config.app.port));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app(app_state).into_make_service()).await?;
    Ok(())
}

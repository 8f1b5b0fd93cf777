pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod locks;
pub mod models;
pub mod redis_client;
pub mod services;
pub mod store;

use axum::{extract::State, routing::get, Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::services::BookingService;

// Shared state для всего приложения
#[derive(Clone)]
pub struct AppState {
    pub booking: BookingService,
    pub config: config::Config,
}

/// Builds the HTTP router; the backends are already wired into `state`.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Seat Booking API v1.0" }))
        .route("/health", get(health))
        .nest("/api", controllers::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "environment": &state.config.app.environment,
    }))
}

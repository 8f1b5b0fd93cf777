pub mod events;
pub mod orders;
pub mod seats;

use axum::Router;
use std::sync::Arc;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(events::routes())
        .merge(seats::routes())
        .merge(orders::routes())
}

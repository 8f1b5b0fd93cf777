use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub venue_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub event_date: NaiveDate,
    pub event_time: NaiveTime,
    pub base_price: i64,
    pub is_active: bool,
}

/// Event row joined with the name of its venue, for listings.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EventWithVenue {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub event: Event,
    pub venue_name: String,
}

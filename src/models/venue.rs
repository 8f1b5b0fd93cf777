use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Venue {
    pub id: i64,
    pub name: String,
    pub capacity: i32,
    // Схема зала, структура на усмотрение клиента
    pub layout: Option<serde_json::Value>,
}

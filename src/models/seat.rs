use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

use super::{HolderToken, UnknownStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatStatus {
    Available,
    Held,
    Sold,
    /// Left behind by a cancelled order. Read as `Available`.
    Released,
}

impl SeatStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Held => "held",
            Self::Sold => "sold",
            Self::Released => "released",
        }
    }
}

impl fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeatStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(Self::Available),
            "held" => Ok(Self::Held),
            "sold" => Ok(Self::Sold),
            "released" => Ok(Self::Released),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl TryFrom<String> for SeatStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Seat {
    pub id: i64,
    pub event_id: i64,
    #[sqlx(rename = "seat_row")]
    pub row: String,
    #[sqlx(rename = "seat_column")]
    pub column: String,
    #[sqlx(try_from = "String")]
    pub status: SeatStatus,
    pub price: Option<i64>,
    pub hold_expires_at: Option<DateTime<Utc>>,
    pub holder_token: Option<HolderToken>,
}

impl Seat {
    /// True while a `held` status is backed by an unexpired expiry timestamp.
    pub fn hold_active(&self, now: DateTime<Utc>) -> bool {
        self.status == SeatStatus::Held && self.hold_expires_at.is_some_and(|until| until > now)
    }

    pub fn held_by(&self, holder: &HolderToken) -> bool {
        self.holder_token.as_ref() == Some(holder)
    }

    /// Status as observed at `now`: expired holds and `released` read as available.
    pub fn effective_status(&self, now: DateTime<Utc>) -> SeatStatus {
        match self.status {
            SeatStatus::Released => SeatStatus::Available,
            SeatStatus::Held if !self.hold_active(now) => SeatStatus::Available,
            status => status,
        }
    }

    pub fn label(&self) -> String {
        format!("{}{}", self.row, self.column)
    }
}

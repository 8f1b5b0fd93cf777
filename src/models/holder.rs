use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{BookingError, BookingResult};

const MAX_TOKEN_LEN: usize = 255;

/// Opaque identifier of the session that holds seats.
///
/// The API layer hands out one token per reservation attempt and the client
/// passes it unchanged to hold, release and finalize.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct HolderToken(String);

impl HolderToken {
    pub fn parse(raw: impl Into<String>) -> BookingResult<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(BookingError::InvalidRequest(
                "holder token must not be empty".to_string(),
            ));
        }
        if trimmed.len() > MAX_TOKEN_LEN {
            return Err(BookingError::InvalidRequest(format!(
                "holder token longer than {MAX_TOKEN_LEN} bytes"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HolderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

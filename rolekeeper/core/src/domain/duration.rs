// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Duration Spec
//!
//! Parses the compact human duration notation moderators type into the
//! `duration` option of the add-role command (`7d`, `24h`, `60m`, `90s`,
//! or combinations such as `1h 30m`).

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Longest grant accepted. Keeps `now + duration` inside chrono's range.
const MAX_GRANT_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurationSpec {
    raw: String,
    duration: Duration,
}

impl DurationSpec {
    pub fn parse(input: &str) -> Result<Self, DurationError> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(DurationError::Empty);
        }

        let duration = humantime::parse_duration(raw)
            .map_err(|e| DurationError::Malformed(raw.to_string(), e.to_string()))?;

        if duration.is_zero() {
            return Err(DurationError::NotPositive(raw.to_string()));
        }
        if duration > MAX_GRANT_DURATION {
            return Err(DurationError::TooLong(raw.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            duration,
        })
    }

    /// The notation as the requester typed it, for notices.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Absolute expiry instant for a grant issued at `now`.
    pub fn expiry_from(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, DurationError> {
        chrono::Duration::from_std(self.duration)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .ok_or_else(|| DurationError::TooLong(self.raw.clone()))
    }
}

impl std::fmt::Display for DurationSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for DurationSpec {
    type Err = DurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("duration is empty")]
    Empty,

    #[error("invalid duration '{0}': {1}")]
    Malformed(String, String),

    #[error("duration '{0}' must be greater than zero")]
    NotPositive(String),

    #[error("duration '{0}' is too long")]
    TooLong(String),
}

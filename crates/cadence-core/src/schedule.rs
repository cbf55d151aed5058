//! Notifiable window and expiry arithmetic.
//!
//! A message becomes ready once its due date (`stream_start + offset_days`)
//! is no more than `lookback_days` in the past and no more than
//! `lookahead_days` in the future. Both ends are inclusive.

use std::ops::RangeInclusive;

use chrono::{NaiveDate, TimeDelta};
use serde::{Deserialize, Serialize};

/// Default days a message may be delivered late.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 1;

/// Default days a message may be scheduled ahead of its due date.
pub const DEFAULT_LOOKAHEAD_DAYS: i64 = 5;

/// Default delivery validity for messages without a custom expiry.
pub const DEFAULT_EXPIRE_DAYS: i64 = 2;

/// Scheduling parameters shared by enqueueing and update derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Days before today a due message is still enqueued.
    pub lookback_days: i64,
    /// Days after today a due message is already enqueued.
    pub lookahead_days: i64,
    /// Expiry applied when a message has none of its own.
    pub default_expire_days: i64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            lookahead_days: DEFAULT_LOOKAHEAD_DAYS,
            default_expire_days: DEFAULT_EXPIRE_DAYS,
        }
    }
}

impl ScheduleConfig {
    /// Range of `offset_days` values whose due date falls in the window on
    /// `today` for an enrollment starting on `stream_start`.
    ///
    /// Saturates instead of overflowing for absurd dates, which yields an
    /// empty or clipped range rather than an error.
    pub fn ready_offsets(&self, stream_start: NaiveDate, today: NaiveDate) -> RangeInclusive<i64> {
        let elapsed = today.signed_duration_since(stream_start).num_days();
        elapsed.saturating_sub(self.lookback_days)..=elapsed.saturating_add(self.lookahead_days)
    }

    /// Returns true if a message due on `due` is notifiable on `today`.
    pub fn is_notifiable(&self, due: NaiveDate, today: NaiveDate) -> bool {
        let delta = due.signed_duration_since(today).num_days();
        (-self.lookback_days..=self.lookahead_days).contains(&delta)
    }

    /// Last date a delivery scheduled on `delivery_date` is still useful.
    pub fn expires_on(&self, delivery_date: NaiveDate, expire_days: Option<i32>) -> NaiveDate {
        let days = expire_days.map_or(self.default_expire_days, i64::from);
        TimeDelta::try_days(days)
            .and_then(|delta| delivery_date.checked_add_signed(delta))
            .unwrap_or(delivery_date)
    }

    /// Checks that the window is not inverted and expiry is non-negative.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.lookback_days < 0 || self.lookahead_days < 0 {
            return Err("notifiable window bounds must be non-negative".to_string());
        }
        if self.default_expire_days < 0 {
            return Err("default_expire_days must be non-negative".to_string());
        }
        Ok(())
    }
}

//! Calendar and shift arithmetic.
//!
//! Wall-clock time maps to working intervals through three pieces: the
//! weekend/holiday test per product, half-open shift windows (the 3rd shift
//! crosses midnight), and 15-minute slot alignment.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::{ModelError, Product};

/// A daily shift window in minutes from midnight. A span whose end is not
/// after its start crosses into the next calendar day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftSpan {
    pub start_minute: u32,
    pub end_minute: u32,
}

impl ShiftSpan {
    pub fn new(start_minute: u32, end_minute: u32) -> Self {
        Self {
            start_minute,
            end_minute,
        }
    }

    /// Parse an `HH:MM` cell, tolerating a 12-hour `AM`/`PM` suffix.
    pub fn parse_time(raw: &str) -> Result<u32, ModelError> {
        let raw = raw.trim();
        let (clock, meridiem) = if let Some(stripped) = raw.strip_suffix("PM") {
            (stripped.trim_end(), Some(true))
        } else if let Some(stripped) = raw.strip_suffix("AM") {
            (stripped.trim_end(), Some(false))
        } else {
            (raw, None)
        };

        let mut parts = clock.split(':');
        let hour: u32 = parts
            .next()
            .and_then(|p| p.trim().parse().ok())
            .ok_or_else(|| ModelError::InvalidTime(raw.to_string()))?;
        let minute: u32 = match parts.next() {
            Some(p) => p
                .trim()
                .parse()
                .map_err(|_| ModelError::InvalidTime(raw.to_string()))?,
            None => 0,
        };
        let hour = match meridiem {
            Some(true) if hour != 12 => hour + 12,
            Some(false) if hour == 12 => 0,
            _ => hour,
        };
        if hour > 23 || minute >= 60 {
            return Err(ModelError::InvalidTime(raw.to_string()));
        }
        Ok(hour * 60 + minute)
    }

    pub fn from_cells(start: &str, end: &str) -> Result<Self, ModelError> {
        Ok(Self::new(Self::parse_time(start)?, Self::parse_time(end)?))
    }

    pub fn crosses_midnight(&self) -> bool {
        self.end_minute <= self.start_minute
    }

    /// Working minutes in one occurrence of the shift.
    pub fn minutes(&self) -> i64 {
        if self.crosses_midnight() {
            i64::from(24 * 60 - self.start_minute) + i64::from(self.end_minute)
        } else {
            i64::from(self.end_minute - self.start_minute)
        }
    }

    /// The half-open `[start, end)` window for the shift anchored on `date`.
    /// A midnight-crossing shift ends on the following day.
    pub fn window(&self, date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
        let start = date
            .and_hms_opt(self.start_minute / 60, self.start_minute % 60, 0)
            .expect("shift start is a valid clock time");
        let end_date = if self.crosses_midnight() {
            date.succ_opt().expect("date range")
        } else {
            date
        };
        let end = end_date
            .and_hms_opt(self.end_minute / 60, self.end_minute % 60, 0)
            .expect("shift end is a valid clock time");
        (start, end)
    }

    /// Whether `t` falls in the early-morning tail of the previous day's
    /// occurrence of a midnight-crossing shift.
    pub fn in_overnight_tail(&self, t: NaiveDateTime) -> bool {
        self.crosses_midnight() && t.num_seconds_from_midnight() < self.end_minute * 60
    }
}

/// Working-day test for a product line: weekends are off everywhere, and
/// each product carries its own holiday set. An unknown or absent product
/// imposes no holidays.
pub fn is_working_day(date: NaiveDate, product: Option<&Product>) -> bool {
    if date.weekday().num_days_from_monday() >= 5 {
        return false;
    }
    match product {
        Some(p) => !p.holidays.contains(&date),
        None => true,
    }
}

/// Round up to the next 15-minute mark; already-aligned times are returned
/// unchanged.
pub fn round_up_quarter_hour(t: NaiveDateTime) -> NaiveDateTime {
    let secs = i64::from(t.num_seconds_from_midnight());
    let rem = secs % (15 * 60);
    if rem == 0 {
        t
    } else {
        t + chrono::Duration::seconds(15 * 60 - rem)
    }
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Timelike, Utc};

/// A half-open wall-clock hour range `[start, end)` with its price factor.
/// `start > end` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub start_hour: u32,
    pub end_hour: u32,
    pub factor: f64,
}

impl TimeWindow {
    pub const fn new(start_hour: u32, end_hour: u32, factor: f64) -> Self {
        Self {
            start_hour,
            end_hour,
            factor,
        }
    }

    pub fn contains(&self, hour: u32) -> bool {
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}@{}", self.start_hour, self.end_hour, self.factor)
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TimeWindowParseError {
    #[error("expected `start-end@factor`, got `{0}`")]
    Format(String),
    #[error("hour out of range in `{0}`")]
    Hour(String),
    #[error("factor must be a positive number in `{0}`")]
    Factor(String),
}

impl FromStr for TimeWindow {
    type Err = TimeWindowParseError;

    /// Parses `18-22@1.3`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let (range, factor) = raw
            .split_once('@')
            .ok_or_else(|| TimeWindowParseError::Format(raw.to_string()))?;
        let (start, end) = range
            .split_once('-')
            .ok_or_else(|| TimeWindowParseError::Format(raw.to_string()))?;

        let start_hour: u32 = start
            .trim()
            .parse()
            .map_err(|_| TimeWindowParseError::Format(raw.to_string()))?;
        let end_hour: u32 = end
            .trim()
            .parse()
            .map_err(|_| TimeWindowParseError::Format(raw.to_string()))?;
        if start_hour > 23 || end_hour > 24 {
            return Err(TimeWindowParseError::Hour(raw.to_string()));
        }

        let factor: f64 = factor
            .trim()
            .parse()
            .map_err(|_| TimeWindowParseError::Factor(raw.to_string()))?;
        if !factor.is_finite() || factor <= 0.0 {
            return Err(TimeWindowParseError::Factor(raw.to_string()));
        }

        Ok(Self::new(start_hour, end_hour, factor))
    }
}

/// Evening peak, morning peak, night trough.
pub fn default_windows() -> Vec<TimeWindow> {
    vec![
        TimeWindow::new(18, 22, 1.3),
        TimeWindow::new(6, 9, 1.15),
        TimeWindow::new(2, 6, 0.85),
    ]
}

/// Local hour of `at` for a fixed UTC offset. Out-of-range offsets fall back to UTC.
pub fn local_hour(at: DateTime<Utc>, offset_hours: i32) -> u32 {
    match FixedOffset::east_opt(offset_hours * 3600) {
        Some(offset) => at.with_timezone(&offset).hour(),
        None => at.hour(),
    }
}

/// First matching window wins; no window means 1.0.
pub fn factor_for_hour(windows: &[TimeWindow], hour: u32) -> f64 {
    windows
        .iter()
        .find(|w| w.contains(hour))
        .map(|w| w.factor)
        .unwrap_or(1.0)
}

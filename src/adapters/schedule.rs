//! Interval-based scheduling calculator.
//!
//! Accepts `N` (seconds) or `N` followed by a unit: `s`, `m`, `h`, `d`.

use std::time::Duration;

use anyhow::Result;
use thiserror::Error;

use super::ScheduleCalculator;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Schedule is empty")]
    Empty,

    #[error("Invalid schedule '{0}': expected N, Ns, Nm, Nh or Nd")]
    Invalid(String),

    #[error("Schedule '{0}' is out of range")]
    OutOfRange(String),
}

/// Fixed-interval scheduler
#[derive(Debug, Clone, Copy, Default)]
pub struct IntervalScheduler;

impl IntervalScheduler {
    pub fn new() -> Self {
        Self
    }

    /// Parse a schedule spec into an interval
    pub fn parse_interval(schedule: &str) -> Result<Duration, ScheduleError> {
        let spec = schedule.trim();
        if spec.is_empty() {
            return Err(ScheduleError::Empty);
        }

        let (digits, multiplier) = match spec.chars().last() {
            Some('s') => (&spec[..spec.len() - 1], 1),
            Some('m') => (&spec[..spec.len() - 1], 60),
            Some('h') => (&spec[..spec.len() - 1], 3600),
            Some('d') => (&spec[..spec.len() - 1], 86_400),
            _ => (spec, 1),
        };

        let value: u64 = digits
            .trim()
            .parse()
            .map_err(|_| ScheduleError::Invalid(schedule.to_string()))?;
        if value == 0 {
            return Err(ScheduleError::Invalid(schedule.to_string()));
        }

        let secs = value
            .checked_mul(multiplier)
            .ok_or_else(|| ScheduleError::OutOfRange(schedule.to_string()))?;
        Ok(Duration::from_secs(secs))
    }
}

impl ScheduleCalculator for IntervalScheduler {
    fn next_epoch(&self, schedule: &str, now: f64) -> Result<i64> {
        let interval = Self::parse_interval(schedule)?;
        let next = i64::try_from(interval.as_secs())
            .ok()
            .and_then(|secs| (now as i64).checked_add(secs))
            .ok_or_else(|| ScheduleError::OutOfRange(schedule.to_string()))?;
        Ok(next)
    }
}

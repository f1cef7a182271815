//! State-of-charge projection for car-aware charging

use crate::error::{BalancerError, Result};
use chrono::{Duration as ChronoDuration, NaiveDateTime, NaiveTime};

/// Inputs for projecting the battery level at the target time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CarGoal {
    pub battery_percentage: f64,
    pub soc_threshold: f64,
    pub battery_capacity_wh: f64,
    pub hours_until_target: f64,
}

/// Linear projection of the battery level after charging at
/// `charging_power_w` for `hours`. Values above 100 mean the goal is met early.
pub fn estimated_battery_percentage(
    current_percentage: f64,
    capacity_wh: f64,
    charging_power_w: f64,
    hours: f64,
) -> f64 {
    if capacity_wh <= 0.0 || !capacity_wh.is_finite() {
        return current_percentage;
    }
    let current_energy = capacity_wh * current_percentage / 100.0;
    let estimated_energy = current_energy + charging_power_w * hours;
    estimated_energy / capacity_wh * 100.0
}

/// Parse a `HH:MM` target time
pub fn parse_target_time(raw: &str) -> Result<NaiveTime> {
    let trimmed = raw.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .map_err(|e| BalancerError::validation("target_time", format!("'{}': {}", trimmed, e)))
}

/// Hours from `now` until the next occurrence of `target`. A target that
/// already passed today rolls over to tomorrow.
pub fn hours_until(target: NaiveTime, now: NaiveDateTime) -> f64 {
    let mut at = now.date().and_time(target);
    if at < now {
        at += ChronoDuration::days(1);
    }
    (at - now).num_seconds() as f64 / 3600.0
}

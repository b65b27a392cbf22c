//! Volume-anomaly and scheduler-miss checks, each of which may emit a
//! second alert after the run summary.

use chrono::{DateTime, Utc};

/// Healthy window after the expected daily slot: one missed day plus
/// buffer.
pub const SCHEDULER_MISS_HOURS: i64 = 25;

/// Compare this run's record volume to the previous run. Returns a
/// message when the change exceeds the tolerance; the first run never
/// alerts.
pub fn volume_anomaly(
    current_total: i64,
    previous_total: Option<i64>,
    tolerance_percent: u32,
) -> Option<String> {
    let previous = previous_total?;
    if previous <= 0 {
        return None;
    }

    let change_percent = (current_total - previous).abs() as f64 / previous as f64 * 100.0;
    if change_percent <= tolerance_percent as f64 {
        return None;
    }

    Some(format!(
        "Volume anomaly: {change_percent:.1}% change ({previous} -> {current_total} records, tolerance {tolerance_percent}%)"
    ))
}

/// Whether the scheduler missed its daily slot: no terminal run within
/// the 25-hour window.
pub fn scheduler_miss(last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<String> {
    match last_run {
        None => Some("Scheduler miss: no extraction runs recorded".to_string()),
        Some(last) => {
            let hours_since = (now - last).num_hours();
            if hours_since >= SCHEDULER_MISS_HOURS {
                Some(format!(
                    "Scheduler miss: last run was {hours_since}h ago (expected within {SCHEDULER_MISS_HOURS}h)"
                ))
            } else {
                None
            }
        }
    }
}

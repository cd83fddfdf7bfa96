//! # Daily Rollup Aggregation
//!
//! Recomputes one calendar day's `daily_stats` row from that day's raw
//! readings, events, and sessions. Recomputation from source rows makes
//! the rollup idempotent and convergent: running it twice on unchanged
//! data produces identical values.

use chrono::NaiveDate;
use tracing::info;

use crate::error::Result;
use crate::storage::{DailyStat, Storage};

/// Recompute and upsert the rollup row for one day
///
/// - `avg_light_level` / `avg_distance`: averages over the day's `LIGHT`
///   / `DIST` readings (zero when the day has none)
/// - `obstacle_encounters`: count of the day's `obstacle_detected` events
/// - `total_drive_time_seconds`: summed over sessions started that day
/// - `headlight_time_seconds`: sum of the numeric prefixes of the day's
///   `headlight_usage` event values
///
/// # Errors
///
/// Returns [`crate::error::BridgeError::Storage`] on query or upsert
/// failure; the caller retries on the next aggregation interval.
pub fn aggregate_daily_stats(storage: &Storage, date: NaiveDate) -> Result<DailyStat> {
    let avg_light_level = storage.day_sensor_avg("LIGHT", date)?.unwrap_or(0.0);
    let avg_distance = storage.day_sensor_avg("DIST", date)?.unwrap_or(0.0);
    let obstacle_encounters = storage.day_event_count("obstacle_detected", date)?;
    let total_drive_time_seconds = storage.day_drive_seconds(date)?;
    let headlight_time_seconds = storage
        .day_event_values("headlight_usage", date)?
        .iter()
        .map(|value| numeric_prefix(value))
        .sum();

    let stat = DailyStat {
        date,
        avg_light_level,
        avg_distance,
        obstacle_encounters,
        total_drive_time_seconds,
        headlight_time_seconds,
    };

    storage.upsert_daily_stat(&stat)?;
    info!(
        "daily rollup for {}: drive {:.1}s, headlights {:.1}s, {} obstacle(s)",
        date, stat.total_drive_time_seconds, stat.headlight_time_seconds, stat.obstacle_encounters
    );

    Ok(stat)
}

/// Parse the leading number of a free-text value, zero if absent
///
/// `headlight_usage` events store their elapsed seconds as free text
/// (e.g. `"12.0 seconds"`); the rollup only needs the number.
pub fn numeric_prefix(text: &str) -> f64 {
    let trimmed = text.trim_start();
    let mut end = 0;
    for (i, c) in trimmed.char_indices() {
        if c.is_ascii_digit() || c == '.' || (i == 0 && (c == '-' || c == '+')) {
            end = i + c.len_utf8();
        } else {
            break;
        }
    }
    trimmed[..end].parse().unwrap_or(0.0)
}

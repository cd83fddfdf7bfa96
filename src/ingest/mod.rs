//! # Telemetry Ingest Module
//!
//! Persists parsed `SENSORS:` messages and evaluates threshold rules.
//!
//! A reading that fails numeric conversion is stored as `0.0` with a
//! warning rather than dropped - losing the observation entirely is worse
//! than a zeroed data point.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::bridge::state::BridgeState;
use crate::error::Result;
use crate::storage::Storage;
use crate::tracker::HeadlightState;

/// Distance below which an obstacle is recorded, in centimeters
pub const OBSTACLE_DISTANCE_CM: f64 = 20.0;

/// Ambient light level below which headlights are suggested
pub const LOW_LIGHT_LEVEL: f64 = 200.0;

/// Persist a `SENSORS:` message and evaluate threshold rules
///
/// One `sensor_readings` row per pair. After persistence:
/// - `DIST` below [`OBSTACLE_DISTANCE_CM`] appends an `obstacle_detected`
///   event and counts against the open session
/// - `LIGHT` below [`LOW_LIGHT_LEVEL`] while the headlights are off
///   appends an `auto_headlight_suggestion` event (advisory only - it
///   does not change any control)
///
/// # Errors
///
/// Returns [`crate::error::BridgeError::Storage`] if persistence fails;
/// the message is abandoned for this tick.
pub fn ingest_sensors(
    state: &BridgeState,
    storage: &Storage,
    pairs: &[(String, String)],
    now: DateTime<Utc>,
) -> Result<()> {
    for (kind, raw) in pairs {
        let value = match raw.parse::<f64>() {
            Ok(value) => value,
            Err(_) => {
                warn!("unparseable {} reading {:?}, storing 0.0", kind, raw);
                0.0
            }
        };

        storage.insert_reading(kind, value, now)?;

        match kind.as_str() {
            "DIST" if value < OBSTACLE_DISTANCE_CM => {
                storage.log_event(
                    "obstacle_detected",
                    &format!("distance {:.1} cm", value),
                    now,
                )?;
                storage.increment_obstacles(state.session_id)?;
            }
            "LIGHT" if value < LOW_LIGHT_LEVEL && state.headlights == HeadlightState::Off => {
                storage.log_event(
                    "auto_headlight_suggestion",
                    &format!("ambient light {:.1}", value),
                    now,
                )?;
            }
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn setup() -> (tempfile::TempDir, Storage, BridgeState) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path().join("bridge.db")).unwrap();
        let session_id = storage.start_session(now()).unwrap();
        (dir, storage, BridgeState::new(session_id))
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_obstacle_detected_below_threshold() {
        let (_dir, storage, state) = setup();

        ingest_sensors(&state, &storage, &pairs(&[("DIST", "15"), ("LIGHT", "300")]), now())
            .unwrap();

        // One reading per pair
        assert_eq!(storage.readings_of_type("DIST").unwrap().len(), 1);
        assert_eq!(storage.readings_of_type("DIST").unwrap()[0].value, 15.0);
        assert_eq!(storage.readings_of_type("LIGHT").unwrap()[0].value, 300.0);

        // 15 < 20: obstacle, counted against the session
        let obstacles = storage.events_of_type("obstacle_detected").unwrap();
        assert_eq!(obstacles.len(), 1);
        assert_eq!(obstacles[0].value, "distance 15.0 cm");
        let session = storage.get_session(state.session_id).unwrap().unwrap();
        assert_eq!(session.obstacle_encounters, 1);

        // 300 >= 200: no suggestion
        assert!(storage.events_of_type("auto_headlight_suggestion").unwrap().is_empty());
    }

    #[test]
    fn test_no_obstacle_at_or_above_threshold() {
        let (_dir, storage, state) = setup();

        ingest_sensors(&state, &storage, &pairs(&[("DIST", "20")]), now()).unwrap();

        assert!(storage.events_of_type("obstacle_detected").unwrap().is_empty());
        let session = storage.get_session(state.session_id).unwrap().unwrap();
        assert_eq!(session.obstacle_encounters, 0);
    }

    #[test]
    fn test_conversion_failure_stores_zero() {
        let (_dir, storage, state) = setup();

        ingest_sensors(&state, &storage, &pairs(&[("DIST", "abc"), ("LIGHT", "50")]), now())
            .unwrap();

        assert_eq!(storage.readings_of_type("DIST").unwrap()[0].value, 0.0);
        assert_eq!(storage.readings_of_type("LIGHT").unwrap()[0].value, 50.0);
    }

    #[test]
    fn test_low_light_suggestion_only_when_headlights_off() {
        let (_dir, storage, mut state) = setup();

        ingest_sensors(&state, &storage, &pairs(&[("LIGHT", "150")]), now()).unwrap();
        assert_eq!(
            storage.events_of_type("auto_headlight_suggestion").unwrap().len(),
            1
        );

        // With headlights already on, no suggestion
        state.headlights = HeadlightState::On;
        ingest_sensors(&state, &storage, &pairs(&[("LIGHT", "150")]), now()).unwrap();
        assert_eq!(
            storage.events_of_type("auto_headlight_suggestion").unwrap().len(),
            1
        );
    }

    #[test]
    fn test_unrecognized_sensor_types_are_still_persisted() {
        let (_dir, storage, state) = setup();

        ingest_sensors(&state, &storage, &pairs(&[("TEMP", "21.5")]), now()).unwrap();

        let readings = storage.readings_of_type("TEMP").unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].value, 21.5);
    }
}

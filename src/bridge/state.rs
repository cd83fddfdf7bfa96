//! Process-lifetime bridge state, owned by the scheduler loop.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::tracker::{HeadlightState, MotorState};

/// In-memory state threaded through every component call
///
/// Owned exclusively by the scheduler loop; no locking needed. Reset on
/// restart - a restart loses in-flight timing for the currently-open
/// drive/headlight interval, but never historical rows.
#[derive(Debug)]
pub struct BridgeState {
    /// Per-field snapshot of the last control values successfully sent
    /// to the device
    pub last_applied: HashMap<String, String>,

    /// Device-reported motor state
    pub motor: MotorState,

    /// Device-reported headlight state
    pub headlights: HeadlightState,

    /// When the current drive interval started, if the motor is moving
    pub drive_started: Option<DateTime<Utc>>,

    /// When the current headlight usage interval started, if lights are on
    pub headlights_started: Option<DateTime<Utc>>,

    /// The open session this process run accumulates into
    pub session_id: i64,
}

impl BridgeState {
    /// Fresh state for a new process run
    pub fn new(session_id: i64) -> Self {
        Self {
            last_applied: HashMap::new(),
            motor: MotorState::Stop,
            headlights: HeadlightState::Off,
            drive_started: None,
            headlights_started: None,
            session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_starts_idle() {
        let state = BridgeState::new(7);
        assert_eq!(state.session_id, 7);
        assert_eq!(state.motor, MotorState::Stop);
        assert_eq!(state.headlights, HeadlightState::Off);
        assert!(state.last_applied.is_empty());
        assert!(state.drive_started.is_none());
        assert!(state.headlights_started.is_none());
    }
}

//! # Session & Stats Tracker
//!
//! State machines over device-reported motor and headlight transitions.
//!
//! This module handles:
//! - Motor transitions (`stop`/`forward`/`backward`) and drive-interval timing
//! - Headlight transitions (`on`/`off`) and usage timing
//! - Device-authoritative write-back of reported state to `drone_controls`
//! - Session lifecycle (one session per bridge process run)
//! - Daily rollup aggregation (see [`rollup`])
//!
//! The device is authoritative for when hardware actually transitions, so
//! the machines are driven by `STATUS:` messages, not by commanded state.

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::bridge::state::BridgeState;
use crate::error::Result;
use crate::storage::Storage;

pub mod rollup;

/// Fixed speed estimate used to convert drive time to distance, in m/s
pub const DRIVE_SPEED_MPS: f64 = 0.5;

/// Drive motor state as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorState {
    Stop,
    Forward,
    Backward,
}

impl MotorState {
    /// Parse a device-reported value; unknown values are `None`
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "stop" => Some(MotorState::Stop),
            "forward" => Some(MotorState::Forward),
            "backward" => Some(MotorState::Backward),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MotorState::Stop => "stop",
            MotorState::Forward => "forward",
            MotorState::Backward => "backward",
        }
    }

    /// Whether the motor is in a driving state
    pub fn is_moving(&self) -> bool {
        !matches!(self, MotorState::Stop)
    }
}

impl fmt::Display for MotorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Headlight state as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadlightState {
    Off,
    On,
}

impl HeadlightState {
    /// Parse a device-reported value; unknown values are `None`
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "off" => Some(HeadlightState::Off),
            "on" => Some(HeadlightState::On),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HeadlightState::Off => "off",
            HeadlightState::On => "on",
        }
    }
}

impl fmt::Display for HeadlightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Apply a `STATUS:` message to both state machines
///
/// Recognized fields are `DRIVE` and `LIGHTS`; a `REASON` field annotates
/// the transition event (e.g. a device auto-stop reports
/// `DRIVE=stop;REASON=obstacle`). Unknown fields and unknown state values
/// are logged and ignored.
///
/// # Errors
///
/// Returns [`crate::error::BridgeError::Storage`] if a transition cannot
/// be committed; in-memory state is left unchanged so the next report
/// retries the transition.
pub fn apply_status(
    state: &mut BridgeState,
    storage: &Storage,
    pairs: &[(String, String)],
    now: DateTime<Utc>,
) -> Result<()> {
    let reason = pairs
        .iter()
        .find(|(key, _)| key == "REASON")
        .map(|(_, value)| value.as_str());

    for (key, value) in pairs {
        match key.as_str() {
            "DRIVE" => match MotorState::parse(value) {
                Some(new) => motor_transition(state, storage, new, reason, now)?,
                None => warn!("unknown drive state from device: {:?}", value),
            },
            "LIGHTS" => match HeadlightState::parse(value) {
                Some(new) => headlight_transition(state, storage, new, now)?,
                None => warn!("unknown headlight state from device: {:?}", value),
            },
            "REASON" => {}
            other => debug!("ignoring status field {}={}", other, value),
        }
    }

    Ok(())
}

/// Handle one motor transition
///
/// `stop -> moving` starts the drive-interval timer; `moving -> stop`
/// closes it and credits elapsed time and estimated distance to the open
/// session. A direction reversal without stopping keeps the timer
/// running. The control write-back and the `drive_state_change` event
/// commit in one transaction.
fn motor_transition(
    state: &mut BridgeState,
    storage: &Storage,
    new: MotorState,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    let old = state.motor;
    if old == new {
        return Ok(());
    }

    let label = match reason {
        Some(reason) => format!("{} -> {} ({})", old, new, reason),
        None => format!("{} -> {}", old, new),
    };

    storage.record_transition(
        "drive_motor",
        new.as_str(),
        &[("drive_state_change", label)],
        now,
    )?;

    if !old.is_moving() && new.is_moving() {
        state.drive_started = Some(now);
    } else if old.is_moving() && !new.is_moving() {
        if let Some(started) = state.drive_started.take() {
            let elapsed = seconds_between(started, now);
            storage.add_drive_interval(
                state.session_id,
                elapsed,
                elapsed * DRIVE_SPEED_MPS,
            )?;
        }
    }

    state.motor = new;
    // Mirror the device-reported value so reconciliation does not bounce
    // the device's own report back at it
    state
        .last_applied
        .insert("drive_motor".to_string(), new.as_str().to_string());

    Ok(())
}

/// Handle one headlight transition
///
/// `off -> on` starts the usage timer; `on -> off` closes it, logging a
/// `headlight_usage` event with the elapsed seconds. The usage event
/// commits in the same transaction as the state-change event and control
/// write-back.
fn headlight_transition(
    state: &mut BridgeState,
    storage: &Storage,
    new: HeadlightState,
    now: DateTime<Utc>,
) -> Result<()> {
    let old = state.headlights;
    if old == new {
        return Ok(());
    }

    let mut events = vec![("headlight_state_change", format!("{} -> {}", old, new))];

    if new == HeadlightState::Off {
        if let Some(started) = state.headlights_started {
            let elapsed = seconds_between(started, now);
            events.push(("headlight_usage", format!("{:.1} seconds", elapsed)));
        }
    }

    storage.record_transition("headlights", new.as_str(), &events, now)?;

    state.headlights = new;
    state.headlights_started = match new {
        HeadlightState::On => Some(now),
        HeadlightState::Off => None,
    };
    state
        .last_applied
        .insert("headlights".to_string(), new.as_str().to_string());

    Ok(())
}

/// Close the process's session at graceful shutdown
///
/// Any open drive interval is credited to the session and any open
/// headlight interval logs its usage first, so accumulated time is not
/// lost; then the session row gets its `end_time`.
pub fn close_session(
    state: &mut BridgeState,
    storage: &Storage,
    now: DateTime<Utc>,
) -> Result<()> {
    if let Some(started) = state.drive_started.take() {
        let elapsed = seconds_between(started, now);
        storage.add_drive_interval(state.session_id, elapsed, elapsed * DRIVE_SPEED_MPS)?;
    }

    if let Some(started) = state.headlights_started.take() {
        let elapsed = seconds_between(started, now);
        storage.log_event("headlight_usage", &format!("{:.1} seconds", elapsed), now)?;
    }

    storage.end_session(state.session_id, now)
}

/// Elapsed seconds between two instants, with sub-second precision
fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}

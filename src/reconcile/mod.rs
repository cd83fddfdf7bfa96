//! # Control Reconciliation Engine
//!
//! Diffs desired control state (database) against the last values
//! actually sent to the device, and emits exactly one command per changed
//! field in a fixed order.
//!
//! Applied state is tracked per field: a field is recorded as applied
//! only when its command was sent successfully, so a failed send is
//! retried on the next poll tick instead of being silently marked done.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::bridge::state::BridgeState;
use crate::error::Result;
use crate::protocol::Command;
use crate::storage::Storage;
use crate::transport::DeviceTransport;

/// Fixed emission order when multiple fields change in the same tick
///
/// Deterministic ordering avoids ambiguous device behavior.
pub const CONTROL_FIELD_ORDER: [&str; 4] =
    ["drive_motor", "steering", "headlights", "lcd_message"];

/// Map a control field to its device command
fn command_for(name: &str, value: &str) -> Option<Command> {
    match name {
        "drive_motor" => Some(Command::Drive(value.to_string())),
        "steering" => Some(Command::Steer(value.to_string())),
        "headlights" => Some(Command::Lights(value.to_string())),
        "lcd_message" => Some(Command::Lcd(value.to_string())),
        _ => None,
    }
}

/// One reconciliation poll tick
///
/// Reads the full control set and sends commands for fields that differ
/// from the last applied snapshot. A field with no prior applied value
/// counts as changed, so the first poll after startup pushes the whole
/// control set to the device.
///
/// # Errors
///
/// Returns [`crate::error::BridgeError::Storage`] if the control set
/// cannot be read; send failures are logged per field and retried on the
/// next poll, never propagated.
pub async fn poll(
    state: &mut BridgeState,
    storage: &Storage,
    transport: &mut DeviceTransport,
    now: DateTime<Utc>,
) -> Result<()> {
    let desired = storage.read_controls()?;
    apply(state, storage, transport, &desired, false, now).await
}

/// Out-of-band full resend, triggered by a device `REQUEST:CONTROLS`
///
/// Sends all four fields regardless of diff state (the device lost its
/// state, typically after a reset).
pub async fn resend_all(
    state: &mut BridgeState,
    storage: &Storage,
    transport: &mut DeviceTransport,
    now: DateTime<Utc>,
) -> Result<()> {
    info!("device requested full control resend");
    let desired = storage.read_controls()?;
    apply(state, storage, transport, &desired, true, now).await
}

async fn apply(
    state: &mut BridgeState,
    storage: &Storage,
    transport: &mut DeviceTransport,
    desired: &HashMap<String, String>,
    force: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    for name in CONTROL_FIELD_ORDER {
        let Some(value) = desired.get(name) else {
            continue;
        };
        if !force && state.last_applied.get(name) == Some(value) {
            continue;
        }
        let Some(command) = command_for(name, value) else {
            continue;
        };

        match transport.send_line(&command.encode()).await {
            Ok(()) => {
                // The command is already on the wire; a failed audit row
                // must not cause a duplicate send
                if let Err(e) =
                    storage.log_event("control_change", &format!("{} = {}", name, value), now)
                {
                    warn!("failed to log control change for {}: {}", name, e);
                }
                state.last_applied.insert(name.to_string(), value.clone());
            }
            Err(e) => {
                warn!(
                    "failed to send {} = {}: {} (will retry next poll)",
                    name, value, e
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SerialConfig;
    use crate::transport::port_trait::mocks::MockLinePort;
    use crate::transport::LinePort;
    use chrono::TimeZone;
    use std::io;

    fn setup() -> (tempfile::TempDir, Storage, BridgeState, DeviceTransport, MockLinePort) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path().join("bridge.db")).unwrap();
        let session_id = storage.start_session(now()).unwrap();
        let state = BridgeState::new(session_id);

        let mock = MockLinePort::new();
        let factory_mock = mock.clone();
        let settings = SerialConfig {
            port: "/dev/mock".to_string(),
            baud_rate: 9600,
            write_settle_ms: 0,
            read_poll_ms: 10,
        };
        let transport = DeviceTransport::with_factory(
            settings,
            Box::new(move |_| Ok(Box::new(factory_mock.clone()) as Box<dyn LinePort>)),
        );

        (dir, storage, state, transport, mock)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn applied_snapshot(state: &mut BridgeState, storage: &Storage) {
        for (name, value) in storage.read_controls().unwrap() {
            state.last_applied.insert(name, value);
        }
    }

    #[tokio::test]
    async fn test_first_poll_pushes_the_whole_control_set_in_order() {
        let (_dir, storage, mut state, mut transport, mock) = setup();

        poll(&mut state, &storage, &mut transport, now()).await.unwrap();

        assert_eq!(
            mock.get_written_lines(),
            vec!["DRIVE:stop\n", "STEER:center\n", "LIGHTS:off\n", "LCD:\n"]
        );
        assert_eq!(state.last_applied.len(), 4);
    }

    #[tokio::test]
    async fn test_single_changed_field_emits_exactly_one_command() {
        let (_dir, storage, mut state, mut transport, mock) = setup();
        applied_snapshot(&mut state, &storage);

        storage.set_control("drive_motor", "forward", now()).unwrap();
        poll(&mut state, &storage, &mut transport, now()).await.unwrap();

        assert_eq!(mock.get_written_lines(), vec!["DRIVE:forward\n"]);
        assert_eq!(state.last_applied["drive_motor"], "forward");

        let events = storage.events_of_type("control_change").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].value, "drive_motor = forward");
    }

    #[tokio::test]
    async fn test_unchanged_snapshot_emits_nothing() {
        let (_dir, storage, mut state, mut transport, mock) = setup();
        applied_snapshot(&mut state, &storage);

        poll(&mut state, &storage, &mut transport, now()).await.unwrap();

        assert!(mock.get_written_lines().is_empty());
        assert!(storage.events_of_type("control_change").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_leaves_field_unapplied_and_retries() {
        let (_dir, storage, mut state, mut transport, mock) = setup();
        applied_snapshot(&mut state, &storage);
        storage.set_control("drive_motor", "forward", now()).unwrap();

        // Device disconnect: the poll itself must not fail the loop
        mock.set_write_error(io::ErrorKind::BrokenPipe);
        poll(&mut state, &storage, &mut transport, now()).await.unwrap();
        assert_eq!(state.last_applied["drive_motor"], "stop");
        assert!(storage.events_of_type("control_change").unwrap().is_empty());

        // Device back: the next poll reconnects and resends the field
        mock.clear_write_error();
        poll(&mut state, &storage, &mut transport, now()).await.unwrap();
        assert_eq!(mock.get_written_lines(), vec!["DRIVE:forward\n"]);
        assert_eq!(state.last_applied["drive_motor"], "forward");
    }

    #[tokio::test]
    async fn test_partial_send_failure_only_retries_the_failed_fields() {
        let (_dir, storage, mut state, mut transport, mock) = setup();
        applied_snapshot(&mut state, &storage);

        storage.set_control("drive_motor", "forward", now()).unwrap();
        storage.set_control("headlights", "on", now()).unwrap();

        // First command sends, then the port dies for the rest of the tick
        poll(&mut state, &storage, &mut transport, now()).await.unwrap();
        // (both sent fine here; now force a tick where every send fails)
        storage.set_control("drive_motor", "backward", now()).unwrap();
        storage.set_control("headlights", "off", now()).unwrap();
        mock.set_write_error(io::ErrorKind::BrokenPipe);
        poll(&mut state, &storage, &mut transport, now()).await.unwrap();

        // Neither failed field was marked applied
        assert_eq!(state.last_applied["drive_motor"], "forward");
        assert_eq!(state.last_applied["headlights"], "on");

        mock.clear_write_error();
        poll(&mut state, &storage, &mut transport, now()).await.unwrap();
        let lines = mock.get_written_lines();
        assert_eq!(
            &lines[lines.len() - 2..],
            &["DRIVE:backward\n", "LIGHTS:off\n"]
        );
    }

    #[tokio::test]
    async fn test_resend_all_ignores_diff_state() {
        let (_dir, storage, mut state, mut transport, mock) = setup();
        applied_snapshot(&mut state, &storage);

        resend_all(&mut state, &storage, &mut transport, now()).await.unwrap();

        assert_eq!(
            mock.get_written_lines(),
            vec!["DRIVE:stop\n", "STEER:center\n", "LIGHTS:off\n", "LCD:\n"]
        );
    }
}

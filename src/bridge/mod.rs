//! # Scheduler Loop
//!
//! The single control loop that owns transport, storage, and state.
//!
//! One fixed 100ms tick drives everything: every 10th tick polls control
//! reconciliation, every 5s requests sensor data, every 300s runs the
//! daily rollup, and every tick drains at most one line of device output.
//! A dispatch error is logged and followed by a short backoff; the loop
//! only exits on an explicit shutdown signal.

use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::ingest;
use crate::protocol::{self, Command, DeviceMessage};
use crate::reconcile;
use crate::storage::Storage;
use crate::tracker::{self, rollup};
use crate::transport::DeviceTransport;

pub mod state;

pub use state::BridgeState;

/// Base scheduler tick
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Reconciliation runs every Nth tick (~1s)
pub const CONTROL_POLL_TICKS: u64 = 10;

/// Wall-clock interval between sensor data requests
pub const DATA_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Wall-clock interval between daily rollup runs
pub const STAT_AGGREGATION_INTERVAL: Duration = Duration::from_secs(300);

/// Pause after a dispatch error, preventing a tight error loop
const DISPATCH_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// The bridge daemon: scheduler loop plus everything it owns
pub struct Bridge {
    storage: Storage,
    transport: DeviceTransport,
    state: BridgeState,
    ticks: u64,
    last_sample: Instant,
    last_aggregation: Instant,
}

impl Bridge {
    /// Build the bridge from configuration
    ///
    /// Opens storage and starts this run's session. The device is not
    /// opened yet; the first send connects lazily.
    ///
    /// # Errors
    ///
    /// Returns error if storage cannot be opened or the session row
    /// cannot be created - without those the bridge has nothing to do.
    pub fn new(config: &Config) -> Result<Self> {
        let storage = Storage::open(config.storage.path.as_str())?;
        let transport = DeviceTransport::new(config.serial.clone());
        Self::with_parts(storage, transport)
    }

    /// Build the bridge from already-constructed parts (test seam)
    pub fn with_parts(storage: Storage, transport: DeviceTransport) -> Result<Self> {
        let session_id = storage.start_session(Utc::now())?;
        Ok(Self {
            storage,
            transport,
            state: BridgeState::new(session_id),
            ticks: 0,
            last_sample: Instant::now(),
            last_aggregation: Instant::now(),
        })
    }

    /// Run the scheduler loop until a shutdown signal arrives
    ///
    /// On startup the device connection is attempted once and a
    /// `GET_ALL` primes the device with a full state report; failures
    /// are logged and retried lazily on the next send. On shutdown the
    /// current dispatch finishes, the session closes, and the device
    /// handle is released - no new ticks begin after the signal.
    pub async fn run(&mut self) -> Result<()> {
        if let Err(e) = self.transport.connect() {
            error!("could not connect to device at startup: {}", e);
        }
        if let Err(e) = self.transport.send_line(&Command::GetAll.encode()).await {
            warn!("initial GET_ALL failed: {}", e);
        }

        info!("bridge loop running; send SIGINT or SIGTERM to stop");
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.on_tick().await {
                        error!("error in bridge loop: {} (backing off)", e);
                        tokio::time::sleep(DISPATCH_ERROR_BACKOFF).await;
                    }
                }
                _ = &mut shutdown => {
                    info!("received shutdown signal");
                    break;
                }
            }
        }

        self.shutdown().await
    }

    /// One scheduler tick
    async fn on_tick(&mut self) -> Result<()> {
        self.ticks = self.ticks.wrapping_add(1);

        if self.ticks % CONTROL_POLL_TICKS == 0 {
            reconcile::poll(&mut self.state, &self.storage, &mut self.transport, Utc::now())
                .await?;
        }

        if self.last_sample.elapsed() >= DATA_SAMPLE_INTERVAL {
            self.last_sample = Instant::now();
            if let Err(e) = self.transport.send_line(&Command::GetSensors.encode()).await {
                warn!("sensor request failed: {}", e);
            }
        }

        if self.last_aggregation.elapsed() >= STAT_AGGREGATION_INTERVAL {
            self.last_aggregation = Instant::now();
            rollup::aggregate_daily_stats(&self.storage, Utc::now().date_naive())?;
        }

        if let Some(line) = self.transport.try_receive_line().await {
            self.dispatch(&line).await?;
        }

        Ok(())
    }

    /// Dispatch one line of device output
    ///
    /// Unparseable lines are logged and dropped; they never fail the
    /// tick.
    pub async fn dispatch(&mut self, line: &str) -> Result<()> {
        debug!("received from device: {}", line);

        let message = match protocol::parse_line(line) {
            Ok(message) => message,
            Err(e) => {
                warn!("dropping device line: {}", e);
                return Ok(());
            }
        };

        let now = Utc::now();
        match message {
            DeviceMessage::Sensors(pairs) => {
                ingest::ingest_sensors(&self.state, &self.storage, &pairs, now)?;
            }
            DeviceMessage::Status(pairs) => {
                tracker::apply_status(&mut self.state, &self.storage, &pairs, now)?;
            }
            DeviceMessage::Request(name) if name == "CONTROLS" => {
                reconcile::resend_all(&mut self.state, &self.storage, &mut self.transport, now)
                    .await?;
            }
            DeviceMessage::Request(name) => {
                warn!("unsupported device request: {:?}", name);
            }
        }

        Ok(())
    }

    /// Graceful shutdown: close the session and release the device
    pub async fn shutdown(&mut self) -> Result<()> {
        tracker::close_session(&mut self.state, &self.storage, Utc::now())?;
        self.transport.disconnect();
        info!("bridge stopped; session {} closed", self.state.session_id);
        Ok(())
    }
}

/// Wait for SIGINT (ctrl-c) or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install ctrl-c handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SerialConfig;
    use crate::transport::port_trait::mocks::MockLinePort;
    use crate::transport::LinePort;

    fn test_bridge() -> (tempfile::TempDir, Bridge, MockLinePort) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path().join("bridge.db")).unwrap();

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

        let bridge = Bridge::with_parts(storage, transport).unwrap();
        (dir, bridge, mock)
    }

    #[test]
    fn test_cadence_constants() {
        // Reconciliation polls roughly once a second
        assert_eq!(TICK_INTERVAL * CONTROL_POLL_TICKS as u32, Duration::from_secs(1));
        assert_eq!(DATA_SAMPLE_INTERVAL, Duration::from_secs(5));
        assert_eq!(STAT_AGGREGATION_INTERVAL, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_dispatch_sensors_persists_and_detects_obstacle() {
        let (_dir, mut bridge, _mock) = test_bridge();

        bridge.dispatch("SENSORS:DIST=15;LIGHT=300").await.unwrap();

        assert_eq!(bridge.storage.readings_of_type("DIST").unwrap().len(), 1);
        assert_eq!(bridge.storage.readings_of_type("LIGHT").unwrap().len(), 1);
        assert_eq!(bridge.storage.events_of_type("obstacle_detected").unwrap().len(), 1);
        assert!(bridge
            .storage
            .events_of_type("auto_headlight_suggestion")
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_survives_garbage_lines() {
        let (_dir, mut bridge, _mock) = test_bridge();

        // Nothing here may escape the dispatch step
        bridge.dispatch("").await.unwrap();
        bridge.dispatch("random debug output").await.unwrap();
        bridge.dispatch("garbage SENSORS:DIST=abc;LIGHT=50").await.unwrap();

        // The noisy sensors line still produced readings: DIST zeroed, LIGHT kept
        assert_eq!(bridge.storage.readings_of_type("DIST").unwrap()[0].value, 0.0);
        assert_eq!(bridge.storage.readings_of_type("LIGHT").unwrap()[0].value, 50.0);
    }

    #[tokio::test]
    async fn test_dispatch_status_drives_the_tracker() {
        let (_dir, mut bridge, _mock) = test_bridge();

        bridge.dispatch("STATUS:DRIVE=forward").await.unwrap();
        assert!(bridge.state.motor.is_moving());

        bridge.dispatch("STATUS:DRIVE=stop;REASON=obstacle").await.unwrap();
        assert!(!bridge.state.motor.is_moving());

        let events = bridge.storage.events_of_type("drive_state_change").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].value, "forward -> stop (obstacle)");
    }

    #[tokio::test]
    async fn test_dispatch_controls_request_resends_all_fields() {
        let (_dir, mut bridge, mock) = test_bridge();

        bridge.dispatch("REQUEST:CONTROLS").await.unwrap();

        assert_eq!(
            mock.get_written_lines(),
            vec!["DRIVE:stop\n", "STEER:center\n", "LIGHTS:off\n", "LCD:\n"]
        );
    }

    #[tokio::test]
    async fn test_dispatch_unknown_request_is_ignored() {
        let (_dir, mut bridge, mock) = test_bridge();

        bridge.dispatch("REQUEST:FIRMWARE").await.unwrap();
        assert!(mock.get_written_lines().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_closes_exactly_one_session() {
        let (_dir, mut bridge, _mock) = test_bridge();

        bridge.dispatch("STATUS:DRIVE=forward").await.unwrap();
        bridge.shutdown().await.unwrap();

        assert_eq!(bridge.storage.open_session_count().unwrap(), 0);
        let session = bridge.storage.get_session(bridge.state.session_id).unwrap().unwrap();
        assert!(session.end_time.is_some());
        // The open drive interval was credited before closing
        assert!(session.duration_seconds >= 0.0);
        assert!(!bridge.transport.is_connected());
    }

    #[tokio::test]
    async fn test_session_is_open_while_running() {
        let (_dir, bridge, _mock) = test_bridge();
        assert_eq!(bridge.storage.open_session_count().unwrap(), 1);
    }
}

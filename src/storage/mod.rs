//! # Storage Module
//!
//! SQLite persistence for control state, sensor history, the event log,
//! sessions, and daily rollups.
//!
//! A connection is opened per logical operation (poll, ingest, aggregate)
//! rather than held across the scheduler loop, which bounds idle
//! connection lifetime. Each operation is one logical transaction.
//! Timestamps are stored as RFC3339 text in UTC so calendar-day range
//! queries can compare lexicographically.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use crate::error::Result;

/// Schema, applied idempotently at startup
const SCHEMA: &str = include_str!("schema.sql");

/// Control rows seeded at startup if absent
///
/// The dashboard owns these rows afterwards; seeding never overwrites an
/// existing value.
pub const DEFAULT_CONTROLS: &[(&str, &str)] = &[
    ("drive_motor", "stop"),
    ("steering", "center"),
    ("headlights", "off"),
    ("lcd_message", ""),
];

/// One usage-metrics row per bridge process run
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
    pub distance_traveled: f64,
    pub obstacle_encounters: i64,
}

/// Daily rollup computed from readings, events, and sessions
#[derive(Debug, Clone, PartialEq)]
pub struct DailyStat {
    pub date: NaiveDate,
    pub avg_light_level: f64,
    pub avg_distance: f64,
    pub obstacle_encounters: i64,
    pub total_drive_time_seconds: f64,
    pub headlight_time_seconds: f64,
}

/// One append-only audit trail entry
#[derive(Debug, Clone, PartialEq)]
pub struct EventLogEntry {
    pub event_type: String,
    pub value: String,
    pub timestamp: DateTime<Utc>,
}

/// One append-only sensor observation
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub kind: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// SQLite-backed store shared with the dashboard
pub struct Storage {
    db_path: PathBuf,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("db_path", &self.db_path)
            .finish()
    }
}

impl Storage {
    /// Open (creating if needed) the database and apply the schema
    ///
    /// Seeds the four control rows if they do not exist, so the bridge
    /// can run against an empty database before the dashboard has
    /// written anything.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be created or the schema
    /// cannot be applied.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let db_path = path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&db_path)?;
        if let Err(e) = conn.pragma_update(None, "journal_mode", "WAL") {
            warn!("failed to enable WAL mode: {}", e);
        }
        conn.execute_batch(SCHEMA)?;

        let now = Utc::now();
        for (name, value) in DEFAULT_CONTROLS {
            conn.execute(
                "INSERT OR IGNORE INTO drone_controls (name, value, updated_at)
                 VALUES (?1, ?2, ?3)",
                params![name, value, now],
            )?;
        }

        info!("storage ready at {}", db_path.display());
        Ok(Self { db_path })
    }

    /// Open a fresh connection for one logical operation
    fn connect(&self) -> Result<Connection> {
        Ok(Connection::open(&self.db_path)?)
    }

    // --- controls ---

    /// Read the full current control set
    pub fn read_controls(&self) -> Result<HashMap<String, String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT name, value FROM drone_controls")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut controls = HashMap::new();
        for row in rows {
            let (name, value) = row?;
            controls.insert(name, value);
        }
        Ok(controls)
    }

    /// Write one control value (dashboard-style last-writer-wins update)
    pub fn set_control(&self, name: &str, value: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO drone_controls (name, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET value = ?2, updated_at = ?3",
            params![name, value, at],
        )?;
        Ok(())
    }

    // --- event log / sensor readings ---

    /// Append one event log entry
    pub fn log_event(&self, event_type: &str, value: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO event_log (type, value, timestamp) VALUES (?1, ?2, ?3)",
            params![event_type, value, at],
        )?;
        Ok(())
    }

    /// Append one sensor reading
    pub fn insert_reading(&self, kind: &str, value: f64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO sensor_readings (type, value, timestamp) VALUES (?1, ?2, ?3)",
            params![kind, value, at],
        )?;
        Ok(())
    }

    /// Commit a device-reported state transition atomically
    ///
    /// The device is authoritative for actuator state, so a transition
    /// overwrites the control row. The control update and its logged
    /// event(s) commit together or not at all.
    pub fn record_transition(
        &self,
        control_name: &str,
        control_value: &str,
        events: &[(&str, String)],
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE drone_controls SET value = ?1, updated_at = ?2 WHERE name = ?3",
            params![control_value, at, control_name],
        )?;

        for (event_type, value) in events {
            tx.execute(
                "INSERT INTO event_log (type, value, timestamp) VALUES (?1, ?2, ?3)",
                params![event_type, value, at],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Fetch all events of one type, oldest first
    pub fn events_of_type(&self, event_type: &str) -> Result<Vec<EventLogEntry>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT type, value, timestamp FROM event_log WHERE type = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![event_type], |row| {
            Ok(EventLogEntry {
                event_type: row.get(0)?,
                value: row.get(1)?,
                timestamp: row.get(2)?,
            })
        })?;
        rows.map(|r| Ok(r?)).collect()
    }

    /// Fetch all readings of one sensor type, oldest first
    pub fn readings_of_type(&self, kind: &str) -> Result<Vec<SensorReading>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT type, value, timestamp FROM sensor_readings WHERE type = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![kind], |row| {
            Ok(SensorReading {
                kind: row.get(0)?,
                value: row.get(1)?,
                timestamp: row.get(2)?,
            })
        })?;
        rows.map(|r| Ok(r?)).collect()
    }

    // --- sessions ---

    /// Open a new session, closing any stale open sessions first
    ///
    /// A crash can leave the previous run's session open; closing stale
    /// rows before inserting preserves the at-most-one-open invariant.
    ///
    /// # Returns
    ///
    /// * `Result<i64>` - The new session's row id
    pub fn start_session(&self, at: DateTime<Utc>) -> Result<i64> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        let stale = tx.execute(
            "UPDATE sessions SET end_time = ?1 WHERE end_time IS NULL",
            params![at],
        )?;
        if stale > 0 {
            warn!("closed {} stale open session(s) from a previous run", stale);
        }

        tx.execute(
            "INSERT INTO sessions (start_time, end_time, duration_seconds, distance_traveled, obstacle_encounters)
             VALUES (?1, NULL, 0, 0, 0)",
            params![at],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        info!("started session {}", id);
        Ok(id)
    }

    /// Close a session at graceful shutdown
    pub fn end_session(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE sessions SET end_time = ?1 WHERE id = ?2",
            params![at, id],
        )?;
        info!("ended session {}", id);
        Ok(())
    }

    /// Add a closed drive interval to a session's accumulators
    pub fn add_drive_interval(&self, id: i64, seconds: f64, meters: f64) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE sessions
             SET duration_seconds = duration_seconds + ?1,
                 distance_traveled = distance_traveled + ?2
             WHERE id = ?3",
            params![seconds, meters, id],
        )?;
        Ok(())
    }

    /// Count one obstacle encounter against a session
    pub fn increment_obstacles(&self, id: i64) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE sessions SET obstacle_encounters = obstacle_encounters + 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    /// Fetch one session row
    pub fn get_session(&self, id: i64) -> Result<Option<Session>> {
        let conn = self.connect()?;
        let session = conn
            .query_row(
                "SELECT id, start_time, end_time, duration_seconds, distance_traveled, obstacle_encounters
                 FROM sessions WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Session {
                        id: row.get(0)?,
                        start_time: row.get(1)?,
                        end_time: row.get(2)?,
                        duration_seconds: row.get(3)?,
                        distance_traveled: row.get(4)?,
                        obstacle_encounters: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(session)
    }

    /// Count sessions that are still open
    pub fn open_session_count(&self) -> Result<i64> {
        let conn = self.connect()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE end_time IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // --- daily rollup queries ---

    /// Average of one sensor type's readings within a calendar day
    ///
    /// Returns `None` when the day has no readings of that type.
    pub fn day_sensor_avg(&self, kind: &str, date: NaiveDate) -> Result<Option<f64>> {
        let (start, end) = day_bounds(date);
        let conn = self.connect()?;
        let avg = conn.query_row(
            "SELECT AVG(value) FROM sensor_readings
             WHERE type = ?1 AND timestamp >= ?2 AND timestamp < ?3",
            params![kind, start, end],
            |row| row.get(0),
        )?;
        Ok(avg)
    }

    /// Count of one event type within a calendar day
    pub fn day_event_count(&self, event_type: &str, date: NaiveDate) -> Result<i64> {
        let (start, end) = day_bounds(date);
        let conn = self.connect()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM event_log
             WHERE type = ?1 AND timestamp >= ?2 AND timestamp < ?3",
            params![event_type, start, end],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Values of one event type within a calendar day, oldest first
    pub fn day_event_values(&self, event_type: &str, date: NaiveDate) -> Result<Vec<String>> {
        let (start, end) = day_bounds(date);
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT value FROM event_log
             WHERE type = ?1 AND timestamp >= ?2 AND timestamp < ?3
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![event_type, start, end], |row| row.get(0))?;
        rows.map(|r| Ok(r?)).collect()
    }

    /// Total accumulated drive time of sessions started within a day
    pub fn day_drive_seconds(&self, date: NaiveDate) -> Result<f64> {
        let (start, end) = day_bounds(date);
        let conn = self.connect()?;
        let total = conn.query_row(
            "SELECT COALESCE(SUM(duration_seconds), 0) FROM sessions
             WHERE start_time >= ?1 AND start_time < ?2",
            params![start, end],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    /// Insert or update the rollup row for a day
    pub fn upsert_daily_stat(&self, stat: &DailyStat) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO daily_stats
             (date, avg_light_level, avg_distance, obstacle_encounters, total_drive_time_seconds, headlight_time_seconds)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(date) DO UPDATE SET
                 avg_light_level = ?2,
                 avg_distance = ?3,
                 obstacle_encounters = ?4,
                 total_drive_time_seconds = ?5,
                 headlight_time_seconds = ?6",
            params![
                stat.date,
                stat.avg_light_level,
                stat.avg_distance,
                stat.obstacle_encounters,
                stat.total_drive_time_seconds,
                stat.headlight_time_seconds,
            ],
        )?;
        Ok(())
    }

    /// Fetch the rollup row for a day
    pub fn daily_stat(&self, date: NaiveDate) -> Result<Option<DailyStat>> {
        let conn = self.connect()?;
        let stat = conn
            .query_row(
                "SELECT date, avg_light_level, avg_distance, obstacle_encounters, total_drive_time_seconds, headlight_time_seconds
                 FROM daily_stats WHERE date = ?1",
                params![date],
                |row| {
                    Ok(DailyStat {
                        date: row.get(0)?,
                        avg_light_level: row.get(1)?,
                        avg_distance: row.get(2)?,
                        obstacle_encounters: row.get(3)?,
                        total_drive_time_seconds: row.get(4)?,
                        headlight_time_seconds: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(stat)
    }
}

/// Lexicographic RFC3339 bounds for one UTC calendar day
fn day_bounds(date: NaiveDate) -> (String, String) {
    let next = date
        .succ_opt()
        .map(|d| d.to_string())
        .unwrap_or_else(|| "9999-12-31".to_string());
    (date.to_string(), next)
}

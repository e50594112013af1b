//! Durable append-only storage for device events and sensor samples.
//!
//! Two independent logs backed by SQLite: `usb_events` and `hw_stats`.
//! Records are keyed by an auto-incrementing id and indexed by timestamp.
//! The store's contract is append and query only; nothing updates or
//! deletes a record once written.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};
use crate::monitor::data::{BatteryHealth, DeviceEvent, DeviceEventKind, SensorSample};

/// A persisted device event together with its surrogate key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceEventRecord {
    pub id: i64,
    pub event: DeviceEvent,
}

/// A persisted sensor sample together with its surrogate key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorSampleRecord {
    pub id: i64,
    pub sample: SensorSample,
}

/// Append-only time-series store shared by both monitoring tasks.
///
/// Each append is a single SQL statement executed under an internal lock,
/// so concurrent writers cannot interleave or corrupt each other's rows.
pub struct TimeSeriesStore {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS usb_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    event_type TEXT NOT NULL,
    vendor TEXT NOT NULL,
    serial TEXT NOT NULL,
    uuid TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS hw_stats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    cpu_temp REAL NOT NULL,
    gpu_temp REAL,
    battery_level INTEGER NOT NULL,
    battery_health TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_usb_events_timestamp ON usb_events (timestamp);
CREATE INDEX IF NOT EXISTS idx_hw_stats_timestamp ON hw_stats (timestamp);
";

/// Encode a timestamp as a fixed-width, lexicographically sortable string.
fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| MonitorError::parse_error(format!("invalid timestamp '{value}': {err}")))
}

/// Wrap a domain parse failure so it can cross the rusqlite row-mapping
/// boundary without losing the message.
fn corrupt_column(err: MonitorError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            err.to_string(),
        )),
    )
}

fn read_device_event(row: &Row<'_>) -> rusqlite::Result<DeviceEventRecord> {
    let kind_str: String = row.get(2)?;
    let timestamp_str: String = row.get(1)?;
    let kind = DeviceEventKind::parse(&kind_str).ok_or_else(|| {
        corrupt_column(MonitorError::parse_error(format!(
            "unknown event type '{kind_str}'"
        )))
    })?;
    let timestamp = decode_timestamp(&timestamp_str).map_err(corrupt_column)?;
    Ok(DeviceEventRecord {
        id: row.get(0)?,
        event: DeviceEvent {
            timestamp,
            kind,
            vendor: row.get(3)?,
            serial: row.get(4)?,
            uuid: row.get(5)?,
        },
    })
}

fn read_sensor_sample(row: &Row<'_>) -> rusqlite::Result<SensorSampleRecord> {
    let timestamp_str: String = row.get(1)?;
    let health_str: String = row.get(5)?;
    let timestamp = decode_timestamp(&timestamp_str).map_err(corrupt_column)?;
    let battery_health = BatteryHealth::parse(&health_str).ok_or_else(|| {
        corrupt_column(MonitorError::parse_error(format!(
            "unknown battery health '{health_str}'"
        )))
    })?;
    let cpu_temp: f64 = row.get(2)?;
    let gpu_temp: Option<f64> = row.get(3)?;
    let battery_level: i64 = row.get(4)?;
    Ok(SensorSampleRecord {
        id: row.get(0)?,
        sample: SensorSample {
            timestamp,
            cpu_temp_c: cpu_temp as f32,
            gpu_temp_c: gpu_temp.map(|t| t as f32),
            battery_level: battery_level.clamp(0, 100) as u8,
            battery_health,
        },
    })
}

/// Build the WHERE clause and bound parameters for an optional range.
fn range_filter(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut bounds = Vec::new();
    if let Some(start) = start {
        clauses.push(format!("timestamp >= ?{}", bounds.len() + 1));
        bounds.push(encode_timestamp(&start));
    }
    if let Some(end) = end {
        clauses.push(format!("timestamp <= ?{}", bounds.len() + 1));
        bounds.push(encode_timestamp(&end));
    }
    if clauses.is_empty() {
        (String::new(), bounds)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), bounds)
    }
}

impl TimeSeriesStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
            tracing::warn!("Failed to enable WAL mode: {}", err);
        }
        Self::with_connection(conn)
    }

    /// Open an in-memory store, used by tests and ephemeral sessions.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append one device event; returns the assigned record id.
    pub fn append_device_event(&self, event: &DeviceEvent) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO usb_events (timestamp, event_type, vendor, serial, uuid)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                encode_timestamp(&event.timestamp),
                event.kind.as_str(),
                event.vendor,
                event.serial,
                event.uuid,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Append one sensor sample; returns the assigned record id.
    pub fn append_sensor_sample(&self, sample: &SensorSample) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO hw_stats (timestamp, cpu_temp, gpu_temp, battery_level, battery_health)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                encode_timestamp(&sample.timestamp),
                f64::from(sample.cpu_temp_c),
                sample.gpu_temp_c.map(f64::from),
                i64::from(sample.battery_level),
                sample.battery_health.as_str(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Query device events in a timestamp range, newest first.
    ///
    /// Bounds are inclusive on both ends; an absent bound is unbounded.
    /// Ties on timestamp preserve insertion order.
    pub fn device_events(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<DeviceEventRecord>> {
        let (filter, bounds) = range_filter(start, end);
        let sql = format!(
            "SELECT id, timestamp, event_type, vendor, serial, uuid FROM usb_events{filter}
             ORDER BY timestamp DESC, id DESC"
        );
        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(bounds), read_device_event)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Query sensor samples in a timestamp range, oldest first
    /// (chart consumption order). Bound semantics match [`Self::device_events`].
    pub fn sensor_samples(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<SensorSampleRecord>> {
        let (filter, bounds) = range_filter(start, end);
        let sql = format!(
            "SELECT id, timestamp, cpu_temp, gpu_temp, battery_level, battery_health
             FROM hw_stats{filter}
             ORDER BY timestamp ASC, id ASC"
        );
        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(bounds), read_sensor_sample)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Most recent device events, newest first, at most `limit` records.
    pub fn latest_device_events(&self, limit: usize) -> Result<Vec<DeviceEventRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_type, vendor, serial, uuid FROM usb_events
             ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], read_device_event)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// The single most recent sensor sample, if any exists.
    pub fn latest_sensor_sample(&self) -> Result<Option<SensorSampleRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, cpu_temp, gpu_temp, battery_level, battery_health
             FROM hw_stats ORDER BY timestamp DESC, id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map([], read_sensor_sample)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
impl TimeSeriesStore {
    /// Test hook for inducing and repairing storage faults.
    pub(crate) fn execute_raw(&self, sql: &str) {
        self.lock().execute_batch(sql).unwrap();
    }
}

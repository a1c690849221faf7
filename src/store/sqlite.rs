//! SQLite backend.
//!
//! The alert dedup guarantee comes from a `UNIQUE (satellite_id, field,
//! packet_timestamp)` constraint and `INSERT OR IGNORE`: zero changed rows
//! means another writer got there first. This holds across processes sharing
//! the database file, not just across threads.

use super::{now_millis, Alert, AlertSink, InsertOutcome, RecordStore, StoreError};
use crate::frame::TelemetryRecord;
use crate::health::{AlertCandidate, Field, Severity};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS telemetry (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    satellite_id       INTEGER NOT NULL,
    timestamp          INTEGER NOT NULL,
    battery_voltage_mv INTEGER NOT NULL,
    battery_temp_c     INTEGER NOT NULL,
    msi_temperature_c  INTEGER NOT NULL,
    ssr_used_mb        INTEGER NOT NULL,
    checksum_valid     INTEGER NOT NULL,
    received_at_ms     INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS telemetry_sat_ts ON telemetry (satellite_id, timestamp);

CREATE TABLE IF NOT EXISTS alerts (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    satellite_id     INTEGER NOT NULL,
    field            TEXT    NOT NULL,
    severity         TEXT    NOT NULL,
    value            INTEGER NOT NULL,
    packet_timestamp INTEGER NOT NULL,
    message          TEXT    NOT NULL,
    created_at_ms    INTEGER NOT NULL,
    active           INTEGER NOT NULL DEFAULT 1,
    UNIQUE (satellite_id, field, packet_timestamp)
);
CREATE INDEX IF NOT EXISTS alerts_sat_ts ON alerts (satellite_id, packet_timestamp);
";

const RECORD_COLUMNS: &str =
    "satellite_id, timestamp, battery_voltage_mv, battery_temp_c, msi_temperature_c, ssr_used_mb, checksum_valid";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening sqlite store");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<TelemetryRecord> {
    Ok(TelemetryRecord {
        satellite_id: row.get(0)?,
        timestamp: row.get(1)?,
        battery_voltage_mv: row.get(2)?,
        battery_temp_c: row.get(3)?,
        msi_temperature_c: row.get(4)?,
        ssr_used_mb: row.get(5)?,
        checksum_valid: row.get(6)?,
    })
}

struct AlertRow {
    satellite_id: u16,
    field: String,
    severity: String,
    value: i64,
    packet_timestamp: u32,
    message: String,
    created_at_ms: i64,
    active: bool,
}

impl AlertRow {
    fn into_alert(self) -> Result<Alert, StoreError> {
        let field = Field::from_name(&self.field)
            .ok_or_else(|| StoreError::InvalidData(format!("unknown field {}", self.field)))?;
        let severity = Severity::from_name(&self.severity)
            .ok_or_else(|| StoreError::InvalidData(format!("unknown severity {}", self.severity)))?;
        Ok(Alert {
            satellite_id: self.satellite_id,
            field,
            severity,
            value: self.value,
            packet_timestamp: self.packet_timestamp,
            message: self.message,
            created_at_ms: self.created_at_ms.max(0) as u64,
            active: self.active,
        })
    }
}

impl RecordStore for SqliteStore {
    fn insert(&self, record: &TelemetryRecord) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            &format!("INSERT INTO telemetry ({RECORD_COLUMNS}, received_at_ms) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                record.satellite_id,
                record.timestamp,
                record.battery_voltage_mv,
                record.battery_temp_c,
                record.msi_temperature_c,
                record.ssr_used_mb,
                record.checksum_valid,
                now_millis() as i64,
            ],
        )?;
        Ok(())
    }

    fn latest(&self, satellite_id: u16) -> Result<Option<TelemetryRecord>, StoreError> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM telemetry WHERE satellite_id = ?1 \
                     ORDER BY timestamp DESC, id DESC LIMIT 1"
                ),
                params![satellite_id],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn range(&self, satellite_id: u16, from: u32, to: u32) -> Result<Vec<TelemetryRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {RECORD_COLUMNS} FROM telemetry \
             WHERE satellite_id = ?1 AND timestamp >= ?2 AND timestamp <= ?3 \
             ORDER BY timestamp ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![satellite_id, from, to], record_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn record_count(&self) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM telemetry", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

impl AlertSink for SqliteStore {
    fn insert(&self, candidate: &AlertCandidate) -> Result<InsertOutcome, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO alerts \
             (satellite_id, field, severity, value, packet_timestamp, message, created_at_ms, active) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)",
            params![
                candidate.satellite_id,
                candidate.field.name(),
                candidate.severity.as_str(),
                candidate.value,
                candidate.packet_timestamp,
                candidate.message,
                now_millis() as i64,
            ],
        )?;

        if changed == 0 {
            debug!(
                satellite_id = candidate.satellite_id,
                field = %candidate.field,
                packet_timestamp = candidate.packet_timestamp,
                "duplicate alert suppressed"
            );
            return Ok(InsertOutcome::Duplicate);
        }
        Ok(InsertOutcome::Created)
    }

    fn list_active_alerts(&self, satellite_id: u16) -> Result<Vec<Alert>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT satellite_id, field, severity, value, packet_timestamp, message, created_at_ms, active \
             FROM alerts WHERE satellite_id = ?1 AND active = 1 \
             ORDER BY packet_timestamp DESC, field ASC",
        )?;
        let rows = stmt.query_map(params![satellite_id], |row| {
            Ok(AlertRow {
                satellite_id: row.get(0)?,
                field: row.get(1)?,
                severity: row.get(2)?,
                value: row.get(3)?,
                packet_timestamp: row.get(4)?,
                message: row.get(5)?,
                created_at_ms: row.get(6)?,
                active: row.get(7)?,
            })
        })?;

        let mut alerts = Vec::new();
        for row in rows {
            alerts.push(row?.into_alert()?);
        }
        Ok(alerts)
    }

    fn alert_count(&self) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

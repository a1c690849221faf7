//! Persistence contracts for decoded records and alerts.
//!
//! Two backends implement them: [`MemoryStore`] (mutex-guarded maps) and,
//! with the `sqlite` feature, [`SqliteStore`] (unique index plus
//! `INSERT OR IGNORE`). Both are `Send + Sync` so a single instance can be
//! shared between the ingest loop and query callers.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use crate::config::StoreConfig;
use crate::frame::TelemetryRecord;
use crate::health::{AlertCandidate, Field, Severity};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store lock poisoned")]
    Poisoned,
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Backend(#[from] rusqlite::Error),
    #[error("invalid stored data: {0}")]
    InvalidData(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsertOutcome {
    Created,
    Duplicate,
}

/// Dedup identity of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlertKey {
    pub satellite_id: u16,
    pub field: Field,
    pub packet_timestamp: u32,
}

impl From<&AlertCandidate> for AlertKey {
    fn from(candidate: &AlertCandidate) -> Self {
        Self {
            satellite_id: candidate.satellite_id,
            field: candidate.field,
            packet_timestamp: candidate.packet_timestamp,
        }
    }
}

/// A stored alert. No transition ever clears `active`; see DESIGN.md.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub satellite_id: u16,
    pub field: Field,
    pub severity: Severity,
    pub value: i64,
    pub packet_timestamp: u32,
    pub message: String,
    pub created_at_ms: u64,
    pub active: bool,
}

impl Alert {
    pub fn from_candidate(candidate: AlertCandidate, created_at_ms: u64) -> Self {
        Self {
            satellite_id: candidate.satellite_id,
            field: candidate.field,
            severity: candidate.severity,
            value: candidate.value,
            packet_timestamp: candidate.packet_timestamp,
            message: candidate.message,
            created_at_ms,
            active: true,
        }
    }

    pub fn key(&self) -> AlertKey {
        AlertKey {
            satellite_id: self.satellite_id,
            field: self.field,
            packet_timestamp: self.packet_timestamp,
        }
    }
}

/// Append-only record persistence.
pub trait RecordStore: Send + Sync {
    fn insert(&self, record: &TelemetryRecord) -> Result<(), StoreError>;

    /// Highest packet timestamp wins; ties go to the most recent insert.
    fn latest(&self, satellite_id: u16) -> Result<Option<TelemetryRecord>, StoreError>;

    /// Records with `from <= timestamp <= to`, ascending by timestamp.
    fn range(&self, satellite_id: u16, from: u32, to: u32) -> Result<Vec<TelemetryRecord>, StoreError>;

    fn record_count(&self) -> Result<u64, StoreError>;
}

/// Insert-if-absent alert persistence keyed on [`AlertKey`].
pub trait AlertSink: Send + Sync {
    fn insert(&self, candidate: &AlertCandidate) -> Result<InsertOutcome, StoreError>;

    /// Active alerts for a satellite, newest packet timestamp first.
    fn list_active_alerts(&self, satellite_id: u16) -> Result<Vec<Alert>, StoreError>;

    fn alert_count(&self) -> Result<u64, StoreError>;
}

/// Shared handles to one backend, seen through both contracts.
#[derive(Clone)]
pub struct StoreHandle {
    pub records: Arc<dyn RecordStore>,
    pub alerts: Arc<dyn AlertSink>,
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle").finish_non_exhaustive()
    }
}

impl StoreHandle {
    pub fn new<S>(store: Arc<S>) -> Self
    where
        S: RecordStore + AlertSink + 'static,
    {
        Self {
            records: store.clone(),
            alerts: store,
        }
    }

    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        match config {
            StoreConfig::Memory => Ok(Self::memory()),
            #[cfg(feature = "sqlite")]
            StoreConfig::Sqlite { path } => Ok(Self::new(Arc::new(SqliteStore::open(path)?))),
            #[cfg(not(feature = "sqlite"))]
            StoreConfig::Sqlite { .. } => Err(StoreError::Unavailable(
                "built without the sqlite feature".into(),
            )),
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

use super::{now_millis, Alert, AlertKey, AlertSink, InsertOutcome, RecordStore, StoreError};
use crate::frame::TelemetryRecord;
use crate::health::AlertCandidate;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use tracing::debug;

/// In-process store. Records live in per-satellite vectors kept sorted by
/// packet timestamp; alerts live in a map keyed on their identity, so
/// insert-if-absent is a single locked `entry` call.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<u16, Vec<TelemetryRecord>>>,
    alerts: Mutex<HashMap<AlertKey, Alert>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn insert(&self, record: &TelemetryRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        let history = records.entry(record.satellite_id).or_default();

        // Insert after any equal timestamps so ties keep arrival order
        let position = history.partition_point(|r| r.timestamp <= record.timestamp);
        history.insert(position, *record);
        Ok(())
    }

    fn latest(&self, satellite_id: u16) -> Result<Option<TelemetryRecord>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(records.get(&satellite_id).and_then(|h| h.last().copied()))
    }

    fn range(&self, satellite_id: u16, from: u32, to: u32) -> Result<Vec<TelemetryRecord>, StoreError> {
        if from > to {
            return Ok(Vec::new());
        }
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        let Some(history) = records.get(&satellite_id) else {
            return Ok(Vec::new());
        };

        let start = history.partition_point(|r| r.timestamp < from);
        let end = history.partition_point(|r| r.timestamp <= to);
        Ok(history[start..end].to_vec())
    }

    fn record_count(&self) -> Result<u64, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(records.values().map(|h| h.len() as u64).sum())
    }
}

impl AlertSink for MemoryStore {
    fn insert(&self, candidate: &AlertCandidate) -> Result<InsertOutcome, StoreError> {
        let mut alerts = self.alerts.lock().map_err(|_| StoreError::Poisoned)?;

        match alerts.entry(AlertKey::from(candidate)) {
            Entry::Occupied(_) => {
                debug!(
                    satellite_id = candidate.satellite_id,
                    field = %candidate.field,
                    packet_timestamp = candidate.packet_timestamp,
                    "duplicate alert suppressed"
                );
                Ok(InsertOutcome::Duplicate)
            }
            Entry::Vacant(slot) => {
                slot.insert(Alert::from_candidate(candidate.clone(), now_millis()));
                Ok(InsertOutcome::Created)
            }
        }
    }

    fn list_active_alerts(&self, satellite_id: u16) -> Result<Vec<Alert>, StoreError> {
        let alerts = self.alerts.lock().map_err(|_| StoreError::Poisoned)?;
        let mut active: Vec<Alert> = alerts
            .values()
            .filter(|a| a.satellite_id == satellite_id && a.active)
            .cloned()
            .collect();
        drop(alerts);

        active.sort_by(|a, b| {
            b.packet_timestamp
                .cmp(&a.packet_timestamp)
                .then_with(|| a.field.name().cmp(b.field.name()))
        });
        Ok(active)
    }

    fn alert_count(&self) -> Result<u64, StoreError> {
        let alerts = self.alerts.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(alerts.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{Field, Severity};

    fn record(satellite_id: u16, timestamp: u32, voltage: u16) -> TelemetryRecord {
        TelemetryRecord {
            satellite_id,
            timestamp,
            battery_voltage_mv: voltage,
            battery_temp_c: 20,
            msi_temperature_c: 30,
            ssr_used_mb: 100,
            checksum_valid: true,
        }
    }

    #[test]
    fn latest_prefers_most_recent_insert_on_tie() {
        let store = MemoryStore::new();
        RecordStore::insert(&store, &record(3, 500, 12_100)).unwrap();
        RecordStore::insert(&store, &record(3, 500, 12_200)).unwrap();
        RecordStore::insert(&store, &record(3, 400, 12_300)).unwrap();

        let latest = store.latest(3).unwrap().unwrap();
        assert_eq!(latest.timestamp, 500);
        assert_eq!(latest.battery_voltage_mv, 12_200);
    }

    #[test]
    fn inverted_range_is_empty() {
        let store = MemoryStore::new();
        RecordStore::insert(&store, &record(1, 10, 12_000)).unwrap();
        assert!(store.range(1, 20, 5).unwrap().is_empty());
        assert!(store.range(2, 0, u32::MAX).unwrap().is_empty());
    }

    #[test]
    fn active_alerts_are_per_satellite_newest_first() {
        let store = MemoryStore::new();
        for (sat, ts) in [(1, 100), (1, 300), (2, 200), (1, 200)] {
            let candidate = AlertCandidate {
                satellite_id: sat,
                field: Field::MsiTemperature,
                severity: Severity::Critical,
                value: 45,
                packet_timestamp: ts,
                message: String::new(),
            };
            AlertSink::insert(&store, &candidate).unwrap();
        }

        let alerts = store.list_active_alerts(1).unwrap();
        let stamps: Vec<u32> = alerts.iter().map(|a| a.packet_timestamp).collect();
        assert_eq!(stamps, vec![300, 200, 100]);
        assert!(alerts.iter().all(|a| a.active));
        assert_eq!(store.alert_count().unwrap(), 4);
    }
}

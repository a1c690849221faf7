use crate::frame::TelemetryRecord;
use crate::store::{RecordStore, StoreError};
use serde::{Deserialize, Serialize};

/// Inclusive packet-timestamp window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: u32,
    pub to: u32,
}

impl TimeWindow {
    pub fn new(from: u32, to: u32) -> Self {
        Self { from, to }
    }

    pub fn all() -> Self {
        Self { from: 0, to: u32::MAX }
    }

    pub fn contains(&self, timestamp: u32) -> bool {
        self.from <= timestamp && timestamp <= self.to
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub satellite_id: u16,
    pub window: TimeWindow,
    pub count: u64,
    pub avg_voltage_mv: Option<f64>,
    pub min_voltage_mv: Option<u16>,
    pub max_voltage_mv: Option<u16>,
    pub max_msi_temperature_c: Option<u8>,
    pub avg_msi_temperature_c: Option<f64>,
    pub avg_battery_temp_c: Option<f64>,
    pub max_ssr_used_mb: Option<u32>,
    pub first_timestamp: Option<u32>,
    pub last_timestamp: Option<u32>,
}

#[derive(Debug, Default)]
struct Accumulator {
    count: u64,
    voltage_sum: u64,
    msi_sum: u64,
    battery_temp_sum: i64,
    min_voltage: Option<u16>,
    max_voltage: Option<u16>,
    max_msi: Option<u8>,
    max_ssr: Option<u32>,
    first_ts: Option<u32>,
    last_ts: Option<u32>,
}

impl Accumulator {
    fn push(&mut self, record: &TelemetryRecord) {
        self.count += 1;
        self.voltage_sum += u64::from(record.battery_voltage_mv);
        self.msi_sum += u64::from(record.msi_temperature_c);
        self.battery_temp_sum += i64::from(record.battery_temp_c);
        self.min_voltage = Some(self.min_voltage.map_or(record.battery_voltage_mv, |v| v.min(record.battery_voltage_mv)));
        self.max_voltage = Some(self.max_voltage.map_or(record.battery_voltage_mv, |v| v.max(record.battery_voltage_mv)));
        self.max_msi = Some(self.max_msi.map_or(record.msi_temperature_c, |v| v.max(record.msi_temperature_c)));
        self.max_ssr = Some(self.max_ssr.map_or(record.ssr_used_mb, |v| v.max(record.ssr_used_mb)));
        self.first_ts = Some(self.first_ts.map_or(record.timestamp, |v| v.min(record.timestamp)));
        self.last_ts = Some(self.last_ts.map_or(record.timestamp, |v| v.max(record.timestamp)));
    }

    fn mean(&self, sum: f64) -> Option<f64> {
        (self.count > 0).then(|| sum / self.count as f64)
    }

    fn finish(self, satellite_id: u16, window: TimeWindow) -> StatsSummary {
        StatsSummary {
            satellite_id,
            window,
            count: self.count,
            avg_voltage_mv: self.mean(self.voltage_sum as f64),
            min_voltage_mv: self.min_voltage,
            max_voltage_mv: self.max_voltage,
            max_msi_temperature_c: self.max_msi,
            avg_msi_temperature_c: self.mean(self.msi_sum as f64),
            avg_battery_temp_c: self.mean(self.battery_temp_sum as f64),
            max_ssr_used_mb: self.max_ssr,
            first_timestamp: self.first_ts,
            last_timestamp: self.last_ts,
        }
    }
}

/// Fold records already fetched from a store. Records outside the window
/// or belonging to another satellite are skipped.
pub fn fold_records<'a, I>(satellite_id: u16, window: TimeWindow, records: I) -> StatsSummary
where
    I: IntoIterator<Item = &'a TelemetryRecord>,
{
    let mut acc = Accumulator::default();
    for record in records {
        if record.satellite_id == satellite_id && window.contains(record.timestamp) {
            acc.push(record);
        }
    }
    acc.finish(satellite_id, window)
}

/// Summary statistics over a satellite's stored history. An empty window is
/// a zero-count summary, not an error.
pub fn summarize<S>(store: &S, satellite_id: u16, window: TimeWindow) -> Result<StatsSummary, StoreError>
where
    S: RecordStore + ?Sized,
{
    let records = store.range(satellite_id, window.from, window.to)?;
    Ok(fold_records(satellite_id, window, &records))
}

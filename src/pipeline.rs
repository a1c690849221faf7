use crate::frame::{self, DecodeError, TelemetryRecord};
use crate::health::{AlertCandidate, HealthEvaluator};
use crate::store::{InsertOutcome, StoreError, StoreHandle};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const EVENT_BROADCAST_BUFFER_SIZE: usize = 256;

/// Bounded retry with exponential backoff for store writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 1000,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self.initial_backoff_ms.saturating_mul(factor).min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    Truncated,
    BadSync,
    BadLength,
    UnsupportedType,
    ChecksumMismatch,
    HexDecode,
    /// A record handed to [`Pipeline::ingest`] without a validated checksum.
    Unverified,
}

impl From<&DecodeError> for DropReason {
    fn from(err: &DecodeError) -> Self {
        match err {
            DecodeError::Truncated { .. } => DropReason::Truncated,
            DecodeError::BadSync { .. } => DropReason::BadSync,
            DecodeError::BadLength { .. } => DropReason::BadLength,
            DecodeError::UnsupportedType { .. } => DropReason::UnsupportedType,
            DecodeError::ChecksumMismatch { .. } => DropReason::ChecksumMismatch,
            DecodeError::HexDecode(_) => DropReason::HexDecode,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DropCounts {
    pub truncated: u64,
    pub bad_sync: u64,
    pub bad_length: u64,
    pub unsupported_type: u64,
    pub checksum_mismatch: u64,
    pub hex_decode: u64,
    pub unverified: u64,
}

impl DropCounts {
    pub fn total(&self) -> u64 {
        self.truncated
            + self.bad_sync
            + self.bad_length
            + self.unsupported_type
            + self.checksum_mismatch
            + self.hex_decode
            + self.unverified
    }

    pub fn get(&self, reason: DropReason) -> u64 {
        match reason {
            DropReason::Truncated => self.truncated,
            DropReason::BadSync => self.bad_sync,
            DropReason::BadLength => self.bad_length,
            DropReason::UnsupportedType => self.unsupported_type,
            DropReason::ChecksumMismatch => self.checksum_mismatch,
            DropReason::HexDecode => self.hex_decode,
            DropReason::Unverified => self.unverified,
        }
    }
}

/// Point-in-time copy of the ingest counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IngestStats {
    pub received: u64,
    /// Records that passed validation, whether or not the write succeeded.
    pub decoded: u64,
    /// Records persisted to the record store.
    pub ingested: u64,
    pub dropped: DropCounts,
    pub alerts_created: u64,
    pub alerts_duplicate: u64,
    pub record_store_failures: u64,
    pub alert_store_failures: u64,
}

#[derive(Debug, Default)]
pub struct IngestCounters {
    received: AtomicU64,
    decoded: AtomicU64,
    ingested: AtomicU64,
    dropped: [AtomicU64; 7],
    alerts_created: AtomicU64,
    alerts_duplicate: AtomicU64,
    record_store_failures: AtomicU64,
    alert_store_failures: AtomicU64,
}

impl IngestCounters {
    fn drop_slot(reason: DropReason) -> usize {
        match reason {
            DropReason::Truncated => 0,
            DropReason::BadSync => 1,
            DropReason::BadLength => 2,
            DropReason::UnsupportedType => 3,
            DropReason::ChecksumMismatch => 4,
            DropReason::HexDecode => 5,
            DropReason::Unverified => 6,
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_drop(&self, reason: DropReason) {
        Self::bump(&self.dropped[Self::drop_slot(reason)]);
    }

    pub fn snapshot(&self) -> IngestStats {
        let dropped = |reason| self.dropped[Self::drop_slot(reason)].load(Ordering::Relaxed);
        IngestStats {
            received: self.received.load(Ordering::Relaxed),
            decoded: self.decoded.load(Ordering::Relaxed),
            ingested: self.ingested.load(Ordering::Relaxed),
            dropped: DropCounts {
                truncated: dropped(DropReason::Truncated),
                bad_sync: dropped(DropReason::BadSync),
                bad_length: dropped(DropReason::BadLength),
                unsupported_type: dropped(DropReason::UnsupportedType),
                checksum_mismatch: dropped(DropReason::ChecksumMismatch),
                hex_decode: dropped(DropReason::HexDecode),
                unverified: dropped(DropReason::Unverified),
            },
            alerts_created: self.alerts_created.load(Ordering::Relaxed),
            alerts_duplicate: self.alerts_duplicate.load(Ordering::Relaxed),
            record_store_failures: self.record_store_failures.load(Ordering::Relaxed),
            alert_store_failures: self.alert_store_failures.load(Ordering::Relaxed),
        }
    }
}

/// Published for every decoded record after its writes were attempted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestEvent {
    pub record: TelemetryRecord,
    pub record_stored: bool,
    pub alerts_created: Vec<AlertCandidate>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Ingested {
        record: TelemetryRecord,
        record_stored: bool,
        alerts_created: usize,
        alerts_duplicate: usize,
    },
    Dropped(DecodeError),
    /// Record refused by [`Pipeline::ingest`] because `checksum_valid` was false.
    Rejected(TelemetryRecord),
}

/// Owns everything one datagram needs on its way from bytes to storage:
/// store handles, the rule set, the retry policy, counters and the event
/// channel. Cheap to clone; clones share stores, counters and subscribers.
#[derive(Debug, Clone)]
pub struct Pipeline {
    store: StoreHandle,
    evaluator: Arc<HealthEvaluator>,
    retry: RetryPolicy,
    counters: Arc<IngestCounters>,
    events: broadcast::Sender<IngestEvent>,
}

impl Pipeline {
    pub fn new(store: StoreHandle, evaluator: HealthEvaluator) -> Self {
        let (events, _) = broadcast::channel(EVENT_BROADCAST_BUFFER_SIZE);
        Self {
            store,
            evaluator: Arc::new(evaluator),
            retry: RetryPolicy::default(),
            counters: Arc::new(IngestCounters::default()),
            events,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn evaluator(&self) -> &HealthEvaluator {
        &self.evaluator
    }

    pub fn stats(&self) -> IngestStats {
        self.counters.snapshot()
    }

    pub(crate) fn counters(&self) -> Arc<IngestCounters> {
        Arc::clone(&self.counters)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.events.subscribe()
    }

    /// Run one datagram payload through decode, record storage, rule
    /// evaluation and alert storage, in that order. Never fails: decode
    /// errors are counted drops and exhausted store writes are logged.
    pub async fn process(&self, payload: &[u8], peer: SocketAddr) -> ProcessOutcome {
        IngestCounters::bump(&self.counters.received);

        let record = match frame::decode_datagram(payload) {
            Ok(record) => record,
            Err(e) => {
                self.counters.record_drop(DropReason::from(&e));
                warn!(%peer, reason = e.kind(), error = %e, "dropping datagram");
                return ProcessOutcome::Dropped(e);
            }
        };

        self.ingest(record).await
    }

    /// Store and evaluate an already decoded record. Records whose checksum
    /// did not validate are counted as dropped and never reach a store.
    pub async fn ingest(&self, record: TelemetryRecord) -> ProcessOutcome {
        if !record.checksum_valid {
            self.counters.record_drop(DropReason::Unverified);
            warn!(
                satellite_id = record.satellite_id,
                timestamp = record.timestamp,
                "refusing record without a validated checksum"
            );
            return ProcessOutcome::Rejected(record);
        }
        IngestCounters::bump(&self.counters.decoded);

        let record_stored = match self.retrying("record", || self.store.records.insert(&record)).await {
            Ok(()) => {
                IngestCounters::bump(&self.counters.ingested);
                true
            }
            Err(e) => {
                IngestCounters::bump(&self.counters.record_store_failures);
                error!(
                    satellite_id = record.satellite_id,
                    timestamp = record.timestamp,
                    error = %e,
                    "record dropped after retries"
                );
                false
            }
        };

        info!(
            satellite_id = record.satellite_id,
            timestamp = record.timestamp,
            battery_mv = record.battery_voltage_mv,
            msi_c = record.msi_temperature_c,
            "housekeeping frame ingested"
        );

        let mut created = Vec::new();
        let mut duplicates = 0;
        for candidate in self.evaluator.evaluate(&record) {
            match self.retrying("alert", || self.store.alerts.insert(&candidate)).await {
                Ok(InsertOutcome::Created) => {
                    IngestCounters::bump(&self.counters.alerts_created);
                    warn!(
                        satellite_id = candidate.satellite_id,
                        severity = %candidate.severity,
                        field = %candidate.field,
                        value = candidate.value,
                        "{}",
                        candidate.message
                    );
                    created.push(candidate);
                }
                Ok(InsertOutcome::Duplicate) => {
                    IngestCounters::bump(&self.counters.alerts_duplicate);
                    duplicates += 1;
                }
                Err(e) => {
                    IngestCounters::bump(&self.counters.alert_store_failures);
                    error!(
                        satellite_id = candidate.satellite_id,
                        field = %candidate.field,
                        packet_timestamp = candidate.packet_timestamp,
                        error = %e,
                        "alert dropped after retries"
                    );
                }
            }
        }

        let alerts_created = created.len();
        // No subscribers is fine
        let _ = self.events.send(IngestEvent {
            record,
            record_stored,
            alerts_created: created,
        });

        ProcessOutcome::Ingested {
            record,
            record_stored,
            alerts_created,
            alerts_duplicate: duplicates,
        }
    }

    async fn retrying<T, F>(&self, what: &'static str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Result<T, StoreError>,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    debug!(what, attempt, delay_ms = delay.as_millis() as u64, error = %e, "store write failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

use satmon::frame::{DecodeError, TelemetryRecord};
use satmon::health::{AlertCandidate, Field, Severity};
use satmon::pipeline::{DropReason, ProcessOutcome};
use satmon::store::{Alert, AlertSink, InsertOutcome, RecordStore, StoreError};
use satmon::{HealthEvaluator, Pipeline, RetryPolicy, StoreHandle};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

const REFERENCE_FRAME_HEX: &[u8] = b"1acf141000016553f1002cec142d000000643bf6";

fn peer() -> SocketAddr {
    "127.0.0.1:40000".parse().unwrap()
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff_ms: 1,
        max_backoff_ms: 2,
    }
}

/// Fails the first `failures` calls of every write, then delegates to memory.
struct FlakyStore {
    failures: u32,
    record_calls: AtomicU32,
    alert_calls: AtomicU32,
    inner: satmon::MemoryStore,
}

impl FlakyStore {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            record_calls: AtomicU32::new(0),
            alert_calls: AtomicU32::new(0),
            inner: satmon::MemoryStore::new(),
        }
    }

    fn should_fail(&self, calls: &AtomicU32) -> bool {
        calls.fetch_add(1, Ordering::SeqCst) < self.failures
    }
}

impl RecordStore for FlakyStore {
    fn insert(&self, record: &TelemetryRecord) -> Result<(), StoreError> {
        if self.should_fail(&self.record_calls) {
            return Err(StoreError::Unavailable("database is locked".into()));
        }
        RecordStore::insert(&self.inner, record)
    }

    fn latest(&self, satellite_id: u16) -> Result<Option<TelemetryRecord>, StoreError> {
        self.inner.latest(satellite_id)
    }

    fn range(&self, satellite_id: u16, from: u32, to: u32) -> Result<Vec<TelemetryRecord>, StoreError> {
        self.inner.range(satellite_id, from, to)
    }

    fn record_count(&self) -> Result<u64, StoreError> {
        self.inner.record_count()
    }
}

impl AlertSink for FlakyStore {
    fn insert(&self, candidate: &AlertCandidate) -> Result<InsertOutcome, StoreError> {
        if self.should_fail(&self.alert_calls) {
            return Err(StoreError::Unavailable("database is locked".into()));
        }
        AlertSink::insert(&self.inner, candidate)
    }

    fn list_active_alerts(&self, satellite_id: u16) -> Result<Vec<Alert>, StoreError> {
        self.inner.list_active_alerts(satellite_id)
    }

    fn alert_count(&self) -> Result<u64, StoreError> {
        self.inner.alert_count()
    }
}

#[tokio::test]
async fn test_reference_frame_end_to_end() {
    let store = StoreHandle::memory();
    let pipeline = Pipeline::new(store.clone(), HealthEvaluator::default());

    let outcome = pipeline.process(REFERENCE_FRAME_HEX, peer()).await;
    match outcome {
        ProcessOutcome::Ingested {
            record,
            record_stored,
            alerts_created,
            alerts_duplicate,
        } => {
            assert_eq!(record.satellite_id, 1);
            assert!(record_stored);
            assert_eq!(alerts_created, 2);
            assert_eq!(alerts_duplicate, 0);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    assert_eq!(store.records.record_count().unwrap(), 1);
    let latest = store.records.latest(1).unwrap().unwrap();
    assert_eq!(latest.battery_voltage_mv, 11_500);
    assert_eq!(latest.msi_temperature_c, 45);

    let alerts = store.alerts.list_active_alerts(1).unwrap();
    assert_eq!(alerts.len(), 2);
    let warning = alerts.iter().find(|a| a.field == Field::BatteryVoltage).unwrap();
    assert_eq!(warning.severity, Severity::Warning);
    assert_eq!(warning.value, 11_500);
    let critical = alerts.iter().find(|a| a.field == Field::MsiTemperature).unwrap();
    assert_eq!(critical.severity, Severity::Critical);
    assert_eq!(critical.value, 45);

    let stats = pipeline.stats();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.decoded, 1);
    assert_eq!(stats.ingested, 1);
    assert_eq!(stats.alerts_created, 2);
    assert_eq!(stats.dropped.total(), 0);
}

#[tokio::test]
async fn test_invalid_datagram_never_reaches_store() {
    let store = StoreHandle::memory();
    let pipeline = Pipeline::new(store.clone(), HealthEvaluator::default());

    let outcome = pipeline.process(b"1acf1410", peer()).await;
    assert_eq!(outcome, ProcessOutcome::Dropped(DecodeError::Truncated { len: 4 }));

    assert_eq!(store.records.record_count().unwrap(), 0);
    assert_eq!(store.alerts.alert_count().unwrap(), 0);
    assert_eq!(pipeline.stats().dropped.get(DropReason::Truncated), 1);
    assert_eq!(pipeline.stats().ingested, 0);
}

#[tokio::test]
async fn test_replayed_frame_duplicates_record_not_alerts() {
    let store = StoreHandle::memory();
    let pipeline = Pipeline::new(store.clone(), HealthEvaluator::default());

    pipeline.process(REFERENCE_FRAME_HEX, peer()).await;
    let second = pipeline.process(REFERENCE_FRAME_HEX, peer()).await;

    match second {
        ProcessOutcome::Ingested {
            alerts_created,
            alerts_duplicate,
            ..
        } => {
            assert_eq!(alerts_created, 0);
            assert_eq!(alerts_duplicate, 2);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    assert_eq!(store.records.record_count().unwrap(), 2);
    assert_eq!(store.alerts.alert_count().unwrap(), 2);

    let stats = pipeline.stats();
    assert_eq!(stats.alerts_created, 2);
    assert_eq!(stats.alerts_duplicate, 2);
}

#[tokio::test]
async fn test_drop_reasons_are_counted_separately() {
    let pipeline = Pipeline::new(StoreHandle::memory(), HealthEvaluator::default());

    let datagrams: [&[u8]; 6] = [
        b"",
        b"zz",
        b"1acf14",
        b"ffff141000016553f1002cec142d000000643bf6",
        b"1acf151000016553f1002cec142d000000643bf6",
        b"1acf141000016553f1002cec142d000000643bf7",
    ];
    for datagram in datagrams {
        assert!(matches!(
            pipeline.process(datagram, peer()).await,
            ProcessOutcome::Dropped(_)
        ));
    }
    pipeline
        .process(b"1acf142000016553f1002cec142d000000640b56", peer())
        .await;

    let dropped = pipeline.stats().dropped;
    assert_eq!(dropped.hex_decode, 2);
    assert_eq!(dropped.truncated, 1);
    assert_eq!(dropped.bad_sync, 1);
    assert_eq!(dropped.bad_length, 1);
    assert_eq!(dropped.checksum_mismatch, 1);
    assert_eq!(dropped.unsupported_type, 1);
    assert_eq!(dropped.total(), 7);
    assert_eq!(pipeline.stats().received, 7);
}

#[tokio::test]
async fn test_subscribers_see_ingest_events() {
    let pipeline = Pipeline::new(StoreHandle::memory(), HealthEvaluator::default());
    let mut events = pipeline.subscribe();

    pipeline.process(b"garbage", peer()).await;
    pipeline.process(REFERENCE_FRAME_HEX, peer()).await;

    // Dropped datagrams publish nothing, so the first event is the good frame
    let event = events.recv().await.unwrap();
    assert_eq!(event.record.satellite_id, 1);
    assert!(event.record_stored);
    let fields: Vec<Field> = event.alerts_created.iter().map(|a| a.field).collect();
    assert_eq!(fields, vec![Field::BatteryVoltage, Field::MsiTemperature]);
}

#[tokio::test]
async fn test_transient_store_failures_are_retried() {
    let flaky = Arc::new(FlakyStore::new(2));
    let pipeline = Pipeline::new(StoreHandle::new(Arc::clone(&flaky)), HealthEvaluator::default())
        .with_retry(fast_retry(3));

    let outcome = pipeline.process(REFERENCE_FRAME_HEX, peer()).await;
    assert!(matches!(
        outcome,
        ProcessOutcome::Ingested { record_stored: true, .. }
    ));

    assert_eq!(flaky.record_count().unwrap(), 1);
    assert_eq!(flaky.record_calls.load(Ordering::SeqCst), 3);

    // Failure budget is shared across alert writes: two failures, then both succeed
    assert_eq!(flaky.alert_count().unwrap(), 2);
    assert_eq!(flaky.alert_calls.load(Ordering::SeqCst), 4);

    let stats = pipeline.stats();
    assert_eq!(stats.record_store_failures, 0);
    assert_eq!(stats.alert_store_failures, 0);
}

#[tokio::test]
async fn test_exhausted_retries_drop_writes_without_panicking() {
    let broken = Arc::new(FlakyStore::new(u32::MAX));
    let pipeline = Pipeline::new(StoreHandle::new(Arc::clone(&broken)), HealthEvaluator::default())
        .with_retry(fast_retry(3));

    let outcome = pipeline.process(REFERENCE_FRAME_HEX, peer()).await;
    match outcome {
        ProcessOutcome::Ingested {
            record_stored,
            alerts_created,
            ..
        } => {
            assert!(!record_stored);
            assert_eq!(alerts_created, 0);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    assert_eq!(broken.record_calls.load(Ordering::SeqCst), 3);
    assert_eq!(broken.alert_calls.load(Ordering::SeqCst), 6);

    let stats = pipeline.stats();
    assert_eq!(stats.record_store_failures, 1);
    assert_eq!(stats.alert_store_failures, 2);
    // Decoded but never persisted
    assert_eq!(stats.decoded, 1);
    assert_eq!(stats.ingested, 0);

    // The pipeline keeps serving after failures
    let again = pipeline.process(REFERENCE_FRAME_HEX, peer()).await;
    assert!(matches!(again, ProcessOutcome::Ingested { .. }));
    assert_eq!(pipeline.stats().record_store_failures, 2);
    assert_eq!(pipeline.stats().ingested, 0);
}

#[tokio::test]
async fn test_no_retry_policy_makes_single_attempt() {
    let broken = Arc::new(FlakyStore::new(1));
    let pipeline = Pipeline::new(StoreHandle::new(Arc::clone(&broken)), HealthEvaluator::default())
        .with_retry(RetryPolicy::no_retry());

    pipeline.process(REFERENCE_FRAME_HEX, peer()).await;

    assert_eq!(broken.record_calls.load(Ordering::SeqCst), 1);
    assert_eq!(broken.record_count().unwrap(), 0);
    // First alert write fails, the second goes through
    assert_eq!(broken.alert_count().unwrap(), 1);
    assert_eq!(pipeline.stats().alert_store_failures, 1);
}

#[tokio::test]
async fn test_custom_rules_drive_alerts() {
    let evaluator = HealthEvaluator::from_rules(&[satmon::Rule::new(
        Field::SsrUsed,
        satmon::health::Predicate::AtOrAbove(100),
        Severity::Critical,
    )])
    .unwrap();
    let store = StoreHandle::memory();
    let pipeline = Pipeline::new(store.clone(), evaluator);

    pipeline.process(REFERENCE_FRAME_HEX, peer()).await;

    let alerts = store.alerts.list_active_alerts(1).unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].field, Field::SsrUsed);
    assert_eq!(alerts[0].value, 100);
}

#[tokio::test]
async fn test_unverified_record_never_reaches_stores() {
    let store = StoreHandle::memory();
    let pipeline = Pipeline::new(store.clone(), HealthEvaluator::default());
    let mut events = pipeline.subscribe();

    let forged = TelemetryRecord {
        satellite_id: 9,
        timestamp: 1_700_000_900,
        battery_voltage_mv: 10_000,
        battery_temp_c: 0,
        msi_temperature_c: 99,
        ssr_used_mb: 0,
        checksum_valid: false,
    };

    let outcome = pipeline.ingest(forged).await;
    assert_eq!(outcome, ProcessOutcome::Rejected(forged));

    assert_eq!(store.records.latest(9).unwrap(), None);
    assert_eq!(store.records.record_count().unwrap(), 0);
    assert_eq!(store.alerts.alert_count().unwrap(), 0);
    assert!(events.try_recv().is_err());

    let stats = pipeline.stats();
    assert_eq!(stats.dropped.get(DropReason::Unverified), 1);
    assert_eq!(stats.decoded, 0);
    assert_eq!(stats.ingested, 0);
    assert_eq!(stats.alerts_created, 0);

    // The same values with a validated checksum go through
    let verified = TelemetryRecord { checksum_valid: true, ..forged };
    assert!(matches!(
        pipeline.ingest(verified).await,
        ProcessOutcome::Ingested { record_stored: true, alerts_created: 2, .. }
    ));
    assert_eq!(store.records.record_count().unwrap(), 1);
}

#[tokio::test]
async fn test_frame_with_trailing_bytes_is_dropped() {
    let store = StoreHandle::memory();
    let pipeline = Pipeline::new(store.clone(), HealthEvaluator::default());

    let outcome = pipeline
        .process(b"1acf141000016553f1002cec142d000000643bf6ff", peer())
        .await;
    assert_eq!(
        outcome,
        ProcessOutcome::Dropped(DecodeError::BadLength { declared: 20, len: 21 })
    );
    assert_eq!(pipeline.stats().dropped.bad_length, 1);
    assert_eq!(store.records.record_count().unwrap(), 0);
}

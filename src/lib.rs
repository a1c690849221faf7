//! # Satellite Housekeeping Monitor
//!
//! Ingestion core for periodic satellite housekeeping reports: receives
//! hex-encoded frames over UDP, validates and decodes them, evaluates health
//! thresholds, and persists records and deduplicated alerts for later query.
//!
//! ## Features
//!
//! - **Frame codec**: 20-byte housekeeping frame with sync, length, type and CRC-16 checks
//! - **UDP ingestion**: single receive loop with graceful shutdown and drop accounting
//! - **Health rules**: data-driven threshold rules with WARNING/CRITICAL severities
//! - **Alert dedup**: exactly one alert per (satellite, field, packet timestamp)
//! - **Storage**: in-memory or SQLite backends behind the same contracts
//! - **Statistics**: per-satellite voltage/temperature summaries over a time window
//!
//! ## Quick Start
//!
//! ```rust
//! use satmon::{AlertSink, HealthEvaluator, Pipeline, RecordStore, StoreHandle};
//!
//! let rt = tokio::runtime::Runtime::new().unwrap();
//! rt.block_on(async {
//!     let store = StoreHandle::memory();
//!     let pipeline = Pipeline::new(store.clone(), HealthEvaluator::default());
//!
//!     let datagram = b"1acf141000016553f1002cec142d000000643bf6";
//!     pipeline.process(datagram, "127.0.0.1:9000".parse().unwrap()).await;
//!
//!     assert_eq!(store.records.record_count().unwrap(), 1);
//!     assert_eq!(store.alerts.list_active_alerts(1).unwrap().len(), 2);
//! });
//! ```
//!
//! ## Architecture
//!
//! - [`frame`] - Wire format, CRC-16 and hex transport decoding
//! - [`health`] - Threshold rules and alert candidates
//! - [`store`] - Record and alert persistence contracts and backends
//! - [`stats`] - Summary statistics over stored records
//! - [`pipeline`] - Per-datagram processing context, retry policy and counters
//! - [`ingest`] - UDP listener and shutdown handling
//! - [`config`] - JSON configuration

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod config;
pub mod frame;
pub mod health;
pub mod ingest;
pub mod pipeline;
pub mod stats;
pub mod store;

// Re-export main public types for convenience
pub use config::Config;
pub use frame::{DecodeError, TelemetryRecord};
pub use health::{AlertCandidate, HealthEvaluator, Rule, Severity};
pub use ingest::{IngestListener, ShutdownHandle};
pub use pipeline::{IngestStats, Pipeline, RetryPolicy};
pub use stats::{summarize, StatsSummary, TimeWindow};
pub use store::{Alert, AlertSink, InsertOutcome, MemoryStore, RecordStore, StoreHandle};

use crate::health::{default_rules, HealthEvaluator, Rule, MAX_RULES};
use crate::pipeline::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_BIND: &str = "0.0.0.0:5005";
// Hex text of a 20-byte frame is 40 chars; leave room for whitespace and prefixes
pub const DEFAULT_MAX_DATAGRAM_BYTES: usize = 512;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub bind: SocketAddr,
    pub max_datagram_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 5005)),
            max_datagram_bytes: DEFAULT_MAX_DATAGRAM_BYTES,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    #[default]
    Memory,
    Sqlite { path: PathBuf },
}

/// Everything the ingest core consumes from outside. Every field has a
/// default, so an empty JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listener: ListenerConfig,
    pub rules: Vec<Rule>,
    pub store: StoreConfig,
    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            rules: default_rules().to_vec(),
            store: StoreConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rules.len() > MAX_RULES {
            return Err(ConfigError::Invalid(format!(
                "{} rules configured, limit is {}",
                self.rules.len(),
                MAX_RULES
            )));
        }
        if self.listener.max_datagram_bytes == 0 {
            return Err(ConfigError::Invalid("listener.max_datagram_bytes must be > 0".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be >= 1".into()));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "retry.initial_backoff_ms exceeds retry.max_backoff_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn evaluator(&self) -> Result<HealthEvaluator, ConfigError> {
        HealthEvaluator::from_rules(&self.rules).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{Field, Predicate, Severity};

    #[test]
    fn empty_object_gives_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.listener.bind.to_string(), DEFAULT_BIND);
        assert_eq!(config.rules.len(), 2);
    }

    #[test]
    fn sqlite_backend_and_custom_rules() {
        let config = Config::from_json(
            r#"{
                "listener": {"bind": "127.0.0.1:6000"},
                "store": {"backend": "sqlite", "path": "/var/lib/satmon/telemetry.db"},
                "rules": [
                    {"field": "ssr_used", "predicate": {"op": "at_or_above", "threshold": 4096}, "severity": "WARNING"}
                ],
                "retry": {"max_attempts": 5, "initial_backoff_ms": 10, "max_backoff_ms": 100}
            }"#,
        )
        .unwrap();

        assert_eq!(config.listener.bind.port(), 6000);
        assert_eq!(config.listener.max_datagram_bytes, DEFAULT_MAX_DATAGRAM_BYTES);
        assert_eq!(
            config.store,
            StoreConfig::Sqlite { path: PathBuf::from("/var/lib/satmon/telemetry.db") }
        );
        assert_eq!(
            config.rules,
            vec![Rule::new(Field::SsrUsed, Predicate::AtOrAbove(4096), Severity::Warning)]
        );
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn rejects_bad_retry_bounds() {
        let err = Config::from_json(r#"{"retry": {"max_attempts": 0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = Config::from_json(
            r#"{"retry": {"max_attempts": 2, "initial_backoff_ms": 500, "max_backoff_ms": 100}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_field_name() {
        let err = Config::from_json(
            r#"{"rules": [{"field": "altitude", "predicate": {"op": "below", "threshold": 1}, "severity": "WARNING"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}

use crate::frame::TelemetryRecord;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_RULES: usize = 16;

// Default thresholds
const BATTERY_VOLTAGE_LOW_MV: i64 = 12_000;
const MSI_TEMPERATURE_HIGH_C: i64 = 40;

pub type RuleSet = Vec<Rule, MAX_RULES>;
pub type AlertCandidates = Vec<AlertCandidate, MAX_RULES>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "WARNING" => Some(Severity::Warning),
            "CRITICAL" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl core::fmt::Display for Severity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Telemetry field a rule can watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    BatteryVoltage,
    BatteryTemp,
    MsiTemperature,
    SsrUsed,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::BatteryVoltage => "battery_voltage",
            Field::BatteryTemp => "battery_temp",
            Field::MsiTemperature => "msi_temperature",
            Field::SsrUsed => "ssr_used",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Field::BatteryVoltage => "mV",
            Field::BatteryTemp | Field::MsiTemperature => "°C",
            Field::SsrUsed => "MB",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "battery_voltage" => Some(Field::BatteryVoltage),
            "battery_temp" => Some(Field::BatteryTemp),
            "msi_temperature" => Some(Field::MsiTemperature),
            "ssr_used" => Some(Field::SsrUsed),
            _ => None,
        }
    }

    pub fn read(self, record: &TelemetryRecord) -> i64 {
        match self {
            Field::BatteryVoltage => i64::from(record.battery_voltage_mv),
            Field::BatteryTemp => i64::from(record.battery_temp_c),
            Field::MsiTemperature => i64::from(record.msi_temperature_c),
            Field::SsrUsed => i64::from(record.ssr_used_mb),
        }
    }
}

impl core::fmt::Display for Field {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "threshold", rename_all = "snake_case")]
pub enum Predicate {
    Below(i64),
    Above(i64),
    AtOrBelow(i64),
    AtOrAbove(i64),
}

impl Predicate {
    pub fn matches(self, value: i64) -> bool {
        match self {
            Predicate::Below(t) => value < t,
            Predicate::Above(t) => value > t,
            Predicate::AtOrBelow(t) => value <= t,
            Predicate::AtOrAbove(t) => value >= t,
        }
    }

    fn describe(self) -> (&'static str, i64) {
        match self {
            Predicate::Below(t) => ("below", t),
            Predicate::Above(t) => ("above", t),
            Predicate::AtOrBelow(t) => ("at or below", t),
            Predicate::AtOrAbove(t) => ("at or above", t),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub field: Field,
    pub predicate: Predicate,
    pub severity: Severity,
}

impl Rule {
    pub fn new(field: Field, predicate: Predicate, severity: Severity) -> Self {
        Self { field, predicate, severity }
    }

    fn message(&self, value: i64) -> String {
        let (relation, threshold) = self.predicate.describe();
        let unit = self.field.unit();
        format!(
            "{} {}: {} {} is {} the {} {} threshold",
            self.field, self.severity, value, unit, relation, threshold, unit
        )
    }
}

/// An alert the evaluator wants persisted. Identity is
/// (`satellite_id`, `field`, `packet_timestamp`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertCandidate {
    pub satellite_id: u16,
    pub field: Field,
    pub severity: Severity,
    pub value: i64,
    pub packet_timestamp: u32,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("too many rules (limit is {})", MAX_RULES)]
    TooMany,
}

pub fn default_rules() -> RuleSet {
    let mut rules = RuleSet::new();
    let _ = rules.push(Rule::new(
        Field::BatteryVoltage,
        Predicate::Below(BATTERY_VOLTAGE_LOW_MV),
        Severity::Warning,
    ));
    let _ = rules.push(Rule::new(
        Field::MsiTemperature,
        Predicate::Above(MSI_TEMPERATURE_HIGH_C),
        Severity::Critical,
    ));
    rules
}

/// Applies an ordered list of threshold rules to decoded records.
#[derive(Debug, Clone)]
pub struct HealthEvaluator {
    rules: RuleSet,
}

impl Default for HealthEvaluator {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl HealthEvaluator {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    pub fn from_rules(rules: &[Rule]) -> Result<Self, RuleError> {
        let rules = RuleSet::from_slice(rules).map_err(|_| RuleError::TooMany)?;
        Ok(Self::new(rules))
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn add_rule(&mut self, rule: Rule) -> Result<(), RuleError> {
        self.rules.push(rule).map_err(|_| RuleError::TooMany)
    }

    /// Check every rule independently; candidates come back in rule order.
    pub fn evaluate(&self, record: &TelemetryRecord) -> AlertCandidates {
        let mut alerts = AlertCandidates::new();

        for rule in &self.rules {
            let value = rule.field.read(record);
            if !rule.predicate.matches(value) {
                continue;
            }
            // Capacity equals MAX_RULES, so this never overflows
            let _ = alerts.push(AlertCandidate {
                satellite_id: record.satellite_id,
                field: rule.field,
                severity: rule.severity,
                value,
                packet_timestamp: record.timestamp,
                message: rule.message(value),
            });
        }

        alerts
    }
}

//! Engine configuration
//!
//! Thresholds, window shapes and the tracked signal list. Every field has a
//! default, so a config file only needs to name what it overrides.

use crate::baseline::{ANOMALY_THRESHOLD, STABLE_THRESHOLD};
use crate::error::BaselineError;
use crate::types::{SignalSpec, Thresholds};
use crate::window::WindowSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Default look-back for baseline-relative flag rules (days)
pub const DEFAULT_FLAG_HISTORY_DAYS: u32 = 7;

/// Where anomaly reports take their baseline from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineMode {
    /// Recompute mean/std from the rolling window on every request
    #[default]
    Rolling,
    /// Use the last calibrated snapshot held by the metric source
    Stored,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// |z| at or above which a signal is flagged
    pub anomaly_threshold: f64,
    /// |z| below which every signal must sit to suggest recalibration
    pub stable_threshold: f64,
    /// Window for anomaly reports in rolling mode and for calibration
    pub anomaly_window: WindowSpec,
    /// Window for metric snapshots
    pub snapshot_window: WindowSpec,
    /// Window for feature context
    pub context_window: WindowSpec,
    pub baseline_mode: BaselineMode,
    /// Days of history behind baseline-relative flag rules
    pub flag_history_days: u32,
    /// Signals evaluated by anomaly reports, in presentation order
    pub signals: Vec<SignalSpec>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            anomaly_threshold: ANOMALY_THRESHOLD,
            stable_threshold: STABLE_THRESHOLD,
            anomaly_window: WindowSpec::new(28, 1),
            snapshot_window: WindowSpec::new(28, 2),
            context_window: WindowSpec::new(30, 1),
            baseline_mode: BaselineMode::Rolling,
            flag_history_days: DEFAULT_FLAG_HISTORY_DAYS,
            signals: SignalSpec::default_set(),
        }
    }
}

impl EngineConfig {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self, BaselineError> {
        let json = fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse config from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize config to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            anomaly_z: self.anomaly_threshold,
            stable_z: self.stable_threshold,
        }
    }

    /// Configured signal by name
    pub fn signal(&self, name: &str) -> Result<&SignalSpec, BaselineError> {
        self.signals
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| BaselineError::UnknownSignal(name.to_string()))
    }

    /// Check that thresholds, windows and signals are usable
    pub fn validate(&self) -> Result<(), BaselineError> {
        for (name, value) in [
            ("anomaly_threshold", self.anomaly_threshold),
            ("stable_threshold", self.stable_threshold),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(BaselineError::InvalidConfig(format!(
                    "{name} must be a positive number, got {value}"
                )));
            }
        }

        if self.stable_threshold >= self.anomaly_threshold {
            return Err(BaselineError::InvalidConfig(format!(
                "stable_threshold ({}) must be below anomaly_threshold ({})",
                self.stable_threshold, self.anomaly_threshold
            )));
        }

        for (name, window) in [
            ("anomaly_window", &self.anomaly_window),
            ("snapshot_window", &self.snapshot_window),
            ("context_window", &self.context_window),
        ] {
            if window.length_days == 0 {
                return Err(BaselineError::InvalidConfig(format!(
                    "{name}.length_days must be at least 1"
                )));
            }
            // a zero gap would let the anchor day feed its own baseline
            if window.gap_days == 0 {
                return Err(BaselineError::InvalidConfig(format!(
                    "{name}.gap_days must be at least 1"
                )));
            }
        }

        if self.flag_history_days == 0 {
            return Err(BaselineError::InvalidConfig(
                "flag_history_days must be at least 1".to_string(),
            ));
        }

        if self.signals.is_empty() {
            return Err(BaselineError::InvalidConfig(
                "at least one signal must be configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for spec in &self.signals {
            if !seen.insert(spec.name.as_str()) {
                return Err(BaselineError::InvalidConfig(format!(
                    "duplicate signal name: {}",
                    spec.name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MetricColumn;

    #[test]
    fn test_default_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.thresholds().anomaly_z, 2.0);
        assert_eq!(config.thresholds().stable_z, 0.5);
        assert_eq!(config.signals.len(), 4);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(
            r#"{"anomaly_threshold": 3.0, "baseline_mode": "stored", "snapshot_window": {"length_days": 14, "gap_days": 1}}"#,
        )
        .unwrap();

        assert_eq!(config.anomaly_threshold, 3.0);
        assert_eq!(config.stable_threshold, 0.5);
        assert_eq!(config.baseline_mode, BaselineMode::Stored);
        assert_eq!(config.snapshot_window, WindowSpec::new(14, 1));
        assert_eq!(config.context_window, WindowSpec::new(30, 1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_custom_signals() {
        let config = EngineConfig::from_json(
            r#"{"signals": [{"name": "hr", "column": "hr_avg"}, {"name": "rhr", "column": "rhr"}]}"#,
        )
        .unwrap();
        assert_eq!(config.signals[0], SignalSpec::new("hr", MetricColumn::HrAvg));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.stable_threshold = 2.5;
        assert!(matches!(config.validate(), Err(BaselineError::InvalidConfig(_))));

        let mut config = EngineConfig::default();
        config.anomaly_threshold = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.context_window.gap_days = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.signals.push(SignalSpec::new("rhr", MetricColumn::HrAvg));
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.signals.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_signal_lookup() {
        let config = EngineConfig::default();
        assert_eq!(config.signal("sleep").unwrap().column, MetricColumn::SleepMinutes);
        assert!(matches!(
            config.signal("spo2"),
            Err(BaselineError::UnknownSignal(_))
        ));
    }

    #[test]
    fn test_unknown_column_rejected_at_parse() {
        let result = EngineConfig::from_json(r#"{"signals": [{"name": "o2", "column": "spo2"}]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let config = EngineConfig::default();
        let loaded = EngineConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(loaded, config);
    }
}

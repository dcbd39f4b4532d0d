//! Core types for the baseline engine
//!
//! This module defines the data structures that flow through the engine: typed
//! daily metric rows, per-signal specifications, baseline statistics and the
//! per-signal anomaly results handed back to callers.

use crate::error::BaselineError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Physical metric column of a daily row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricColumn {
    /// Resting heart rate (bpm)
    Rhr,
    /// Average heart rate variability (ms)
    HrvAvg,
    /// Total sleep (minutes)
    SleepMinutes,
    /// Step count
    Steps,
    /// Average daytime heart rate (bpm)
    HrAvg,
}

impl MetricColumn {
    /// Every column, in storage order
    pub const ALL: [MetricColumn; 5] = [
        MetricColumn::Steps,
        MetricColumn::SleepMinutes,
        MetricColumn::HrAvg,
        MetricColumn::HrvAvg,
        MetricColumn::Rhr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricColumn::Rhr => "rhr",
            MetricColumn::HrvAvg => "hrv_avg",
            MetricColumn::SleepMinutes => "sleep_minutes",
            MetricColumn::Steps => "steps",
            MetricColumn::HrAvg => "hr_avg",
        }
    }
}

impl fmt::Display for MetricColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricColumn {
    type Err = BaselineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "rhr" => Ok(MetricColumn::Rhr),
            "hrv_avg" => Ok(MetricColumn::HrvAvg),
            "sleep_minutes" => Ok(MetricColumn::SleepMinutes),
            "steps" => Ok(MetricColumn::Steps),
            "hr_avg" => Ok(MetricColumn::HrAvg),
            other => Err(BaselineError::UnknownColumn(other.to_string())),
        }
    }
}

/// One user's metrics for a single day.
///
/// Every metric is optional: a missing device sync leaves the column empty and
/// it must stay empty rather than read as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    /// Calendar day this row represents
    pub day: NaiveDate,
    #[serde(default)]
    pub rhr: Option<f64>,
    #[serde(default)]
    pub hrv_avg: Option<f64>,
    #[serde(default)]
    pub sleep_minutes: Option<f64>,
    #[serde(default)]
    pub steps: Option<f64>,
    #[serde(default)]
    pub hr_avg: Option<f64>,
}

impl MetricRow {
    /// Create an empty row for a day
    pub fn empty(day: NaiveDate) -> Self {
        Self {
            day,
            rhr: None,
            hrv_avg: None,
            sleep_minutes: None,
            steps: None,
            hr_avg: None,
        }
    }

    /// Finite value of a column, if present
    pub fn value(&self, column: MetricColumn) -> Option<f64> {
        let raw = match column {
            MetricColumn::Rhr => self.rhr,
            MetricColumn::HrvAvg => self.hrv_avg,
            MetricColumn::SleepMinutes => self.sleep_minutes,
            MetricColumn::Steps => self.steps,
            MetricColumn::HrAvg => self.hr_avg,
        };
        raw.filter(|v| v.is_finite())
    }

    /// Set a column value
    pub fn set(&mut self, column: MetricColumn, value: Option<f64>) {
        let slot = match column {
            MetricColumn::Rhr => &mut self.rhr,
            MetricColumn::HrvAvg => &mut self.hrv_avg,
            MetricColumn::SleepMinutes => &mut self.sleep_minutes,
            MetricColumn::Steps => &mut self.steps,
            MetricColumn::HrAvg => &mut self.hr_avg,
        };
        *slot = value;
    }

    /// Overwrite columns that are present in `other`, keeping the rest
    pub fn merge(&mut self, other: &MetricRow) {
        for column in MetricColumn::ALL {
            if let Some(v) = other.value(column) {
                self.set(column, Some(v));
            }
        }
    }

    /// Project one column into a sample
    pub fn sample(&self, column: MetricColumn) -> MetricSample {
        MetricSample {
            day: self.day,
            value: self.value(column),
        }
    }
}

/// A single day's observation of one signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub day: NaiveDate,
    pub value: Option<f64>,
}

/// Mapping of a logical signal name to a physical column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSpec {
    /// Logical name used in reports (e.g. "hrv")
    pub name: String,
    /// Column the values are read from (e.g. `hrv_avg`)
    pub column: MetricColumn,
}

impl SignalSpec {
    pub fn new(name: impl Into<String>, column: MetricColumn) -> Self {
        Self {
            name: name.into(),
            column,
        }
    }

    /// Default tracked signals in presentation order
    pub fn default_set() -> Vec<SignalSpec> {
        vec![
            SignalSpec::new("rhr", MetricColumn::Rhr),
            SignalSpec::new("hrv", MetricColumn::HrvAvg),
            SignalSpec::new("sleep", MetricColumn::SleepMinutes),
            SignalSpec::new("steps", MetricColumn::Steps),
        ]
    }
}

/// Descriptive statistics over a baseline window
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BaselineStats {
    /// Arithmetic mean, `None` when no samples
    pub mean: Option<f64>,
    /// Sample standard deviation, `None` when fewer than two samples
    pub std: Option<f64>,
    /// Number of finite samples used
    pub n: usize,
}

/// Why a result carries `None` fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    /// No value for the anchor day
    MissingToday,
    /// Fewer than two samples in the baseline window
    InsufficientHistory,
    /// Baseline window has no variance
    DegenerateBaseline,
}

/// Per-signal anomaly evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub signal: String,
    pub column: MetricColumn,
    pub today: Option<f64>,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub z: Option<f64>,
    pub flag: bool,
    /// Samples behind `mean`/`std`
    pub n: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quality: Vec<QualityFlag>,
}

/// Thresholds echoed back with every anomaly report
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub anomaly_z: f64,
    pub stable_z: f64,
}

/// Anomaly report for one user and anchor day
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub user: String,
    pub day: NaiveDate,
    pub items: Vec<AnomalyResult>,
    pub thresholds: Thresholds,
    pub suggest_recalibration: bool,
}

/// A calibrated baseline for one signal, as persisted between runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredBaseline {
    pub signal: String,
    pub column: MetricColumn,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub n: usize,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
}

impl StoredBaseline {
    pub fn stats(&self) -> BaselineStats {
        BaselineStats {
            mean: self.mean,
            std: self.std,
            n: self.n,
        }
    }
}

/// A full calibration run for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSnapshot {
    /// Version identifier of this calibration
    pub id: String,
    pub user: String,
    pub anchor: NaiveDate,
    pub computed_at: DateTime<Utc>,
    pub baselines: Vec<StoredBaseline>,
}

impl BaselineSnapshot {
    /// Stored baseline for a signal name
    pub fn get(&self, signal: &str) -> Option<&StoredBaseline> {
        self.baselines.iter().find(|b| b.signal == signal)
    }

    /// Load a snapshot from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize the snapshot to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_column_round_trip_names() {
        for column in MetricColumn::ALL {
            assert_eq!(column.as_str().parse::<MetricColumn>().unwrap(), column);
        }
        assert!(matches!(
            "spo2".parse::<MetricColumn>(),
            Err(BaselineError::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_row_missing_columns_deserialize_as_none() {
        let row: MetricRow = serde_json::from_str(r#"{"day": "2024-03-05", "rhr": 58}"#).unwrap();
        assert_eq!(row.day, day(5));
        assert_eq!(row.value(MetricColumn::Rhr), Some(58.0));
        assert_eq!(row.value(MetricColumn::Steps), None);

        let row: MetricRow =
            serde_json::from_str(r#"{"day": "2024-03-05", "steps": null}"#).unwrap();
        assert_eq!(row.value(MetricColumn::Steps), None);
    }

    #[test]
    fn test_non_finite_values_are_absent() {
        let mut row = MetricRow::empty(day(1));
        row.set(MetricColumn::HrvAvg, Some(f64::NAN));
        assert_eq!(row.value(MetricColumn::HrvAvg), None);
        assert_eq!(row.sample(MetricColumn::HrvAvg).value, None);
    }

    #[test]
    fn test_merge_keeps_existing_columns() {
        let mut row = MetricRow::empty(day(2));
        row.rhr = Some(60.0);
        row.steps = Some(4000.0);

        let mut update = MetricRow::empty(day(2));
        update.steps = Some(9000.0);
        update.hrv_avg = Some(48.5);

        row.merge(&update);
        assert_eq!(row.rhr, Some(60.0));
        assert_eq!(row.steps, Some(9000.0));
        assert_eq!(row.hrv_avg, Some(48.5));
    }

    #[test]
    fn test_snapshot_lookup_and_serialization() {
        let snapshot = BaselineSnapshot {
            id: "v1".to_string(),
            user: "u1".to_string(),
            anchor: day(20),
            computed_at: Utc::now(),
            baselines: vec![StoredBaseline {
                signal: "hrv".to_string(),
                column: MetricColumn::HrvAvg,
                mean: Some(52.0),
                std: Some(4.0),
                n: 28,
                window_start: day(1),
                window_end: day(18),
            }],
        };

        let loaded = BaselineSnapshot::from_json(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.get("hrv").unwrap().stats().mean, Some(52.0));
        assert!(loaded.get("rhr").is_none());
    }
}

//! Request-level operations
//!
//! This module provides the public API callers use. Each operation is a thin
//! adapter: resolve the anchor day, fetch rows from the [`MetricSource`], hand
//! them to the baseline engine and shape the result.
//!
//! Operations:
//! 1. `anomaly_report` - per-signal z-scores, flags and a recalibration hint
//! 2. `metric_snapshot` - today vs. baseline for every explanation feature
//! 3. `feature_context` - today vs. baseline with labels and direction
//! 4. `trend` - recent daily series for explanation features
//! 5. `calibrate` - baselines worth persisting for later `stored` reports
//! 6. `flags_for_day` - absolute and baseline-relative health flags

use crate::baseline::{calibrate, compute_baseline, compute_z, suggest_recalibration, BaselineEngine};
use crate::config::{BaselineMode, EngineConfig};
use crate::error::BaselineError;
use crate::features::{delta, resolve_feature, Direction, MetricMeta, FEATURE_ALIASES};
use crate::flags::{absolute_flags, baseline_flags, Flag};
use crate::source::MetricSource;
use crate::types::{
    AnomalyReport, BaselineSnapshot, BaselineStats, MetricColumn, MetricRow, MetricSample,
};
use crate::window::{BaselineWindow, WindowSpec};
use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Columns described by feature context, in display order
const CONTEXT_COLUMNS: [MetricColumn; 4] = [
    MetricColumn::Rhr,
    MetricColumn::HrvAvg,
    MetricColumn::SleepMinutes,
    MetricColumn::Steps,
];

/// Bounds for trend requests (days)
pub const MIN_TREND_DAYS: u32 = 3;
pub const MAX_TREND_DAYS: u32 = 90;

/// Today vs. baseline for one explanation feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotItem {
    pub unit: String,
    pub today: Option<f64>,
    pub baseline: Option<f64>,
    pub delta: Option<f64>,
    pub z: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub user: String,
    pub day: NaiveDate,
    pub items: BTreeMap<String, SnapshotItem>,
}

/// One metric in a feature context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub metric: MetricColumn,
    pub today_value: Option<f64>,
    pub baseline_mean: Option<f64>,
    pub baseline_sd: Option<f64>,
    pub z_score: Option<f64>,
    pub display: String,
    pub unit: String,
    pub pop_low: Option<f64>,
    pub pop_high: Option<f64>,
    pub guideline: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureContext {
    pub user: String,
    pub day: NaiveDate,
    pub context: Vec<ContextEntry>,
}

/// Daily values of one feature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSeries {
    pub feature: String,
    pub series: Vec<MetricSample>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricTrend {
    pub user: String,
    pub days: u32,
    pub end: NaiveDate,
    pub features: Vec<FeatureSeries>,
}

/// Baseline operations over a borrowed metric source.
///
/// The source is constructed once by the caller and shared by reference; the
/// service holds no state of its own beyond the configuration.
pub struct BaselineService<'a, S: MetricSource + ?Sized> {
    source: &'a S,
    config: &'a EngineConfig,
    engine: BaselineEngine,
}

impl<'a, S: MetricSource + ?Sized> BaselineService<'a, S> {
    pub fn new(source: &'a S, config: &'a EngineConfig) -> Self {
        Self {
            source,
            config,
            engine: BaselineEngine::new(config.anomaly_threshold),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        self.config
    }

    /// Evaluate configured signals on the anchor day.
    ///
    /// The anchor is `day` if given, else the user's latest row; the evaluated
    /// row is the most recent one on or before the anchor.
    pub fn anomaly_report(
        &self,
        user: &str,
        day: Option<NaiveDate>,
    ) -> Result<AnomalyReport, BaselineError> {
        let anchor = self.resolve_anchor(user, day)?;
        let today = self
            .source
            .row_on_or_before(user, anchor)?
            .ok_or_else(|| BaselineError::NoRowForDay {
                user: user.to_string(),
                day: anchor,
            })?;

        let items = match self.config.baseline_mode {
            BaselineMode::Rolling => {
                let window = self.load_window(user, &self.config.anomaly_window, today.day)?;
                self.engine
                    .evaluate_signals(&self.config.signals, &today, window.rows())
            }
            BaselineMode::Stored => {
                let stored: HashMap<String, BaselineStats> = self
                    .source
                    .stored_baselines(user)?
                    .into_iter()
                    .map(|b| (b.signal.clone(), b.stats()))
                    .collect();
                for spec in &self.config.signals {
                    if !stored.contains_key(&spec.name) {
                        warn!(user, signal = %spec.name, "No stored baseline for signal");
                    }
                }
                self.engine
                    .evaluate_stored(&self.config.signals, &today, &stored)
            }
        };

        let suggest = suggest_recalibration(&items, self.config.stable_threshold);
        info!(
            user,
            day = %today.day,
            flagged = items.iter().filter(|i| i.flag).count(),
            suggest_recalibration = suggest,
            "Anomaly report computed"
        );

        Ok(AnomalyReport {
            user: user.to_string(),
            day: today.day,
            items,
            thresholds: self.config.thresholds(),
            suggest_recalibration: suggest,
        })
    }

    /// Today vs. the snapshot window for every explanation feature.
    ///
    /// Requires a row on exactly the anchor day.
    pub fn metric_snapshot(
        &self,
        user: &str,
        day: Option<NaiveDate>,
    ) -> Result<MetricSnapshot, BaselineError> {
        let anchor = self.resolve_anchor(user, day)?;
        let today = self
            .source
            .row_on(user, anchor)?
            .ok_or_else(|| BaselineError::NoRowForDay {
                user: user.to_string(),
                day: anchor,
            })?;

        let window = self.load_window(user, &self.config.snapshot_window, anchor)?;
        let stats = column_stats(window.rows());

        let items = FEATURE_ALIASES
            .iter()
            .map(|alias| {
                let s = stats.get(&alias.column).copied().unwrap_or_default();
                let today_value = today.value(alias.column);
                let item = SnapshotItem {
                    unit: alias.unit.to_string(),
                    today: today_value,
                    baseline: s.mean,
                    delta: delta(today_value, s.mean),
                    z: compute_z(today_value, s.mean, s.std),
                };
                (alias.key.to_string(), item)
            })
            .collect();

        Ok(MetricSnapshot {
            user: user.to_string(),
            day: anchor,
            items,
        })
    }

    /// Today vs. the context window with display metadata.
    ///
    /// A missing row on the anchor day yields empty today values.
    pub fn feature_context(
        &self,
        user: &str,
        day: Option<NaiveDate>,
    ) -> Result<FeatureContext, BaselineError> {
        let anchor = self.resolve_anchor(user, day)?;
        let today = self.source.row_on(user, anchor)?;
        if today.is_none() {
            debug!(user, day = %anchor, "No metrics row on anchor day");
        }

        let window = self.load_window(user, &self.config.context_window, anchor)?;

        let context = CONTEXT_COLUMNS
            .iter()
            .map(|&column| {
                let stats = compute_baseline(window.rows().iter().map(|r| r.value(column)));
                let today_value = today.as_ref().and_then(|r| r.value(column));
                let z = compute_z(today_value, stats.mean, stats.std);
                let meta = MetricMeta::of(column);
                ContextEntry {
                    metric: column,
                    today_value,
                    baseline_mean: stats.mean,
                    baseline_sd: stats.std,
                    z_score: z,
                    display: meta.label.to_string(),
                    unit: meta.unit.to_string(),
                    pop_low: meta.pop_low,
                    pop_high: meta.pop_high,
                    guideline: meta.guideline.to_string(),
                    direction: meta.direction(z),
                }
            })
            .collect();

        Ok(FeatureContext {
            user: user.to_string(),
            day: anchor,
            context,
        })
    }

    /// Daily series for `features` over the last `days` days of data.
    ///
    /// `days` is clamped to 3..=90. Unknown feature keys get an empty series.
    pub fn trend(
        &self,
        user: &str,
        features: &[String],
        days: u32,
    ) -> Result<MetricTrend, BaselineError> {
        let days = days.clamp(MIN_TREND_DAYS, MAX_TREND_DAYS);
        let end = self
            .source
            .latest_day(user)?
            .ok_or_else(|| BaselineError::NoMetrics {
                user: user.to_string(),
            })?;
        let start = end
            .checked_sub_days(Days::new(u64::from(days - 1)))
            .unwrap_or(NaiveDate::MIN);

        let rows = self.source.rows_between(user, start, end)?;

        let features = features
            .iter()
            .map(|key| {
                let series = match resolve_feature(key) {
                    Some(alias) => rows.iter().map(|r| r.sample(alias.column)).collect(),
                    None => {
                        warn!(feature = %key, "Unknown trend feature");
                        Vec::new()
                    }
                };
                FeatureSeries {
                    feature: key.clone(),
                    series,
                }
            })
            .collect();

        Ok(MetricTrend {
            user: user.to_string(),
            days,
            end,
            features,
        })
    }

    /// Compute a calibration snapshot over the anomaly window.
    pub fn calibrate(
        &self,
        user: &str,
        day: Option<NaiveDate>,
    ) -> Result<BaselineSnapshot, BaselineError> {
        let anchor = self.resolve_anchor(user, day)?;
        let window = self.load_window(user, &self.config.anomaly_window, anchor)?;
        let baselines = calibrate(&self.config.signals, &window);

        info!(user, anchor = %anchor, rows = window.len(), "Baselines calibrated");

        Ok(BaselineSnapshot {
            id: Uuid::new_v4().to_string(),
            user: user.to_string(),
            anchor,
            computed_at: Utc::now(),
            baselines,
        })
    }

    /// Absolute and baseline-relative flags for the user's row on `day`.
    ///
    /// No row on `day` means no flags.
    pub fn flags_for_day(&self, user: &str, day: NaiveDate) -> Result<Vec<Flag>, BaselineError> {
        let Some(row) = self.source.row_on(user, day)? else {
            return Ok(Vec::new());
        };

        let history = self.flag_history(user, &row)?;
        let mut flags = absolute_flags(user, &row);
        flags.extend(baseline_flags(user, &row, &history));

        debug!(user, day = %day, history = history.len(), flags = flags.len(), "Flags evaluated");
        Ok(flags)
    }

    fn flag_history(&self, user: &str, row: &MetricRow) -> Result<Vec<MetricRow>, BaselineError> {
        let spec = WindowSpec::new(self.config.flag_history_days, 1);
        Ok(self.load_window(user, &spec, row.day)?.rows().to_vec())
    }

    fn resolve_anchor(&self, user: &str, day: Option<NaiveDate>) -> Result<NaiveDate, BaselineError> {
        match day {
            Some(day) => Ok(day),
            None => self
                .source
                .latest_day(user)?
                .ok_or_else(|| BaselineError::NoMetrics {
                    user: user.to_string(),
                }),
        }
    }

    fn load_window(
        &self,
        user: &str,
        spec: &WindowSpec,
        anchor: NaiveDate,
    ) -> Result<BaselineWindow, BaselineError> {
        let rows = match spec.bounds(anchor) {
            Some((start, end)) => self.source.rows_between(user, start, end)?,
            None => Vec::new(),
        };
        let window = BaselineWindow::select(spec, anchor, &rows);
        debug!(
            user,
            anchor = %anchor,
            start = %window.start,
            end = %window.end,
            rows = window.len(),
            "Baseline window loaded"
        );
        Ok(window)
    }
}

fn column_stats(rows: &[MetricRow]) -> HashMap<MetricColumn, BaselineStats> {
    MetricColumn::ALL
        .iter()
        .map(|&column| {
            let stats = compute_baseline(rows.iter().map(|r| r.value(column)));
            (column, stats)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::FlagType;
    use crate::source::InMemorySource;
    use crate::types::QualityFlag;
    use pretty_assertions::assert_eq;

    const EPS: f64 = 1e-9;

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    /// A steady March, then an off day on April 1st
    fn seeded_source() -> InMemorySource {
        let mut source = InMemorySource::new();
        for d in 1..=31 {
            let wobble = if d % 2 == 0 { 1.0 } else { -1.0 };
            source.upsert_row(
                "u1",
                MetricRow {
                    rhr: Some(60.0 + wobble),
                    hrv_avg: Some(50.0 - 2.0 * wobble),
                    sleep_minutes: Some(450.0 + 15.0 * wobble),
                    steps: Some(8000.0 + 500.0 * wobble),
                    hr_avg: Some(72.0),
                    day: day(3, d),
                },
            );
        }
        source.upsert_row(
            "u1",
            MetricRow {
                rhr: Some(68.0),
                hrv_avg: Some(36.0),
                sleep_minutes: Some(330.0),
                steps: None,
                hr_avg: Some(80.0),
                day: day(4, 1),
            },
        );
        source
    }

    #[test]
    fn test_anomaly_report_latest_day() {
        let source = seeded_source();
        let config = EngineConfig::default();
        let service = BaselineService::new(&source, &config);

        let report = service.anomaly_report("u1", None).unwrap();
        assert_eq!(report.day, day(4, 1));
        assert_eq!(report.thresholds.anomaly_z, 2.0);

        let signals: Vec<&str> = report.items.iter().map(|i| i.signal.as_str()).collect();
        assert_eq!(signals, vec!["rhr", "hrv", "sleep", "steps"]);

        let rhr = &report.items[0];
        assert_eq!(rhr.n, 28);
        assert!((rhr.mean.unwrap() - 60.0).abs() < EPS);
        assert!(rhr.flag);

        let steps = &report.items[3];
        assert_eq!(steps.today, None);
        assert!(!steps.flag);
        assert!(steps.quality.contains(&QualityFlag::MissingToday));

        assert!(!report.suggest_recalibration);
    }

    #[test]
    fn test_anomaly_report_on_or_before() {
        let source = seeded_source();
        let config = EngineConfig::default();
        let service = BaselineService::new(&source, &config);

        let report = service.anomaly_report("u1", Some(day(4, 20))).unwrap();
        assert_eq!(report.day, day(4, 1));

        let err = service.anomaly_report("u1", Some(day(2, 1))).unwrap_err();
        assert!(matches!(err, BaselineError::NoRowForDay { .. }));

        let err = service.anomaly_report("ghost", None).unwrap_err();
        assert!(matches!(err, BaselineError::NoMetrics { .. }));
    }

    #[test]
    fn test_anomaly_report_suggests_recalibration_when_stable() {
        let mut source = seeded_source();
        source.upsert_row(
            "u1",
            MetricRow {
                rhr: Some(60.0),
                hrv_avg: Some(50.0),
                sleep_minutes: Some(450.0),
                steps: Some(8000.0),
                hr_avg: None,
                day: day(4, 2),
            },
        );
        let config = EngineConfig::default();
        let service = BaselineService::new(&source, &config);

        let report = service.anomaly_report("u1", Some(day(4, 2))).unwrap();
        assert!(report.items.iter().all(|i| i.z.map_or(false, |z| z.abs() < 0.5)));
        assert!(report.suggest_recalibration);
    }

    #[test]
    fn test_stored_mode_uses_calibration() {
        let mut source = seeded_source();
        let config = EngineConfig::default();
        let snapshot = BaselineService::new(&source, &config)
            .calibrate("u1", Some(day(3, 31)))
            .unwrap();
        assert_eq!(snapshot.baselines.len(), 4);
        assert_eq!(snapshot.anchor, day(3, 31));
        source.store_snapshot(&snapshot);

        let stored_config = EngineConfig {
            baseline_mode: BaselineMode::Stored,
            ..EngineConfig::default()
        };
        let stored = BaselineService::new(&source, &stored_config)
            .anomaly_report("u1", None)
            .unwrap();
        let rolling = BaselineService::new(&source, &config)
            .anomaly_report("u1", None)
            .unwrap();

        // calibrated over March 3rd..30th, rolling over March 4th..31st
        assert_eq!(stored.items[0].n, 28);
        assert_eq!(stored.items[0].mean, Some(60.0));
        assert!(stored.items[0].flag);
        assert!(rolling.items[0].flag);
    }

    #[test]
    fn test_stored_mode_without_calibration() {
        let source = seeded_source();
        let config = EngineConfig {
            baseline_mode: BaselineMode::Stored,
            ..EngineConfig::default()
        };
        let report = BaselineService::new(&source, &config)
            .anomaly_report("u1", None)
            .unwrap();
        assert!(report.items.iter().all(|i| i.z.is_none() && !i.flag));
        assert!(!report.suggest_recalibration);
    }

    #[test]
    fn test_metric_snapshot() {
        let source = seeded_source();
        let config = EngineConfig::default();
        let service = BaselineService::new(&source, &config);

        let snapshot = service.metric_snapshot("u1", None).unwrap();
        assert_eq!(snapshot.day, day(4, 1));
        assert_eq!(snapshot.items.len(), 7);

        let rhr = &snapshot.items["rhr"];
        assert_eq!(rhr.unit, "bpm");
        assert_eq!(rhr.today, Some(68.0));
        assert!((rhr.delta.unwrap() - 8.0).abs() < EPS);
        assert!(rhr.z.unwrap() > 2.0);

        assert_eq!(snapshot.items["hrv"], snapshot.items["hrv_avg"]);
        assert_eq!(snapshot.items["sleep_debt"].unit, "min");

        let steps = &snapshot.items["forecast_delta"];
        assert_eq!(steps.today, None);
        assert_eq!(steps.delta, None);
        assert_eq!(steps.z, None);
        assert!(steps.baseline.is_some());
    }

    #[test]
    fn test_metric_snapshot_requires_exact_day() {
        let source = seeded_source();
        let config = EngineConfig::default();
        let service = BaselineService::new(&source, &config);

        let err = service.metric_snapshot("u1", Some(day(4, 5))).unwrap_err();
        assert!(matches!(err, BaselineError::NoRowForDay { .. }));
    }

    #[test]
    fn test_feature_context() {
        let source = seeded_source();
        let config = EngineConfig::default();
        let service = BaselineService::new(&source, &config);

        let context = service.feature_context("u1", None).unwrap();
        let metrics: Vec<MetricColumn> = context.context.iter().map(|c| c.metric).collect();
        assert_eq!(
            metrics,
            vec![
                MetricColumn::Rhr,
                MetricColumn::HrvAvg,
                MetricColumn::SleepMinutes,
                MetricColumn::Steps
            ]
        );

        let rhr = &context.context[0];
        assert_eq!(rhr.display, "Resting HR");
        assert_eq!(rhr.pop_low, Some(60.0));
        assert_eq!(rhr.direction, Direction::Risk);

        let hrv = &context.context[1];
        assert_eq!(hrv.direction, Direction::Risk);

        let steps = &context.context[3];
        assert_eq!(steps.today_value, None);
        assert_eq!(steps.direction, Direction::Neutral);
    }

    #[test]
    fn test_feature_context_without_today_row() {
        let source = seeded_source();
        let config = EngineConfig::default();
        let service = BaselineService::new(&source, &config);

        let context = service.feature_context("u1", Some(day(4, 3))).unwrap();
        assert!(context.context.iter().all(|c| c.today_value.is_none()));
        assert!(context.context.iter().all(|c| c.baseline_mean.is_some()));
    }

    #[test]
    fn test_trend() {
        let source = seeded_source();
        let config = EngineConfig::default();
        let service = BaselineService::new(&source, &config);

        let features = vec!["rhr".to_string(), "mood".to_string()];
        let trend = service.trend("u1", &features, 1).unwrap();

        assert_eq!(trend.days, 3);
        assert_eq!(trend.end, day(4, 1));
        assert_eq!(trend.features[0].series.len(), 3);
        assert_eq!(trend.features[0].series[2].value, Some(68.0));
        assert_eq!(trend.features[0].series[0].day, day(3, 30));
        assert!(trend.features[1].series.is_empty());

        let wide = service.trend("u1", &features, 500).unwrap();
        assert_eq!(wide.days, 90);
        assert_eq!(wide.features[0].series.len(), 32);
    }

    #[test]
    fn test_flags_for_day() {
        let source = seeded_source();
        let config = EngineConfig::default();
        let service = BaselineService::new(&source, &config);

        let flags = service.flags_for_day("u1", day(4, 1)).unwrap();
        let types: Vec<FlagType> = flags.iter().map(|f| f.flag_type).collect();
        assert_eq!(
            types,
            vec![
                FlagType::LowHrv,
                FlagType::LowHrvVsBaseline,
                FlagType::ElevatedRhrVsBaseline,
                FlagType::SleepDebtVsBaseline
            ]
        );

        assert!(service.flags_for_day("u1", day(4, 9)).unwrap().is_empty());
    }
}

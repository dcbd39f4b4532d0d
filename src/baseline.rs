//! Baseline statistics engine
//!
//! This module computes a user's personal baseline for a signal (mean and sample
//! standard deviation over a window of days) and scores today's value against it.
//! Everything here is pure: callers fetch rows and pass them in.
//!
//! Missing data never fails a computation. It surfaces as `None` statistics and
//! a [`QualityFlag`] on the affected signal, while other signals in the same
//! batch are evaluated independently.

use crate::types::{
    AnomalyResult, BaselineStats, MetricRow, QualityFlag, SignalSpec, StoredBaseline,
};
use crate::window::BaselineWindow;
use std::collections::HashMap;

/// |z| at or above which a signal is flagged as anomalous
pub const ANOMALY_THRESHOLD: f64 = 2.0;

/// |z| below which a signal counts as stable for recalibration purposes
pub const STABLE_THRESHOLD: f64 = 0.5;

/// Standard deviations below this are treated as a flat baseline
pub const MIN_STD: f64 = 1e-9;

/// Compute mean and sample standard deviation over a sequence of samples.
///
/// `None` and non-finite entries are skipped. The standard deviation uses
/// Bessel's correction and needs at least two samples.
pub fn compute_baseline<I>(samples: I) -> BaselineStats
where
    I: IntoIterator<Item = Option<f64>>,
{
    let values: Vec<f64> = samples
        .into_iter()
        .flatten()
        .filter(|v| v.is_finite())
        .collect();

    let n = values.len();
    if n == 0 {
        return BaselineStats {
            mean: None,
            std: None,
            n: 0,
        };
    }

    let mean = values.iter().sum::<f64>() / n as f64;

    let std = if n < 2 {
        None
    } else {
        let sum_sq: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
        Some((sum_sq / (n - 1) as f64).sqrt())
    };

    BaselineStats {
        mean: Some(mean),
        std,
        n,
    }
}

/// Standardized deviation of `value` from a baseline.
///
/// Returns `None` when any input is missing or the baseline has no variance.
pub fn compute_z(value: Option<f64>, mean: Option<f64>, std: Option<f64>) -> Option<f64> {
    match (value, mean, std) {
        (Some(v), Some(m), Some(s)) if s.is_finite() && s.abs() >= MIN_STD => Some((v - m) / s),
        _ => None,
    }
}

/// Whether a z-score crosses the anomaly threshold (inclusive)
pub fn classify_anomaly(z: Option<f64>, threshold: f64) -> bool {
    z.map_or(false, |z| z.abs() >= threshold)
}

/// True only if every result has a z-score strictly inside the stable band.
///
/// A single missing or unstable signal suppresses the suggestion. An empty
/// batch never suggests recalibration.
pub fn suggest_recalibration(results: &[AnomalyResult], stable_threshold: f64) -> bool {
    !results.is_empty()
        && results
            .iter()
            .all(|r| r.z.map_or(false, |z| z.abs() < stable_threshold))
}

/// Scores signals against baselines with a fixed anomaly threshold
#[derive(Debug, Clone, Copy)]
pub struct BaselineEngine {
    anomaly_threshold: f64,
}

impl Default for BaselineEngine {
    fn default() -> Self {
        Self::new(ANOMALY_THRESHOLD)
    }
}

impl BaselineEngine {
    pub fn new(anomaly_threshold: f64) -> Self {
        Self { anomaly_threshold }
    }

    pub fn anomaly_threshold(&self) -> f64 {
        self.anomaly_threshold
    }

    /// Evaluate each signal's value on `today` against a rolling window.
    ///
    /// Output order follows `signals`.
    pub fn evaluate_signals(
        &self,
        signals: &[SignalSpec],
        today: &MetricRow,
        window: &[MetricRow],
    ) -> Vec<AnomalyResult> {
        signals
            .iter()
            .map(|spec| {
                let stats = compute_baseline(window.iter().map(|row| row.value(spec.column)));
                self.score(spec, today.value(spec.column), stats)
            })
            .collect()
    }

    /// Evaluate signals against previously calibrated baselines.
    ///
    /// Signals without a stored baseline score as insufficient history.
    pub fn evaluate_stored(
        &self,
        signals: &[SignalSpec],
        today: &MetricRow,
        stored: &HashMap<String, BaselineStats>,
    ) -> Vec<AnomalyResult> {
        signals
            .iter()
            .map(|spec| {
                let stats = stored.get(&spec.name).copied().unwrap_or_default();
                self.score(spec, today.value(spec.column), stats)
            })
            .collect()
    }

    /// Score one value against precomputed stats
    pub fn score(&self, spec: &SignalSpec, today: Option<f64>, stats: BaselineStats) -> AnomalyResult {
        let z = compute_z(today, stats.mean, stats.std);
        let flag = classify_anomaly(z, self.anomaly_threshold);

        let mut quality = Vec::new();
        if today.is_none() {
            quality.push(QualityFlag::MissingToday);
        }
        match stats.std {
            None => quality.push(QualityFlag::InsufficientHistory),
            Some(s) if s.abs() < MIN_STD => quality.push(QualityFlag::DegenerateBaseline),
            Some(_) => {}
        }

        AnomalyResult {
            signal: spec.name.clone(),
            column: spec.column,
            today,
            mean: stats.mean,
            std: stats.std,
            z,
            flag,
            n: stats.n,
            quality,
        }
    }
}

/// Compute baselines worth persisting from a selected window
pub fn calibrate(signals: &[SignalSpec], window: &BaselineWindow) -> Vec<StoredBaseline> {
    signals
        .iter()
        .map(|spec| {
            let stats = compute_baseline(window.rows().iter().map(|row| row.value(spec.column)));
            StoredBaseline {
                signal: spec.name.clone(),
                column: spec.column,
                mean: stats.mean,
                std: stats.std,
                n: stats.n,
                window_start: window.start,
                window_end: window.end,
            }
        })
        .collect()
}

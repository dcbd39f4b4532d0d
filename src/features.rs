//! Metric metadata and feature interpretation
//!
//! This module attaches human-facing meaning to raw z-scores:
//! - Display labels, units and population guideline ranges per column
//! - Polarity-aware direction (risk / protective / neutral)
//! - The explanation-feature alias table used by snapshots and trends

use crate::types::MetricColumn;
use serde::{Deserialize, Serialize};

/// |z| beyond which a metric is read as leaning one way
pub const DIRECTION_Z: f64 = 0.5;

/// Interpretation of a z-score for a given metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Risk,
    Protective,
    Neutral,
}

/// Which side of the baseline is unfavourable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    HigherIsRisk,
    LowerIsRisk,
}

/// Static description of a metric column
#[derive(Debug, Clone, Copy)]
pub struct MetricMeta {
    pub column: MetricColumn,
    pub label: &'static str,
    pub unit: &'static str,
    pub guideline: &'static str,
    /// Typical population range, where one is commonly quoted
    pub pop_low: Option<f64>,
    pub pop_high: Option<f64>,
    pub polarity: Polarity,
}

impl MetricMeta {
    /// Metadata for a column
    pub fn of(column: MetricColumn) -> &'static MetricMeta {
        match column {
            MetricColumn::Rhr => &RHR_META,
            MetricColumn::HrvAvg => &HRV_META,
            MetricColumn::SleepMinutes => &SLEEP_META,
            MetricColumn::Steps => &STEPS_META,
            MetricColumn::HrAvg => &HR_META,
        }
    }

    /// Read a z-score with this metric's polarity
    pub fn direction(&self, z: Option<f64>) -> Direction {
        let Some(z) = z else {
            return Direction::Neutral;
        };
        let (risk, protective) = match self.polarity {
            Polarity::HigherIsRisk => (z > DIRECTION_Z, z < -DIRECTION_Z),
            Polarity::LowerIsRisk => (z < -DIRECTION_Z, z > DIRECTION_Z),
        };
        if risk {
            Direction::Risk
        } else if protective {
            Direction::Protective
        } else {
            Direction::Neutral
        }
    }
}

static RHR_META: MetricMeta = MetricMeta {
    column: MetricColumn::Rhr,
    label: "Resting HR",
    unit: "bpm",
    guideline: "Typical adult RHR ~60-100 bpm (lower often indicates better fitness).",
    pop_low: Some(60.0),
    pop_high: Some(100.0),
    polarity: Polarity::HigherIsRisk,
};

static HRV_META: MetricMeta = MetricMeta {
    column: MetricColumn::HrvAvg,
    label: "HRV",
    unit: "ms",
    guideline: "Higher HRV generally reflects better recovery capacity.",
    pop_low: None,
    pop_high: None,
    polarity: Polarity::LowerIsRisk,
};

static SLEEP_META: MetricMeta = MetricMeta {
    column: MetricColumn::SleepMinutes,
    label: "Sleep (min)",
    unit: "min",
    guideline: "Adults commonly target ~7-9 hours (420-540 min).",
    pop_low: Some(420.0),
    pop_high: Some(540.0),
    polarity: Polarity::LowerIsRisk,
};

static STEPS_META: MetricMeta = MetricMeta {
    column: MetricColumn::Steps,
    label: "Steps",
    unit: "steps",
    guideline: "Higher activity is generally beneficial; context matters.",
    pop_low: None,
    pop_high: None,
    polarity: Polarity::LowerIsRisk,
};

static HR_META: MetricMeta = MetricMeta {
    column: MetricColumn::HrAvg,
    label: "Average HR",
    unit: "bpm",
    guideline: "Daytime average heart rate; sustained elevation can reflect strain or illness.",
    pop_low: None,
    pop_high: None,
    polarity: Polarity::HigherIsRisk,
};

/// A feature key from the risk model's explanations, resolved to a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureAlias {
    pub key: &'static str,
    pub column: MetricColumn,
    pub unit: &'static str,
    pub label: &'static str,
}

/// Explanation feature keys and the columns that back them
pub const FEATURE_ALIASES: [FeatureAlias; 7] = [
    FeatureAlias { key: "rhr", column: MetricColumn::Rhr, unit: "bpm", label: "Resting HR" },
    FeatureAlias { key: "hrv", column: MetricColumn::HrvAvg, unit: "ms", label: "HRV" },
    FeatureAlias { key: "hrv_avg", column: MetricColumn::HrvAvg, unit: "ms", label: "HRV" },
    FeatureAlias { key: "sleep_debt", column: MetricColumn::SleepMinutes, unit: "min", label: "Sleep debt" },
    FeatureAlias { key: "sleep_minutes", column: MetricColumn::SleepMinutes, unit: "min", label: "Sleep (min)" },
    FeatureAlias { key: "forecast_delta", column: MetricColumn::Steps, unit: "steps", label: "Forecast delta" },
    FeatureAlias { key: "steps", column: MetricColumn::Steps, unit: "steps", label: "Steps" },
];

/// Feature keys plotted when a trend request names none
pub const DEFAULT_TREND_FEATURES: [&str; 4] = ["rhr", "hrv", "sleep_debt", "forecast_delta"];

/// Resolve an explanation feature key
pub fn resolve_feature(key: &str) -> Option<&'static FeatureAlias> {
    FEATURE_ALIASES.iter().find(|a| a.key == key)
}

/// Signed difference between today and the baseline mean
pub fn delta(today: Option<f64>, baseline: Option<f64>) -> Option<f64> {
    match (today, baseline) {
        (Some(t), Some(b)) => Some(t - b),
        _ => None,
    }
}

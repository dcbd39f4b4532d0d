//! Daily rollup of raw metric events
//!
//! Raw device events (one reading each) are folded into one [`MetricRow`] per
//! user for a UTC day. Count-like metrics are summed; rate-like metrics are
//! averaged and rounded to two decimals.

use crate::source::UserMetricRow;
use crate::types::{MetricColumn, MetricRow};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single reading as delivered by a device integration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMetricEvent {
    pub user_id: String,
    /// Event metric name (e.g. "hr", "steps")
    pub metric: String,
    pub value: f64,
    pub event_time: DateTime<Utc>,
}

/// How events of one metric combine within a day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Sum,
    Avg,
}

/// Target column and aggregation for an event metric
pub fn metric_target(metric: &str) -> Option<(MetricColumn, Aggregation)> {
    match metric {
        "steps" => Some((MetricColumn::Steps, Aggregation::Sum)),
        "sleep_minutes" => Some((MetricColumn::SleepMinutes, Aggregation::Sum)),
        "hr" => Some((MetricColumn::HrAvg, Aggregation::Avg)),
        "hrv" => Some((MetricColumn::HrvAvg, Aggregation::Avg)),
        "rhr" => Some((MetricColumn::Rhr, Aggregation::Avg)),
        _ => None,
    }
}

/// Result of rolling up one day
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollupSummary {
    pub day: NaiveDate,
    /// Distinct users with at least one event that day
    pub users: usize,
    /// Events with a metric name that maps to no column
    pub skipped_events: usize,
    pub rows: Vec<UserMetricRow>,
}

/// Aggregate events for `day`, optionally for one user only
pub fn rollup_day(events: &[RawMetricEvent], day: NaiveDate, user: Option<&str>) -> RollupSummary {
    // user -> column -> values
    let mut by_user: BTreeMap<&str, BTreeMap<MetricColumn, (Aggregation, Vec<f64>)>> =
        BTreeMap::new();
    let mut skipped_events = 0;

    for event in events {
        if event.event_time.date_naive() != day {
            continue;
        }
        if user.is_some_and(|u| u != event.user_id) {
            continue;
        }

        let metrics = by_user.entry(event.user_id.as_str()).or_default();
        let Some((column, agg)) = metric_target(&event.metric) else {
            skipped_events += 1;
            continue;
        };
        if !event.value.is_finite() {
            skipped_events += 1;
            continue;
        }
        metrics
            .entry(column)
            .or_insert_with(|| (agg, Vec::new()))
            .1
            .push(event.value);
    }

    let users = by_user.len();
    let rows = by_user
        .into_iter()
        .map(|(user_id, metrics)| {
            let mut row = MetricRow::empty(day);
            for (column, (agg, values)) in metrics {
                row.set(column, aggregate(agg, &values));
            }
            UserMetricRow {
                user_id: user_id.to_string(),
                row,
            }
        })
        .collect();

    RollupSummary {
        day,
        users,
        skipped_events,
        rows,
    }
}

fn aggregate(agg: Aggregation, values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let sum: f64 = values.iter().sum();
    match agg {
        Aggregation::Sum => Some(sum),
        Aggregation::Avg => Some(round2(sum / values.len() as f64)),
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(user: &str, metric: &str, value: f64, hour: u32, d: u32) -> RawMetricEvent {
        RawMetricEvent {
            user_id: user.to_string(),
            metric: metric.to_string(),
            value,
            event_time: Utc.with_ymd_and_hms(2024, 5, d, hour, 15, 0).unwrap(),
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn test_sum_and_average() {
        let events = vec![
            event("u1", "steps", 3000.0, 9, 10),
            event("u1", "steps", 4500.0, 18, 10),
            event("u1", "hr", 70.0, 9, 10),
            event("u1", "hr", 71.0, 10, 10),
            event("u1", "hr", 73.0, 11, 10),
            event("u1", "rhr", 58.0, 6, 10),
        ];

        let summary = rollup_day(&events, day(10), None);
        assert_eq!(summary.users, 1);
        let row = &summary.rows[0].row;
        assert_eq!(row.steps, Some(7500.0));
        // 214 / 3 = 71.333.. rounded to 71.33
        assert_eq!(row.hr_avg, Some(71.33));
        assert_eq!(row.rhr, Some(58.0));
        assert_eq!(row.hrv_avg, None);
    }

    #[test]
    fn test_other_days_and_users_filtered() {
        let events = vec![
            event("u1", "steps", 1000.0, 9, 10),
            event("u1", "steps", 9999.0, 9, 11),
            event("u2", "steps", 2000.0, 9, 10),
        ];

        let all = rollup_day(&events, day(10), None);
        assert_eq!(all.users, 2);
        assert_eq!(all.rows[0].row.steps, Some(1000.0));

        let only_u2 = rollup_day(&events, day(10), Some("u2"));
        assert_eq!(only_u2.users, 1);
        assert_eq!(only_u2.rows[0].user_id, "u2");
        assert_eq!(only_u2.rows[0].row.steps, Some(2000.0));
    }

    #[test]
    fn test_unknown_metrics_skipped() {
        let events = vec![
            event("u1", "spo2", 97.0, 9, 10),
            event("u1", "hrv", 48.0, 9, 10),
        ];

        let summary = rollup_day(&events, day(10), None);
        assert_eq!(summary.skipped_events, 1);
        assert_eq!(summary.rows[0].row.hrv_avg, Some(48.0));
    }

    #[test]
    fn test_empty_day() {
        let summary = rollup_day(&[], day(10), None);
        assert_eq!(summary.users, 0);
        assert!(summary.rows.is_empty());
    }
}

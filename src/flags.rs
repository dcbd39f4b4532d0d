//! Daily health flags
//!
//! Two rule sets produce flags for a day's row:
//! - absolute rules against fixed physiological cut-offs
//! - baseline rules against the mean of the preceding days
//!
//! Planning is idempotent: flags already recorded for the same
//! `(user, day, flag_type)` are skipped.

use crate::baseline::compute_baseline;
use crate::types::{MetricColumn, MetricRow};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Sleep below this (minutes) raises `SleepDebt`
pub const SLEEP_MINUTES_LT: f64 = 300.0;
/// HRV below this (ms) raises `LowHrv`
pub const HRV_AVG_LT: f64 = 40.0;
/// RHR above this (bpm) raises `ElevatedRhr`
pub const RHR_GT: f64 = 80.0;

/// HRV below this fraction of its baseline raises `LowHrvVsBaseline`
pub const HRV_BASELINE_RATIO: f64 = 0.75;
/// RHR above this fraction of its baseline raises `ElevatedRhrVsBaseline`
pub const RHR_BASELINE_RATIO: f64 = 1.10;
/// Sleep below this fraction of its baseline raises `SleepDebtVsBaseline`
pub const SLEEP_BASELINE_RATIO: f64 = 0.85;
/// Sleep floor (minutes) for the baseline sleep rule
pub const SLEEP_FLOOR_MINUTES: f64 = 360.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagType {
    SleepDebt,
    LowHrv,
    ElevatedRhr,
    LowHrvVsBaseline,
    ElevatedRhrVsBaseline,
    SleepDebtVsBaseline,
}

impl FlagType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagType::SleepDebt => "sleep_debt",
            FlagType::LowHrv => "low_hrv",
            FlagType::ElevatedRhr => "elevated_rhr",
            FlagType::LowHrvVsBaseline => "low_hrv_vs_baseline",
            FlagType::ElevatedRhrVsBaseline => "elevated_rhr_vs_baseline",
            FlagType::SleepDebtVsBaseline => "sleep_debt_vs_baseline",
        }
    }
}

impl fmt::Display for FlagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    pub user_id: String,
    pub day: NaiveDate,
    pub flag_type: FlagType,
    /// 1 (informational) to 3 (high)
    pub severity: u8,
    pub rationale: String,
}

impl Flag {
    fn key(&self) -> (&str, NaiveDate, FlagType) {
        (self.user_id.as_str(), self.day, self.flag_type)
    }
}

/// Flags from fixed cut-offs
pub fn absolute_flags(user: &str, row: &MetricRow) -> Vec<Flag> {
    let mut out = Vec::new();
    let flag = |flag_type, severity, rationale: &str| Flag {
        user_id: user.to_string(),
        day: row.day,
        flag_type,
        severity,
        rationale: rationale.to_string(),
    };

    if row.value(MetricColumn::SleepMinutes).is_some_and(|v| v < SLEEP_MINUTES_LT) {
        out.push(flag(FlagType::SleepDebt, 2, "Sleep under 5 hours"));
    }
    if row.value(MetricColumn::HrvAvg).is_some_and(|v| v < HRV_AVG_LT) {
        out.push(flag(FlagType::LowHrv, 3, "HRV below baseline proxy"));
    }
    if row.value(MetricColumn::Rhr).is_some_and(|v| v > RHR_GT) {
        out.push(flag(FlagType::ElevatedRhr, 2, "Resting HR > 80 bpm"));
    }
    out
}

/// Flags relative to the mean of `history` (the preceding days)
pub fn baseline_flags(user: &str, row: &MetricRow, history: &[MetricRow]) -> Vec<Flag> {
    let mean_of =
        |column: MetricColumn| compute_baseline(history.iter().map(|r| r.value(column))).mean;
    let mut out = Vec::new();

    if let (Some(hrv), Some(mean)) = (
        row.value(MetricColumn::HrvAvg),
        mean_of(MetricColumn::HrvAvg),
    ) {
        if hrv < mean * HRV_BASELINE_RATIO {
            out.push(Flag {
                user_id: user.to_string(),
                day: row.day,
                flag_type: FlagType::LowHrvVsBaseline,
                severity: 3,
                rationale: format!("HRV {hrv} < 75% of {}d baseline {mean:.1}", history.len()),
            });
        }
    }

    if let (Some(rhr), Some(mean)) = (row.value(MetricColumn::Rhr), mean_of(MetricColumn::Rhr)) {
        if rhr > mean * RHR_BASELINE_RATIO {
            out.push(Flag {
                user_id: user.to_string(),
                day: row.day,
                flag_type: FlagType::ElevatedRhrVsBaseline,
                severity: 2,
                rationale: format!("RHR {rhr} > 110% of {}d baseline {mean:.1}", history.len()),
            });
        }
    }

    if let (Some(sleep), Some(mean)) = (
        row.value(MetricColumn::SleepMinutes),
        mean_of(MetricColumn::SleepMinutes),
    ) {
        let floor = SLEEP_FLOOR_MINUTES.max(mean * SLEEP_BASELINE_RATIO);
        if sleep < floor {
            out.push(Flag {
                user_id: user.to_string(),
                day: row.day,
                flag_type: FlagType::SleepDebtVsBaseline,
                severity: 2,
                rationale: format!(
                    "Sleep {sleep}min < max(360min, 85% of {}d baseline {mean:.0}min)",
                    history.len()
                ),
            });
        }
    }

    out
}

/// Planned flags split into new and already-recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagPlan {
    pub planned: usize,
    pub to_insert: Vec<Flag>,
    pub skipped_as_duplicates: usize,
}

impl FlagPlan {
    /// Drop planned flags whose key already exists (and duplicates within the plan)
    pub fn new(planned: Vec<Flag>, existing: &[Flag]) -> Self {
        let total = planned.len();
        let mut seen: HashSet<(String, NaiveDate, FlagType)> = existing
            .iter()
            .map(|f| {
                let (u, d, t) = f.key();
                (u.to_string(), d, t)
            })
            .collect();

        let to_insert: Vec<Flag> = planned
            .into_iter()
            .filter(|f| seen.insert((f.user_id.clone(), f.day, f.flag_type)))
            .collect();

        Self {
            planned: total,
            skipped_as_duplicates: total - to_insert.len(),
            to_insert,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn row(d: u32, rhr: Option<f64>, hrv: Option<f64>, sleep: Option<f64>) -> MetricRow {
        MetricRow {
            rhr,
            hrv_avg: hrv,
            sleep_minutes: sleep,
            ..MetricRow::empty(day(d))
        }
    }

    #[test]
    fn test_absolute_rules() {
        let flags = absolute_flags("u1", &row(8, Some(85.0), Some(35.0), Some(280.0)));
        let types: Vec<FlagType> = flags.iter().map(|f| f.flag_type).collect();
        assert_eq!(
            types,
            vec![FlagType::SleepDebt, FlagType::LowHrv, FlagType::ElevatedRhr]
        );
        assert_eq!(flags[1].severity, 3);
    }

    #[test]
    fn test_absolute_rules_skip_missing_and_boundaries() {
        assert!(absolute_flags("u1", &row(8, Some(80.0), Some(40.0), Some(300.0))).is_empty());
        assert!(absolute_flags("u1", &row(8, None, None, None)).is_empty());
    }

    #[test]
    fn test_baseline_rules() {
        let history: Vec<MetricRow> = (1..=7)
            .map(|d| row(d, Some(60.0), Some(60.0), Some(480.0)))
            .collect();

        // HRV 40 < 45, RHR 67 > 66, sleep 400 < max(360, 408)
        let flags = baseline_flags("u1", &row(8, Some(67.0), Some(40.0), Some(400.0)), &history);
        let types: Vec<FlagType> = flags.iter().map(|f| f.flag_type).collect();
        assert_eq!(
            types,
            vec![
                FlagType::LowHrvVsBaseline,
                FlagType::ElevatedRhrVsBaseline,
                FlagType::SleepDebtVsBaseline
            ]
        );
        assert!(flags[0].rationale.contains("7d baseline 60.0"));

        let calm = baseline_flags("u1", &row(8, Some(61.0), Some(58.0), Some(470.0)), &history);
        assert!(calm.is_empty());
    }

    #[test]
    fn test_sleep_floor_applies_with_short_baseline() {
        // 85% of 400 is 340, so the 360 floor decides
        let history = vec![row(1, None, None, Some(400.0))];
        let flags = baseline_flags("u1", &row(2, None, None, Some(350.0)), &history);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].flag_type, FlagType::SleepDebtVsBaseline);
    }

    #[test]
    fn test_no_history_no_baseline_flags() {
        assert!(baseline_flags("u1", &row(2, Some(99.0), Some(10.0), Some(100.0)), &[]).is_empty());
    }

    #[test]
    fn test_plan_skips_existing() {
        let planned = absolute_flags("u1", &row(8, Some(85.0), Some(35.0), None));
        let existing = vec![planned[0].clone()];

        let plan = FlagPlan::new(planned, &existing);
        assert_eq!(plan.planned, 2);
        assert_eq!(plan.skipped_as_duplicates, 1);
        assert_eq!(plan.to_insert[0].flag_type, FlagType::ElevatedRhr);

        let again = FlagPlan::new(plan.to_insert.clone(), &plan.to_insert);
        assert!(again.to_insert.is_empty());
    }
}

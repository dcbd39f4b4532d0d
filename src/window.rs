//! Baseline window selection
//!
//! A baseline window is the run of days used to characterise a user's normal
//! range. It ends `gap_days` before the anchor day (so the anchor never feeds
//! its own baseline) and spans at most `length_days` days.

use crate::types::MetricRow;
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// Default baseline window length in days
pub const DEFAULT_WINDOW_DAYS: u32 = 28;

/// Default gap between the window end and the anchor day
pub const DEFAULT_GAP_DAYS: u32 = 2;

/// Window shape relative to an anchor day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    /// Number of days covered by the window
    pub length_days: u32,
    /// Days between the window end and the anchor (1 = the day before)
    pub gap_days: u32,
}

impl Default for WindowSpec {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_DAYS, DEFAULT_GAP_DAYS)
    }
}

impl WindowSpec {
    pub const fn new(length_days: u32, gap_days: u32) -> Self {
        Self {
            length_days,
            gap_days,
        }
    }

    /// Inclusive `(start, end)` bounds for an anchor day.
    ///
    /// Returns `None` when the window would fall before the calendar's range.
    pub fn bounds(&self, anchor: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        let end = anchor.checked_sub_days(Days::new(u64::from(self.gap_days)))?;
        let start = end.checked_sub_days(Days::new(
            u64::from(self.length_days.saturating_sub(1)),
        ))?;
        Some((start, end))
    }
}

/// Rows selected for a baseline, ordered oldest first
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    rows: Vec<MetricRow>,
}

impl BaselineWindow {
    /// Select the rows of `rows` that fall inside `spec` for `anchor`.
    ///
    /// Input order does not matter. Rows outside the bounds are dropped, and if
    /// the source hands back more rows than the window length (duplicate days),
    /// only the most recent `length_days` are kept.
    pub fn select(spec: &WindowSpec, anchor: NaiveDate, rows: &[MetricRow]) -> Self {
        let Some((start, end)) = spec.bounds(anchor) else {
            return Self {
                start: anchor,
                end: anchor,
                rows: Vec::new(),
            };
        };

        let mut selected: Vec<MetricRow> = rows
            .iter()
            .filter(|r| r.day >= start && r.day <= end)
            .cloned()
            .collect();
        selected.sort_by_key(|r| r.day);

        let cap = spec.length_days as usize;
        if selected.len() > cap {
            selected.drain(..selected.len() - cap);
        }

        Self {
            start,
            end,
            rows: selected,
        }
    }

    pub fn rows(&self) -> &[MetricRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

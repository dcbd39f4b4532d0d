//! Metric sources
//!
//! The engine never queries storage itself. Callers construct a [`MetricSource`]
//! once and pass it by reference to every operation. [`InMemorySource`] backs
//! the CLI and tests; a database-backed source implements the same trait.

use crate::error::BaselineError;
use crate::types::{BaselineSnapshot, MetricRow, StoredBaseline};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Read access to per-user daily metric rows
pub trait MetricSource {
    /// Most recent day with a row for the user
    fn latest_day(&self, user: &str) -> Result<Option<NaiveDate>, BaselineError>;

    /// Row for exactly `day`
    fn row_on(&self, user: &str, day: NaiveDate) -> Result<Option<MetricRow>, BaselineError>;

    /// Most recent row on or before `day`
    fn row_on_or_before(
        &self,
        user: &str,
        day: NaiveDate,
    ) -> Result<Option<MetricRow>, BaselineError>;

    /// Rows with `start <= day <= end`, oldest first. May be sparse.
    fn rows_between(
        &self,
        user: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<MetricRow>, BaselineError>;

    /// Last calibrated baselines for the user, if any
    fn stored_baselines(&self, user: &str) -> Result<Vec<StoredBaseline>, BaselineError>;
}

/// A metric row tagged with its owner, as found in input files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMetricRow {
    pub user_id: String,
    #[serde(flatten)]
    pub row: MetricRow,
}

/// Parse newline-delimited JSON records, skipping blank lines
pub fn parse_ndjson<T>(ndjson: &str) -> Result<Vec<T>, BaselineError>
where
    T: for<'de> Deserialize<'de>,
{
    let mut records = Vec::new();
    for (line_num, line) in ndjson.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(trimmed) {
            Ok(record) => records.push(record),
            Err(e) => {
                return Err(BaselineError::ParseError(format!(
                    "Failed to parse line {}: {}",
                    line_num + 1,
                    e
                )));
            }
        }
    }
    Ok(records)
}

/// Parse a JSON array of records
pub fn parse_array<T>(json: &str) -> Result<Vec<T>, BaselineError>
where
    T: for<'de> Deserialize<'de>,
{
    Ok(serde_json::from_str(json)?)
}

/// Metric rows held in memory, keyed by user then day
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    rows: HashMap<String, BTreeMap<NaiveDate, MetricRow>>,
    baselines: HashMap<String, Vec<StoredBaseline>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a source from tagged rows; later rows for the same day are merged in
    pub fn from_rows(rows: impl IntoIterator<Item = UserMetricRow>) -> Self {
        let mut source = Self::new();
        for tagged in rows {
            source.upsert_row(&tagged.user_id, tagged.row);
        }
        source
    }

    /// Insert a row, merging present columns into any existing row for that day
    pub fn upsert_row(&mut self, user: &str, row: MetricRow) {
        let days = self.rows.entry(user.to_string()).or_default();
        match days.get_mut(&row.day) {
            Some(existing) => existing.merge(&row),
            None => {
                days.insert(row.day, row);
            }
        }
    }

    /// Replace the stored baselines with a calibration snapshot
    pub fn store_snapshot(&mut self, snapshot: &BaselineSnapshot) {
        self.baselines
            .insert(snapshot.user.clone(), snapshot.baselines.clone());
    }

    /// All users with at least one row, sorted
    pub fn users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.rows.keys().cloned().collect();
        users.sort();
        users
    }

    /// Every row of every user, ordered by user then day
    pub fn all_rows(&self) -> Vec<UserMetricRow> {
        let mut out = Vec::with_capacity(self.len());
        for user in self.users() {
            if let Some(days) = self.rows.get(&user) {
                for row in days.values() {
                    out.push(UserMetricRow {
                        user_id: user.clone(),
                        row: row.clone(),
                    });
                }
            }
        }
        out
    }

    /// Number of rows across users
    pub fn len(&self) -> usize {
        self.rows.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetricSource for InMemorySource {
    fn latest_day(&self, user: &str) -> Result<Option<NaiveDate>, BaselineError> {
        Ok(self
            .rows
            .get(user)
            .and_then(|days| days.keys().next_back().copied()))
    }

    fn row_on(&self, user: &str, day: NaiveDate) -> Result<Option<MetricRow>, BaselineError> {
        Ok(self.rows.get(user).and_then(|days| days.get(&day).cloned()))
    }

    fn row_on_or_before(
        &self,
        user: &str,
        day: NaiveDate,
    ) -> Result<Option<MetricRow>, BaselineError> {
        Ok(self
            .rows
            .get(user)
            .and_then(|days| days.range(..=day).next_back().map(|(_, row)| row.clone())))
    }

    fn rows_between(
        &self,
        user: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<MetricRow>, BaselineError> {
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self
            .rows
            .get(user)
            .map(|days| days.range(start..=end).map(|(_, row)| row.clone()).collect())
            .unwrap_or_default())
    }

    fn stored_baselines(&self, user: &str) -> Result<Vec<StoredBaseline>, BaselineError> {
        Ok(self.baselines.get(user).cloned().unwrap_or_default())
    }
}

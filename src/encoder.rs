//! Report encoding
//!
//! This module wraps engine outputs in a self-describing envelope carrying
//! producer metadata and the computation time, so downstream consumers can tell
//! which build produced a report and when.

use crate::error::BaselineError;
use crate::{PRODUCER_NAME, VERSION};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Current envelope schema version
pub const ENVELOPE_VERSION: &str = "1.0.0";

/// Which operation produced the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Anomaly,
    Snapshot,
    Context,
    Trend,
    Calibration,
    Rollup,
    Flags,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Anomaly => "anomaly",
            ReportKind::Snapshot => "snapshot",
            ReportKind::Context => "context",
            ReportKind::Trend => "trend",
            ReportKind::Calibration => "calibration",
            ReportKind::Rollup => "rollup",
            ReportKind::Flags => "flags",
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// A report together with who computed it and when
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub envelope_version: String,
    pub producer: Producer,
    pub computed_at_utc: String,
    pub kind: ReportKind,
    pub data: T,
}

/// Encoder stamping reports with a per-process instance ID
pub struct ReportEncoder {
    instance_id: String,
}

impl Default for ReportEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Wrap a report in an envelope
    pub fn encode<T: Serialize>(&self, kind: ReportKind, data: T) -> Envelope<T> {
        Envelope {
            envelope_version: ENVELOPE_VERSION.to_string(),
            producer: Producer {
                name: PRODUCER_NAME.to_string(),
                version: VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            computed_at_utc: Utc::now().to_rfc3339(),
            kind,
            data,
        }
    }

    /// Encode to a JSON string
    pub fn encode_to_json<T: Serialize>(
        &self,
        kind: ReportKind,
        data: T,
    ) -> Result<String, BaselineError> {
        let envelope = self.encode(kind, data);
        serde_json::to_string_pretty(&envelope).map_err(BaselineError::JsonError)
    }
}

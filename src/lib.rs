//! Vitals Baseline - personal-baseline anomaly engine for daily wearable metrics
//!
//! The engine turns a user's recent daily metrics (resting heart rate, HRV,
//! sleep, steps) into a personal baseline and scores today's values against
//! it: window selection → mean / sample std → z-score → anomaly flag →
//! recalibration hint.
//!
//! ## Modules
//!
//! - **Engine**: `window`, `baseline` - pure statistics, no I/O
//! - **Service**: `pipeline` - request-level operations over a [`MetricSource`]
//! - **Interpretation**: `features`, `flags` - labels, direction and flag rules
//! - **Ingest**: `rollup` - raw device events into daily rows

pub mod baseline;
pub mod config;
pub mod encoder;
pub mod error;
pub mod features;
pub mod flags;
pub mod pipeline;
pub mod rollup;
pub mod source;
pub mod types;
pub mod window;

pub use baseline::{
    calibrate, classify_anomaly, compute_baseline, compute_z, suggest_recalibration,
    BaselineEngine,
};
pub use config::{BaselineMode, EngineConfig};
pub use encoder::{Envelope, ReportEncoder, ReportKind};
pub use error::BaselineError;
pub use pipeline::BaselineService;
pub use source::{InMemorySource, MetricSource, UserMetricRow};
pub use types::{
    AnomalyReport, AnomalyResult, BaselineSnapshot, BaselineStats, MetricColumn, MetricRow,
    SignalSpec,
};
pub use window::{BaselineWindow, WindowSpec};

/// Crate version embedded in every report envelope
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for report envelopes
pub const PRODUCER_NAME: &str = "vitals-baseline";

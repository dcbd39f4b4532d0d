//! Vitals CLI - Command-line interface for the baseline engine
//!
//! Commands:
//! - anomaly: Score a user's day against their personal baseline
//! - snapshot: Today vs. baseline for every explanation feature
//! - context: Today vs. baseline with labels, ranges and direction
//! - trend: Recent daily series for explanation features
//! - calibrate: Compute baselines to persist for stored-mode reports
//! - rollup: Aggregate raw device events into daily rows
//! - flags: Plan daily health flags
//! - doctor: Diagnose configuration and input files

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};

use vitals_baseline::encoder::{ReportEncoder, ReportKind};
use vitals_baseline::features::DEFAULT_TREND_FEATURES;
use vitals_baseline::flags::{Flag, FlagPlan};
use vitals_baseline::rollup::{rollup_day, RawMetricEvent};
use vitals_baseline::source::{parse_array, parse_ndjson};
use vitals_baseline::{
    BaselineError, BaselineMode, BaselineService, BaselineSnapshot, EngineConfig, InMemorySource,
    UserMetricRow, PRODUCER_NAME, VERSION,
};

/// Vitals - personal-baseline anomaly engine for daily wearable metrics
#[derive(Parser)]
#[command(name = "vitals")]
#[command(version = VERSION)]
#[command(about = "Score daily health metrics against personal baselines", long_about = None)]
struct Cli {
    /// Engine config file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Default log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a user's day against their personal baseline
    Anomaly {
        #[command(flatten)]
        input: RowInput,

        #[command(flatten)]
        output: ReportOutput,

        #[arg(short, long)]
        user: String,

        /// Anchor day (YYYY-MM-DD); defaults to the latest day with data
        #[arg(long)]
        day: Option<String>,

        /// Override the anomaly |z| threshold
        #[arg(long)]
        threshold: Option<f64>,

        /// Override the baseline window length in days
        #[arg(long)]
        window_days: Option<u32>,

        /// Score against stored baselines instead of the rolling window
        #[arg(long)]
        stored: bool,

        /// Only evaluate these configured signals (comma separated)
        #[arg(long, value_delimiter = ',')]
        signals: Vec<String>,
    },

    /// Today vs. baseline for every explanation feature
    Snapshot {
        #[command(flatten)]
        input: RowInput,

        #[command(flatten)]
        output: ReportOutput,

        #[arg(short, long)]
        user: String,

        /// Day (YYYY-MM-DD); defaults to the latest day with data
        #[arg(long)]
        day: Option<String>,
    },

    /// Today vs. baseline with labels, population ranges and direction
    Context {
        #[command(flatten)]
        input: RowInput,

        #[command(flatten)]
        output: ReportOutput,

        #[arg(short, long)]
        user: String,

        /// Day (YYYY-MM-DD); defaults to the latest day with data
        #[arg(long)]
        day: Option<String>,
    },

    /// Recent daily series for explanation features
    Trend {
        #[command(flatten)]
        input: RowInput,

        #[command(flatten)]
        output: ReportOutput,

        #[arg(short, long)]
        user: String,

        /// Feature keys (comma separated)
        #[arg(long, value_delimiter = ',')]
        features: Vec<String>,

        /// Number of days (clamped to 3..=90)
        #[arg(long, default_value = "30")]
        days: u32,
    },

    /// Compute baselines to persist for stored-mode reports
    Calibrate {
        #[command(flatten)]
        input: RowInput,

        #[command(flatten)]
        output: ReportOutput,

        #[arg(short, long)]
        user: String,

        /// Anchor day (YYYY-MM-DD); defaults to the latest day with data
        #[arg(long)]
        day: Option<String>,

        /// Write the bare snapshot to this file for later --baselines use
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Aggregate raw device events into daily rows
    Rollup {
        /// Events file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        #[command(flatten)]
        output: ReportOutput,

        /// UTC day to roll up (YYYY-MM-DD)
        #[arg(long)]
        day: String,

        /// Only roll up this user
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Plan daily health flags
    Flags {
        #[command(flatten)]
        input: RowInput,

        #[command(flatten)]
        output: ReportOutput,

        /// Day (YYYY-MM-DD)
        #[arg(long)]
        day: String,

        /// Only evaluate this user
        #[arg(short, long)]
        user: Option<String>,

        /// Flags already recorded (JSON array or NDJSON), skipped as duplicates
        #[arg(long)]
        existing: Option<PathBuf>,
    },

    /// Diagnose configuration and input files
    Doctor {
        /// Metric rows file to check
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Baselines snapshot file to check
        #[arg(long)]
        baselines: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct RowInput {
    /// Metric rows file path (use - for stdin)
    #[arg(short, long)]
    input: PathBuf,

    /// Input format
    #[arg(long, default_value = "ndjson")]
    input_format: InputFormat,

    /// Calibrated baselines snapshot (JSON) to load into the source
    #[arg(long)]
    baselines: Option<PathBuf>,
}

#[derive(Args)]
struct ReportOutput {
    /// Output file path (use - for stdout)
    #[arg(short, long, default_value = "-")]
    output: PathBuf,

    /// Output format
    #[arg(long, default_value = "json-pretty")]
    output_format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Single-line JSON followed by a newline
    Ndjson,
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Initializes tracing on stderr using `level` unless RUST_LOG is set
fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("vitals_baseline={level},vitals={level}");
    let filter_directive = std::env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);
    let filter = EnvFilter::new(filter_directive);

    if json {
        let _ = fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .try_init();
    }
}

fn run(cli: Cli) -> Result<(), VitalsCliError> {
    let config_path = cli.config.as_deref();
    let encoder = ReportEncoder::new();

    match cli.command {
        Commands::Anomaly {
            input,
            output,
            user,
            day,
            threshold,
            window_days,
            stored,
            signals,
        } => {
            let mut config = load_config(config_path)?;
            if let Some(threshold) = threshold {
                config.anomaly_threshold = threshold;
            }
            if let Some(days) = window_days {
                config.anomaly_window.length_days = days;
            }
            if stored {
                config.baseline_mode = BaselineMode::Stored;
            }
            if !signals.is_empty() {
                let selected = signals
                    .iter()
                    .map(|name| config.signal(name).cloned())
                    .collect::<Result<Vec<_>, _>>()?;
                config.signals = selected;
            }
            config.validate()?;

            let source = load_source(&input)?;
            let day = parse_optional_day(day.as_deref())?;
            let report = BaselineService::new(&source, &config).anomaly_report(&user, day)?;
            write_report(&encoder, ReportKind::Anomaly, &report, &output)
        }

        Commands::Snapshot {
            input,
            output,
            user,
            day,
        } => {
            let config = load_config(config_path)?;
            let source = load_source(&input)?;
            let day = parse_optional_day(day.as_deref())?;
            let snapshot = BaselineService::new(&source, &config).metric_snapshot(&user, day)?;
            write_report(&encoder, ReportKind::Snapshot, &snapshot, &output)
        }

        Commands::Context {
            input,
            output,
            user,
            day,
        } => {
            let config = load_config(config_path)?;
            let source = load_source(&input)?;
            let day = parse_optional_day(day.as_deref())?;
            let context = BaselineService::new(&source, &config).feature_context(&user, day)?;
            write_report(&encoder, ReportKind::Context, &context, &output)
        }

        Commands::Trend {
            input,
            output,
            user,
            features,
            days,
        } => {
            let config = load_config(config_path)?;
            let source = load_source(&input)?;
            let features = if features.is_empty() {
                DEFAULT_TREND_FEATURES.iter().map(|f| f.to_string()).collect()
            } else {
                features
            };
            let trend = BaselineService::new(&source, &config).trend(&user, &features, days)?;
            write_report(&encoder, ReportKind::Trend, &trend, &output)
        }

        Commands::Calibrate {
            input,
            output,
            user,
            day,
            save,
        } => {
            let config = load_config(config_path)?;
            let source = load_source(&input)?;
            let day = parse_optional_day(day.as_deref())?;
            let snapshot = BaselineService::new(&source, &config).calibrate(&user, day)?;

            if let Some(path) = save {
                fs::write(&path, snapshot.to_json()?)?;
                info!(path = %path.display(), id = %snapshot.id, "Baselines saved");
            }
            write_report(&encoder, ReportKind::Calibration, &snapshot, &output)
        }

        Commands::Rollup {
            input,
            input_format,
            output,
            day,
            user,
        } => {
            let data = read_input(&input)?;
            let events: Vec<RawMetricEvent> = parse_records(&data, input_format)?;
            let day = parse_day(&day)?;
            let summary = rollup_day(&events, day, user.as_deref());
            info!(
                day = %summary.day,
                users = summary.users,
                skipped = summary.skipped_events,
                "Rollup complete"
            );
            write_report(&encoder, ReportKind::Rollup, &summary, &output)
        }

        Commands::Flags {
            input,
            output,
            day,
            user,
            existing,
        } => {
            let config = load_config(config_path)?;
            let source = load_source(&input)?;
            let day = parse_day(&day)?;
            let service = BaselineService::new(&source, &config);

            let users = match user {
                Some(user) => vec![user],
                None => source.users(),
            };
            let mut planned = Vec::new();
            for user in &users {
                planned.extend(service.flags_for_day(user, day)?);
            }

            let existing: Vec<Flag> = match existing {
                Some(path) => {
                    let data = read_input(&path)?;
                    parse_records(&data, detect_format(&data))?
                }
                None => Vec::new(),
            };
            let plan = FlagPlan::new(planned, &existing);
            write_report(&encoder, ReportKind::Flags, &plan, &output)
        }

        Commands::Doctor {
            input,
            input_format,
            baselines,
            json,
        } => cmd_doctor(
            config_path,
            input.as_deref(),
            input_format,
            baselines.as_deref(),
            json,
        ),
    }
}

fn cmd_doctor(
    config: Option<&Path>,
    input: Option<&Path>,
    input_format: InputFormat,
    baselines: Option<&Path>,
    json: bool,
) -> Result<(), VitalsCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("{} {}", PRODUCER_NAME, VERSION),
    });

    // Config file, or the defaults when none is given
    let config_check = match config {
        Some(path) => match EngineConfig::load(path) {
            Ok(config) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "Config valid ({} signals, {:?} baselines)",
                    config.signals.len(),
                    config.baseline_mode
                ),
            },
            Err(e) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            },
        },
        None => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: "No config file, using defaults".to_string(),
        },
    };
    checks.push(config_check);

    if let Some(path) = input {
        let check = match read_input(path)
            .map_err(VitalsCliError::from)
            .and_then(|data| parse_records::<UserMetricRow>(&data, input_format))
        {
            Ok(rows) => {
                let source = InMemorySource::from_rows(rows);
                DoctorCheck {
                    name: "input".to_string(),
                    status: if source.is_empty() {
                        CheckStatus::Warning
                    } else {
                        CheckStatus::Ok
                    },
                    message: format!(
                        "{} rows for {} users",
                        source.len(),
                        source.users().len()
                    ),
                }
            }
            Err(e) => DoctorCheck {
                name: "input".to_string(),
                status: CheckStatus::Error,
                message: CliError::from(e).message,
            },
        };
        checks.push(check);
    }

    if let Some(path) = baselines {
        let check = if !path.exists() {
            DoctorCheck {
                name: "baselines".to_string(),
                status: CheckStatus::Warning,
                message: "Baselines file does not exist".to_string(),
            }
        } else {
            match fs::read_to_string(path)
                .map_err(BaselineError::from)
                .and_then(|s| BaselineSnapshot::from_json(&s).map_err(BaselineError::from))
            {
                Ok(snapshot) => DoctorCheck {
                    name: "baselines".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "Snapshot {} for {} ({} signals, anchor {})",
                        snapshot.id,
                        snapshot.user,
                        snapshot.baselines.len(),
                        snapshot.anchor
                    ),
                },
                Err(e) => DoctorCheck {
                    name: "baselines".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                },
            }
        };
        checks.push(check);
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass input files with --input)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (--input - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Vitals Doctor Report");
        println!("====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(VitalsCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn load_config(path: Option<&Path>) -> Result<EngineConfig, VitalsCliError> {
    match path {
        Some(path) => {
            debug!(path = %path.display(), "Loading config");
            Ok(EngineConfig::load(path)?)
        }
        None => Ok(EngineConfig::default()),
    }
}

fn read_input(path: &Path) -> Result<String, io::Error> {
    if path.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        fs::read_to_string(path)
    }
}

fn parse_records<T>(data: &str, format: InputFormat) -> Result<Vec<T>, VitalsCliError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let records = match format {
        InputFormat::Ndjson => parse_ndjson(data)?,
        InputFormat::Json => parse_array(data)?,
    };
    Ok(records)
}

/// JSON arrays start with `[`; anything else is read as NDJSON
fn detect_format(data: &str) -> InputFormat {
    if data.trim_start().starts_with('[') {
        InputFormat::Json
    } else {
        InputFormat::Ndjson
    }
}

fn load_source(input: &RowInput) -> Result<InMemorySource, VitalsCliError> {
    let data = read_input(&input.input)?;
    let rows: Vec<UserMetricRow> = parse_records(&data, input.input_format)?;
    if rows.is_empty() {
        return Err(VitalsCliError::NoRows);
    }

    let mut source = InMemorySource::from_rows(rows);
    if let Some(path) = &input.baselines {
        let snapshot = BaselineSnapshot::from_json(&fs::read_to_string(path)?)?;
        debug!(user = %snapshot.user, id = %snapshot.id, "Loaded stored baselines");
        source.store_snapshot(&snapshot);
    }

    debug!(rows = source.len(), users = source.users().len(), "Metric rows loaded");
    Ok(source)
}

fn parse_day(s: &str) -> Result<NaiveDate, BaselineError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| BaselineError::DateParseError(format!("{s}: {e}")))
}

fn parse_optional_day(s: Option<&str>) -> Result<Option<NaiveDate>, BaselineError> {
    s.map(parse_day).transpose()
}

fn format_output<T: Serialize>(value: &T, format: OutputFormat) -> Result<String, VitalsCliError> {
    match format {
        OutputFormat::Ndjson => Ok(serde_json::to_string(value)? + "\n"),
        OutputFormat::Json => Ok(serde_json::to_string(value)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(value)? + "\n"),
    }
}

fn write_report<T: Serialize>(
    encoder: &ReportEncoder,
    kind: ReportKind,
    report: &T,
    output: &ReportOutput,
) -> Result<(), VitalsCliError> {
    let envelope = encoder.encode(kind, report);
    let data = format_output(&envelope, output.output_format)?;

    if output.output.to_string_lossy() == "-" {
        print!("{}", data);
    } else {
        fs::write(&output.output, data)?;
    }
    Ok(())
}

// Error types

#[derive(Debug)]
enum VitalsCliError {
    Io(io::Error),
    Engine(BaselineError),
    Json(serde_json::Error),
    NoRows,
    DoctorFailed,
}

impl From<io::Error> for VitalsCliError {
    fn from(e: io::Error) -> Self {
        VitalsCliError::Io(e)
    }
}

impl From<BaselineError> for VitalsCliError {
    fn from(e: BaselineError) -> Self {
        VitalsCliError::Engine(e)
    }
}

impl From<serde_json::Error> for VitalsCliError {
    fn from(e: serde_json::Error) -> Self {
        VitalsCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<VitalsCliError> for CliError {
    fn from(e: VitalsCliError) -> Self {
        match e {
            VitalsCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            VitalsCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            VitalsCliError::NoRows => CliError {
                code: "NO_ROWS".to_string(),
                message: "No metric rows found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            VitalsCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            VitalsCliError::Engine(e) => engine_error(e),
        }
    }
}

fn engine_error(e: BaselineError) -> CliError {
    let (code, hint) = match &e {
        BaselineError::ParseError(_) | BaselineError::JsonError(_) => (
            "PARSE_ERROR",
            "Rows need user_id, day (YYYY-MM-DD) and numeric metric columns",
        ),
        BaselineError::Io(_) => ("IO_ERROR", "Check file paths and permissions"),
        BaselineError::DateParseError(_) => ("DATE_ERROR", "Use YYYY-MM-DD dates"),
        BaselineError::UnknownColumn(_) | BaselineError::UnknownSignal(_) => (
            "UNKNOWN_METRIC",
            "Known columns: rhr, hrv_avg, sleep_minutes, steps, hr_avg",
        ),
        BaselineError::InvalidConfig(_) => ("CONFIG_ERROR", "Run 'vitals doctor --config <file>'"),
        BaselineError::NoMetrics { .. } => ("NO_METRICS", "Check the user id against the input"),
        BaselineError::NoRowForDay { .. } => {
            ("NO_ROW_FOR_DAY", "Pick a day with data or omit --day")
        }
        BaselineError::Source(_) => ("SOURCE_ERROR", "Check the metric source"),
    };
    CliError {
        code: code.to_string(),
        message: e.to_string(),
        hint: Some(hint.to_string()),
    }
}

// Report types

#[derive(Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}

//! Ward CLI - Command-line interface for Ward Trace
//!
//! Commands:
//! - intervals: Build contact interval files from the raw badge feed
//! - histories: Build occupancy history files from saved contact intervals
//! - run: Both stages in one pass
//! - roster: List the badges seen in each shift
//! - shifts: Print the shift table
//! - doctor: Diagnose configuration, registry and data directory

use clap::{Args, Parser, Subcommand};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use tracing_subscriber::filter::LevelFilter;

use ward_trace::persist::{self, ArtifactLayout};
use ward_trace::shifts::ShiftStatus;
use ward_trace::{
    AnchorRegistry, ShiftProcessor, ShiftReport, ShiftRoster, ShiftTable, TraceConfig, TraceError,
    VERSION,
};

/// Ward - room occupancy histories from wearable proximity badges
#[derive(Parser)]
#[command(name = "ward")]
#[command(version = VERSION)]
#[command(about = "Turn badge contact records into room occupancy histories", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Configuration file (JSON); defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Anchor registry file (JSON array of {id, room, role})
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    /// Directory holding contact_intervals/ and histories/
    #[arg(long, global = true, default_value = "data")]
    data_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace, off)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Build contact interval files from the raw badge feed
    Intervals {
        /// Raw feed (JSON array of rows, optionally gzip-compressed)
        #[arg(short, long)]
        input: PathBuf,

        /// Shift to process (repeatable); all production shifts by default
        #[arg(long = "shift", value_name = "N")]
        shifts: Vec<usize>,

        /// Output reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Build occupancy history files from saved contact intervals
    Histories {
        /// Shift to process (repeatable); all production shifts by default
        #[arg(long = "shift", value_name = "N")]
        shifts: Vec<usize>,

        /// Output reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Build contact intervals and occupancy histories in one pass
    Run {
        /// Raw feed (JSON array of rows, optionally gzip-compressed)
        #[arg(short, long)]
        input: PathBuf,

        /// Shift to process (repeatable); all production shifts by default
        #[arg(long = "shift", value_name = "N")]
        shifts: Vec<usize>,

        /// Output reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the badges seen in each shift
    Roster {
        /// Shift to list (repeatable); all production shifts by default
        #[arg(long = "shift", value_name = "N")]
        shifts: Vec<usize>,

        /// Only count the middle hours of each shift
        #[arg(long, default_value = "12")]
        center_hours: u32,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the shift table
    Shifts {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration, registry and data directory
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli.global.log_level) {
        return fail(e);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(e),
    }
}

fn fail(e: WardCliError) -> ExitCode {
    eprintln!(
        "{}",
        serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
    );
    ExitCode::FAILURE
}

fn init_logging(level: &str) -> Result<(), WardCliError> {
    let level_filter =
        LevelFilter::from_str(level).map_err(|_| WardCliError::InvalidLogLevel(level.to_string()))?;
    tracing_subscriber::fmt()
        .with_max_level(level_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
    Ok(())
}

fn run(cli: Cli) -> Result<(), WardCliError> {
    let global = cli.global;
    match cli.command {
        Commands::Intervals {
            input,
            shifts,
            json,
        } => cmd_intervals(&global, &input, &shifts, json),

        Commands::Histories { shifts, json } => cmd_histories(&global, &shifts, json),

        Commands::Run {
            input,
            shifts,
            json,
        } => cmd_run(&global, &input, &shifts, json),

        Commands::Roster {
            shifts,
            center_hours,
            json,
        } => cmd_roster(&global, &shifts, center_hours, json),

        Commands::Shifts { json } => cmd_shifts(&global, json),

        Commands::Doctor { json } => cmd_doctor(&global, json),
    }
}

fn load_config(global: &GlobalArgs) -> Result<TraceConfig, WardCliError> {
    match &global.config {
        Some(path) => Ok(TraceConfig::load(path)?),
        None => Ok(TraceConfig::default()),
    }
}

fn load_registry(global: &GlobalArgs) -> Result<AnchorRegistry, WardCliError> {
    let path = global.registry.as_deref().ok_or(WardCliError::MissingRegistry)?;
    Ok(AnchorRegistry::load(path)?)
}

fn selected_shifts(table: &ShiftTable, requested: &[usize]) -> Vec<usize> {
    if requested.is_empty() {
        table.production_indices().collect()
    } else {
        requested.to_vec()
    }
}

fn cmd_intervals(
    global: &GlobalArgs,
    input: &Path,
    shifts: &[usize],
    json: bool,
) -> Result<(), WardCliError> {
    let config = load_config(global)?;
    // interval building never consults anchor rooms
    let processor = ShiftProcessor::new(config, AnchorRegistry::default())?;
    let style = processor.config().timestamp_style;
    let feed = persist::read_raw_feed(input, style, processor.table())?;
    let shifts = selected_shifts(processor.table(), shifts);

    let layout = ArtifactLayout::new(&global.data_dir);
    let reports = processor.run_intervals(&layout, &feed, &shifts);
    print_reports(&reports, json)
}

fn cmd_histories(global: &GlobalArgs, shifts: &[usize], json: bool) -> Result<(), WardCliError> {
    let processor = ShiftProcessor::new(load_config(global)?, load_registry(global)?)?;
    let shifts = selected_shifts(processor.table(), shifts);

    let layout = ArtifactLayout::new(&global.data_dir);
    let reports = processor.run_histories(&layout, &shifts);
    print_reports(&reports, json)
}

fn cmd_run(
    global: &GlobalArgs,
    input: &Path,
    shifts: &[usize],
    json: bool,
) -> Result<(), WardCliError> {
    let processor = ShiftProcessor::new(load_config(global)?, load_registry(global)?)?;
    let style = processor.config().timestamp_style;
    let feed = persist::read_raw_feed(input, style, processor.table())?;
    let shifts = selected_shifts(processor.table(), shifts);

    let layout = ArtifactLayout::new(&global.data_dir);
    let reports = processor.run(&layout, &feed, &shifts);
    print_reports(&reports, json)
}

fn print_reports(reports: &[ShiftReport], json: bool) -> Result<(), WardCliError> {
    if json {
        println!("{}", serde_json::to_string_pretty(reports)?);
    } else {
        for report in reports {
            let status = if report.is_ok() { "[OK]" } else { "[FAILED]" };
            let mut line = format!("  {} shift {:02}", status, report.shift);
            if let Some(intervals) = report.intervals {
                line.push_str(&format!("  intervals: {intervals}"));
            }
            if let Some(seconds) = report.seconds {
                line.push_str(&format!("  seconds: {seconds}"));
            }
            if let Some(badges) = report.badges {
                line.push_str(&format!("  badges: {badges}"));
            }
            if let Some(message) = &report.message {
                line.push_str(&format!("  {message}"));
            }
            println!("{line}");
        }
    }

    let failed = reports.iter().filter(|r| !r.is_ok()).count();
    if failed > 0 {
        Err(WardCliError::ShiftsFailed(failed))
    } else {
        Ok(())
    }
}

fn cmd_roster(
    global: &GlobalArgs,
    shifts: &[usize],
    center_hours: u32,
    json: bool,
) -> Result<(), WardCliError> {
    let config = load_config(global)?;
    let table = ShiftTable::new(&config.shifts);
    let layout = ArtifactLayout::new(&global.data_dir);

    let mut entries = Vec::new();
    for shift in selected_shifts(&table, shifts) {
        let window = table.production_window(shift)?;
        let path = layout.intervals_path(shift);
        let intervals = persist::read_intervals(&path, config.timestamp_style)?;
        let hours = config.shifts.shift_hours;
        let full = ShiftRoster::from_intervals(&intervals, hours, hours)?;
        let center = ShiftRoster::from_intervals(&intervals, hours, center_hours)?;
        entries.push(RosterEntry {
            shift,
            night: window.is_night(),
            full_shift: full.total(),
            center_hours,
            in_center: center.total(),
            roster: center,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for entry in &entries {
            println!(
                "Badge count shift {:2} ({} {:5})  full shift: {:3}, middle {} hours: {:3}",
                entry.shift,
                entry.roster.day_of_week,
                if entry.night { "night" } else { "day" },
                entry.full_shift,
                entry.center_hours,
                entry.in_center
            );
        }
    }
    Ok(())
}

fn cmd_shifts(global: &GlobalArgs, json: bool) -> Result<(), WardCliError> {
    let config = load_config(global)?;
    let table = ShiftTable::new(&config.shifts);
    let windows = (0..table.window_count())
        .map(|n| table.window(n))
        .collect::<Result<Vec<_>, _>>()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&windows)?);
    } else {
        println!("Shift Table");
        println!("===========");
        for window in &windows {
            let status = match window.status {
                ShiftStatus::Validation => "validation",
                ShiftStatus::Incomplete => "incomplete",
                ShiftStatus::Complete => "complete",
            };
            println!(
                "  {:2}  {}  ->  {}  {:5}  {}",
                window.index,
                window.start,
                window.end,
                if window.is_night() { "night" } else { "day" },
                status
            );
        }
    }
    Ok(())
}

fn cmd_doctor(global: &GlobalArgs, json: bool) -> Result<(), WardCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Ward Trace version {}", VERSION),
    });

    let config = match load_config(global) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: match &global.config {
                    Some(path) => format!(
                        "Configuration {} is valid ({} timestamps)",
                        path.display(),
                        config.timestamp_style.as_str()
                    ),
                    None => format!(
                        "Using built-in defaults ({} timestamps)",
                        config.timestamp_style.as_str()
                    ),
                },
            });
            config
        }
        Err(e) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: CliError::from(e).message,
            });
            TraceConfig::default()
        }
    };

    let table = ShiftTable::new(&config.shifts);
    let bad_windows: Vec<String> = table
        .production_indices()
        .filter_map(|n| table.production_window(n).err())
        .map(|e| e.to_string())
        .collect();
    checks.push(if bad_windows.is_empty() {
        DoctorCheck {
            name: "shifts".to_string(),
            status: CheckStatus::Ok,
            message: format!(
                "{} production shifts of {} hours",
                table.production_indices().count(),
                config.shifts.shift_hours
            ),
        }
    } else {
        DoctorCheck {
            name: "shifts".to_string(),
            status: CheckStatus::Error,
            message: bad_windows.join("; "),
        }
    });

    checks.push(match load_registry(global) {
        Ok(registry) => {
            let doorless: Vec<String> = registry
                .rooms()
                .into_iter()
                .filter(|room| !registry.anchors_of(room).iter().any(|id| registry.is_door(id)))
                .map(|room| room.to_string())
                .collect();
            if doorless.is_empty() {
                DoctorCheck {
                    name: "registry".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "{} anchors in {} rooms",
                        registry.len(),
                        registry.rooms().len()
                    ),
                }
            } else {
                DoctorCheck {
                    name: "registry".to_string(),
                    status: CheckStatus::Warning,
                    message: format!("Rooms without a door anchor: {}", doorless.join(", ")),
                }
            }
        }
        Err(WardCliError::MissingRegistry) => DoctorCheck {
            name: "registry".to_string(),
            status: CheckStatus::Warning,
            message: "No registry given; histories cannot be built".to_string(),
        },
        Err(e) => DoctorCheck {
            name: "registry".to_string(),
            status: CheckStatus::Error,
            message: CliError::from(e).message,
        },
    });

    let layout = ArtifactLayout::new(&global.data_dir);
    checks.push(if layout.root().is_dir() {
        let count = |path: fn(&ArtifactLayout, usize) -> PathBuf| {
            table
                .production_indices()
                .filter(|&n| path(&layout, n).exists())
                .count()
        };
        DoctorCheck {
            name: "data_dir".to_string(),
            status: CheckStatus::Ok,
            message: format!(
                "{}: {} interval files, {} history files",
                layout.root().display(),
                count(ArtifactLayout::intervals_path),
                count(ArtifactLayout::history_path)
            ),
        }
    } else {
        DoctorCheck {
            name: "data_dir".to_string(),
            status: CheckStatus::Warning,
            message: format!("{} does not exist yet", layout.root().display()),
        }
    });

    let report = DoctorReport {
        version: VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Ward Doctor Report");
        println!("==================");
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

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(WardCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Error types

#[derive(Debug)]
enum WardCliError {
    Io(io::Error),
    Trace(TraceError),
    Json(serde_json::Error),
    MissingRegistry,
    InvalidLogLevel(String),
    ShiftsFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for WardCliError {
    fn from(e: io::Error) -> Self {
        WardCliError::Io(e)
    }
}

impl From<TraceError> for WardCliError {
    fn from(e: TraceError) -> Self {
        WardCliError::Trace(e)
    }
}

impl From<serde_json::Error> for WardCliError {
    fn from(e: serde_json::Error) -> Self {
        WardCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<WardCliError> for CliError {
    fn from(e: WardCliError) -> Self {
        match e {
            WardCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            WardCliError::Trace(e) => {
                let (code, hint) = match &e {
                    TraceError::Timestamp { .. } => (
                        "TIMESTAMP_ERROR",
                        "Check timestamp_style in the configuration matches the input",
                    ),
                    TraceError::StructuralViolation(_) => (
                        "STRUCTURAL_VIOLATION",
                        "Check the shift boundaries and input files",
                    ),
                    TraceError::ExcludedShift(_) | TraceError::UnknownShift(_) => {
                        ("SHIFT_ERROR", "Run 'ward shifts' to list production shifts")
                    }
                    TraceError::NotADoor(_) => ("REGISTRY_ERROR", "Check the anchor registry"),
                    TraceError::NoIntervals => {
                        ("NO_INTERVALS", "Ensure the shift has contact records")
                    }
                    TraceError::Config(_) => ("CONFIG_ERROR", "Fix the configuration file"),
                    TraceError::Json(_) => ("JSON_ERROR", "Check JSON syntax"),
                    TraceError::Io(_) => ("IO_ERROR", "Check file paths and permissions"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            WardCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            WardCliError::MissingRegistry => CliError {
                code: "MISSING_REGISTRY".to_string(),
                message: "An anchor registry is required for this command".to_string(),
                hint: Some("Pass --registry <FILE>".to_string()),
            },
            WardCliError::InvalidLogLevel(level) => CliError {
                code: "INVALID_LOG_LEVEL".to_string(),
                message: format!("Unknown log level: {}", level),
                hint: Some("Use one of error, warn, info, debug, trace, off".to_string()),
            },
            WardCliError::ShiftsFailed(count) => CliError {
                code: "SHIFTS_FAILED".to_string(),
                message: format!("{} shifts failed", count),
                hint: Some("See the shift reports and log for details".to_string()),
            },
            WardCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct RosterEntry {
    shift: usize,
    night: bool,
    full_shift: usize,
    center_hours: u32,
    in_center: usize,
    roster: ShiftRoster,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}

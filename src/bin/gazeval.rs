//! gazeval CLI - Command-line interface for gazeval
//!
//! Commands:
//! - import: Import record folders into NDJSON tables
//! - validate: Check record files without importing them
//! - matrix: Bin a target table into per-session matrices
//! - aggregate: Combine session matrices into one matrix

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gazeval::record::{discover_record_files, read_record};
use gazeval::tables::parse_ndjson;
use gazeval::types::TargetRow;
use gazeval::{
    aggregate_matrices, import_folders, session_matrices, AnalysisConfig, AnalysisError,
    BinningConfig, Reduction, TargetMatrix, GAZEVAL_VERSION, PRODUCER_NAME,
};

/// gazeval - Eye-tracker validation analysis
#[derive(Parser)]
#[command(name = "gazeval")]
#[command(version = GAZEVAL_VERSION)]
#[command(
    about = "Anonymize, flatten and spatially aggregate eye-tracker validation data",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import record folders into session, target and sample tables
    Import {
        /// Folders holding record files (searched non-recursively)
        #[arg(required = true)]
        folders: Vec<PathBuf>,

        /// Output directory for the tables
        #[arg(short, long)]
        output: PathBuf,

        /// Anonymization salt
        #[arg(long, env = "GAZEVAL_SALT", hide_env_values = true)]
        salt: Option<String>,

        /// Analysis configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// First sample index per target
        #[arg(long)]
        start_sample: Option<usize>,

        /// Last sample index per target (inclusive)
        #[arg(long)]
        end_sample: Option<usize>,

        /// Outlier threshold in degrees
        #[arg(long)]
        outlier_threshold: Option<f64>,
    },

    /// Check record files without importing them
    Validate {
        /// Folders holding record files
        #[arg(required = true)]
        folders: Vec<PathBuf>,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Bin a target table into one matrix per session
    Matrix {
        /// Target table (NDJSON, use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,

        /// Analysis configuration file; its binning section is used
        #[arg(long)]
        config: Option<PathBuf>,

        /// Lattice spacing in degrees
        #[arg(long)]
        grid: Option<f64>,

        /// Horizontal extent in degrees
        #[arg(long, num_args = 2, value_names = ["MIN", "MAX"], allow_negative_numbers = true)]
        x_range: Option<Vec<f64>>,

        /// Vertical extent in degrees
        #[arg(long, num_args = 2, value_names = ["MIN", "MAX"], allow_negative_numbers = true)]
        y_range: Option<Vec<f64>>,

        /// Derive the extent from each session's targets
        #[arg(long, conflicts_with_all = ["x_range", "y_range"])]
        data_extent: bool,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Aggregate session matrices into one matrix
    Aggregate {
        /// Matrices to combine (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Per-cell reduction
        #[arg(long, default_value = "mean")]
        reduction: ReductionArg,

        /// Pretty-print the result
        #[arg(long)]
        pretty: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one matrix per line)
    Ndjson,
    /// JSON array of matrices
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one matrix per line)
    Ndjson,
    /// JSON array of matrices
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Clone, Copy, ValueEnum)]
enum ReductionArg {
    /// Arithmetic mean; a missing cell in any input stays missing
    Mean,
    /// Mean over the defined cells
    NanMean,
    /// Median; a missing cell in any input stays missing
    Median,
    /// Median over the defined cells
    NanMedian,
}

impl From<ReductionArg> for Reduction {
    fn from(arg: ReductionArg) -> Self {
        match arg {
            ReductionArg::Mean => Reduction::Mean,
            ReductionArg::NanMean => Reduction::NanMean,
            ReductionArg::Median => Reduction::Median,
            ReductionArg::NanMedian => Reduction::NanMedian,
        }
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

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

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), GazevalCliError> {
    match cli.command {
        Commands::Import {
            folders,
            output,
            salt,
            config,
            start_sample,
            end_sample,
            outlier_threshold,
        } => {
            let mut analysis = load_config(config.as_deref())?;
            if let Some(salt) = salt {
                analysis.salt = salt;
            }
            if let Some(start) = start_sample {
                analysis.sample_window.start = start;
            }
            if let Some(end) = end_sample {
                analysis.sample_window.end = end;
            }
            if let Some(threshold) = outlier_threshold {
                analysis.outlier_threshold_deg = threshold;
            }
            cmd_import(&folders, &output, &analysis)
        }

        Commands::Validate { folders, json } => cmd_validate(&folders, json),

        Commands::Matrix {
            input,
            output,
            config,
            grid,
            x_range,
            y_range,
            data_extent,
            output_format,
        } => {
            let mut binning = load_config(config.as_deref())?.binning;
            if let Some(grid) = grid {
                binning.grid = grid;
            }
            if let Some(range) = x_range {
                binning.x_range = Some(extent(&range)?);
            }
            if let Some(range) = y_range {
                binning.y_range = Some(extent(&range)?);
            }
            if data_extent {
                binning.x_range = None;
                binning.y_range = None;
            }
            cmd_matrix(&input, &output, &binning, &output_format)
        }

        Commands::Aggregate {
            input,
            output,
            input_format,
            reduction,
            pretty,
        } => cmd_aggregate(&input, &output, input_format, reduction.into(), pretty),
    }
}

fn cmd_import(
    folders: &[PathBuf],
    output: &Path,
    config: &AnalysisConfig,
) -> Result<(), GazevalCliError> {
    let tables = import_folders(folders, config)?;
    if tables.sessions.is_empty() {
        return Err(GazevalCliError::NoRecords);
    }
    tables.write_dir(output)?;
    info!(output = %output.display(), "tables written");

    println!("{}", serde_json::to_string_pretty(&tables.manifest)?);
    Ok(())
}

fn cmd_validate(folders: &[PathBuf], json: bool) -> Result<(), GazevalCliError> {
    let files = discover_record_files(folders)?;

    let errors: Vec<ValidationErrorDetail> = files
        .iter()
        .filter_map(|path| {
            read_record(path).err().map(|e| ValidationErrorDetail {
                file: path.clone(),
                error: e.to_string(),
            })
        })
        .collect();

    let report = ValidationReport {
        producer: PRODUCER_NAME.to_string(),
        version: GAZEVAL_VERSION.to_string(),
        total_files: files.len(),
        valid_files: files.len() - errors.len(),
        invalid_files: errors.len(),
        errors,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total files:   {}", report.total_files);
        println!("Valid files:   {}", report.valid_files);
        println!("Invalid files: {}", report.invalid_files);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - {}: {}", err.file.display(), err.error);
            }
        }
    }

    if report.invalid_files > 0 {
        Err(GazevalCliError::ValidationFailed(report.invalid_files))
    } else {
        Ok(())
    }
}

fn cmd_matrix(
    input: &Path,
    output: &Path,
    binning: &BinningConfig,
    output_format: &OutputFormat,
) -> Result<(), GazevalCliError> {
    let targets: Vec<TargetRow> = parse_ndjson(&read_input(input)?)?;
    if targets.is_empty() {
        return Err(GazevalCliError::NoTargets);
    }

    let matrices = session_matrices(&targets, binning)?;
    info!(sessions = matrices.len(), "binned session matrices");

    write_output(output, &format_output(&matrices, output_format)?)
}

fn cmd_aggregate(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    reduction: Reduction,
    pretty: bool,
) -> Result<(), GazevalCliError> {
    let input_data = read_input(input)?;
    let matrices: Vec<TargetMatrix> = match input_format {
        InputFormat::Ndjson => parse_ndjson(&input_data)?,
        InputFormat::Json => serde_json::from_str(&input_data)?,
    };

    let aggregate = aggregate_matrices(&matrices, reduction)?;
    info!(reduction = reduction.as_str(), n = aggregate.n, "aggregated matrices");

    let output_data = if pretty {
        serde_json::to_string_pretty(&aggregate)?
    } else {
        serde_json::to_string(&aggregate)?
    };
    write_output(output, &(output_data + "\n"))
}

// Helper functions

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig, GazevalCliError> {
    match path {
        Some(path) => Ok(AnalysisConfig::from_path(path)?),
        None => Ok(AnalysisConfig::default()),
    }
}

fn extent(values: &[f64]) -> Result<(f64, f64), GazevalCliError> {
    match values {
        [min, max] => Ok((*min, *max)),
        _ => Err(GazevalCliError::Usage(
            "an extent needs exactly two values: MIN MAX".to_string(),
        )),
    }
}

fn read_input(input: &Path) -> Result<String, GazevalCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn write_output(output: &Path, data: &str) -> Result<(), GazevalCliError> {
    if output.to_string_lossy() == "-" {
        print!("{}", data);
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

fn format_output<T: Serialize>(
    items: &[T],
    format: &OutputFormat,
) -> Result<String, GazevalCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for item in items {
                lines.push(serde_json::to_string(item)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(items)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(items)?),
    }
}

// Error handling

#[derive(Debug)]
enum GazevalCliError {
    Io(io::Error),
    Analysis(AnalysisError),
    Json(serde_json::Error),
    Usage(String),
    NoRecords,
    NoTargets,
    ValidationFailed(usize),
}

impl From<io::Error> for GazevalCliError {
    fn from(e: io::Error) -> Self {
        GazevalCliError::Io(e)
    }
}

impl From<AnalysisError> for GazevalCliError {
    fn from(e: AnalysisError) -> Self {
        GazevalCliError::Analysis(e)
    }
}

impl From<serde_json::Error> for GazevalCliError {
    fn from(e: serde_json::Error) -> Self {
        GazevalCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<GazevalCliError> for CliError {
    fn from(e: GazevalCliError) -> Self {
        match e {
            GazevalCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            GazevalCliError::Analysis(e) => analysis_error(e),
            GazevalCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            GazevalCliError::Usage(msg) => CliError {
                code: "USAGE_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'gazeval help' for usage".to_string()),
            },
            GazevalCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No record files found in the given folders".to_string(),
                hint: Some(
                    "Record files must end in .json and sit directly in the folder".to_string(),
                ),
            },
            GazevalCliError::NoTargets => CliError {
                code: "NO_TARGETS".to_string(),
                message: "No target rows found in input".to_string(),
                hint: Some("Pass the targets.ndjson written by 'gazeval import'".to_string()),
            },
            GazevalCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} record files failed validation", count),
                hint: Some("Fix the listed files and retry".to_string()),
            },
        }
    }
}

fn analysis_error(e: AnalysisError) -> CliError {
    let (code, hint) = match &e {
        AnalysisError::Parse { .. } | AnalysisError::MissingField { .. } => (
            "PARSE_ERROR",
            "Run 'gazeval validate' on the folder for details",
        ),
        AnalysisError::Configuration(_) => (
            "CONFIG_ERROR",
            "Check the configuration file, the salt and the command-line overrides",
        ),
        AnalysisError::Consistency { .. } => (
            "CONSISTENCY_ERROR",
            "Bin all sessions with the same grid and extent before aggregating",
        ),
        AnalysisError::JsonError(_) => ("JSON_ERROR", "Check JSON syntax"),
        AnalysisError::Io(_) => ("IO_ERROR", "Check file paths and permissions"),
    };
    CliError {
        code: code.to_string(),
        message: e.to_string(),
        hint: Some(hint.to_string()),
    }
}

// Report types

#[derive(Serialize)]
struct ValidationReport {
    producer: String,
    version: String,
    total_files: usize,
    valid_files: usize,
    invalid_files: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(Serialize)]
struct ValidationErrorDetail {
    file: PathBuf,
    error: String,
}

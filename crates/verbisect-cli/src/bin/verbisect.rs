//! verbisect CLI: find which component upgrade broke a check

use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{info, warn};
use snafu::Snafu;
use std::error::Error as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Arc;
use std::time::Duration;
use verbisect_cli::{
    format_diff, format_result, load_environment, load_repository, load_result, load_sequence,
    result_to_json, save_result, CommandOracle, InputError, SerializeError,
};
use verbisect_core::{
    diff, BisectError, BisectionResult, Bisector, CancelToken, EndpointsOnly, EnumerationError,
    Outcome, SearchConfig,
};

const EXIT_FOUND: u8 = 0;
const EXIT_NOT_FOUND: u8 = 3;
const EXIT_ERROR: u8 = 4;
const EXIT_INCOMPLETE: u8 = 5;

/// CLI errors for the verbisect binary.
#[derive(Debug, Snafu)]
enum CliError {
    #[snafu(display("Input error"), context(false))]
    Input { source: InputError },
    #[snafu(display("Bisection failed"), context(false))]
    Bisect { source: BisectError },
    #[snafu(display("Cannot compute diff"), context(false))]
    Enumeration { source: EnumerationError },
    #[snafu(display("Report error"), context(false))]
    Serialize { source: SerializeError },
    #[snafu(display("JSON error"), context(false))]
    Json { source: serde_json::Error },
}

#[derive(Parser)]
#[command(name = "verbisect")]
#[command(about = "Bisect component version changes to find what broke a check")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search for the change that makes the check fail
    Run(RunArgs),

    /// Show the changed components between two environments
    Diff {
        /// Known-good environment file
        #[arg(long)]
        good: PathBuf,

        /// Known-bad environment file
        #[arg(long)]
        bad: PathBuf,

        /// JSON version index used to enumerate intermediate versions
        #[arg(long)]
        versions: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Print a saved report
    Show {
        /// Path to a report written by `run --output`
        report: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Args)]
#[command(group(
    clap::ArgGroup::new("input")
        .required(true)
        .args(["good", "sequence"])
))]
struct RunArgs {
    /// Known-good environment file (JSON object or `name==version` lines)
    #[arg(long, requires = "bad")]
    good: Option<PathBuf>,

    /// Known-bad environment file
    #[arg(long, requires = "good")]
    bad: Option<PathBuf>,

    /// JSON version index used to enumerate intermediate versions
    #[arg(long, requires = "good")]
    versions: Option<PathBuf>,

    /// Ordered snapshot files, or one JSON file holding an array of snapshots
    #[arg(long, num_args = 1.., conflicts_with_all = ["good", "bad", "versions"])]
    sequence: Vec<PathBuf>,

    /// Command that sets up each snapshot before the check runs
    #[arg(long)]
    materialize: Option<String>,

    /// Per-probe timeout in seconds
    #[arg(long, value_parser = parse_seconds)]
    timeout: Option<Duration>,

    /// Probes to run at once during reduction
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,

    /// Re-check the reported boundary without trusting earlier answers
    #[arg(long)]
    verify: bool,

    /// Narrow each culprit down to its first failing version
    #[arg(long)]
    refine: bool,

    /// Stop after this many oracle calls
    #[arg(long)]
    max_probes: Option<usize>,

    /// Reuse the verdicts recorded in an earlier report
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Save the report as JSON
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Check command; exit status 0 means pass
    #[arg(last = true, required = true)]
    check: Vec<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|_| format!("not a number: {}", s))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(format!("timeout must be positive, got {}", s));
    }
    Ok(Duration::from_secs_f64(secs))
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => cmd_run(args),
        Commands::Diff {
            good,
            bad,
            versions,
            format,
        } => cmd_diff(good, bad, versions, format),
        Commands::Show { report, format } => cmd_show(report, format),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            let mut source = e.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {}", cause);
                source = cause.source();
            }
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn cmd_run(args: RunArgs) -> Result<u8, CliError> {
    let flag = Arc::new(AtomicBool::new(false));
    install_signal_handlers(&flag);
    run_search(&args, CancelToken::from_flag(flag))
}

fn run_search(args: &RunArgs, cancel: CancelToken) -> Result<u8, CliError> {
    let mut oracle = CommandOracle::from_args(&args.check);
    if let Some(materialize) = &args.materialize {
        oracle = oracle.with_materialize(materialize.clone());
    }

    let config = SearchConfig {
        timeout: args.timeout,
        jobs: args.jobs,
        verify_boundary: args.verify,
        refine_versions: args.refine,
        max_probes: args.max_probes,
    };

    let known = match &args.resume {
        Some(path) => {
            let previous = load_result(path)?;
            info!(
                "Resuming from {:?} ({} recorded probes)",
                path,
                previous.log.len()
            );
            let verdicts: Vec<_> = previous.verdicts().collect();
            verdicts
        }
        None => Vec::new(),
    };

    let bisector = Bisector::new(&oracle)
        .with_config(config)
        .with_cancel(cancel)
        .with_known_verdicts(known);

    info!("Check command: {}", oracle.check_command());
    let searched = if args.sequence.is_empty() {
        let (good, bad) = match (&args.good, &args.bad) {
            (Some(good), Some(bad)) => (load_environment(good)?, load_environment(bad)?),
            // clap enforces --good/--bad or --sequence
            _ => return Err(InputError::EmptySequence.into()),
        };
        match &args.versions {
            Some(path) => bisector.bisect_diff(&good, &bad, &load_repository(path)?),
            None => bisector.bisect_diff(&good, &bad, &EndpointsOnly),
        }
    } else {
        let sequence = load_sequence(&args.sequence)?;
        bisector.bisect(&sequence)
    };

    let result = match searched {
        Ok(result) => result,
        Err(BisectError::Oracle(failure)) => {
            if let Some(path) = &args.output {
                save_result(&failure.partial_result(), path)?;
                warn!(
                    "Partial report with {} probes saved to {:?}; rerun with --resume",
                    failure.log.len(),
                    path
                );
            }
            return Err(BisectError::Oracle(failure).into());
        }
        Err(err) => return Err(err.into()),
    };

    if let Some(path) = &args.output {
        save_result(&result, path)?;
        info!("Report saved to {:?}", path);
    }
    print_result(&result, args.format)?;
    Ok(exit_code(&result))
}

fn cmd_diff(
    good: PathBuf,
    bad: PathBuf,
    versions: Option<PathBuf>,
    format: OutputFormat,
) -> Result<u8, CliError> {
    let good = load_environment(&good)?;
    let bad = load_environment(&bad)?;
    let changes = match versions {
        Some(path) => diff(&good, &bad, &load_repository(&path)?)?,
        None => diff(&good, &bad, &EndpointsOnly)?,
    };

    match format {
        OutputFormat::Text => print!("{}", format_diff(&changes)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&changes)?),
    }
    Ok(EXIT_FOUND)
}

fn cmd_show(report: PathBuf, format: OutputFormat) -> Result<u8, CliError> {
    let result = load_result(&report)?;
    print_result(&result, format)?;
    Ok(exit_code(&result))
}

fn print_result(result: &BisectionResult, format: OutputFormat) -> Result<(), CliError> {
    match format {
        OutputFormat::Text => print!("{}", format_result(result)),
        OutputFormat::Json => println!("{}", result_to_json(result)?),
    }
    Ok(())
}

fn exit_code(result: &BisectionResult) -> u8 {
    match &result.outcome {
        Outcome::FoundIndex { .. } | Outcome::FoundCulprits { .. } => EXIT_FOUND,
        Outcome::NotFound => EXIT_NOT_FOUND,
        Outcome::InvariantViolation { violation } => {
            warn!("Inputs are inconsistent: {}", violation);
            EXIT_ERROR
        }
        Outcome::Incomplete { .. } => EXIT_INCOMPLETE,
    }
}

/// Flag flipped by the signal handler. Set once and never freed.
static CANCEL_FLAG: AtomicPtr<AtomicBool> = AtomicPtr::new(std::ptr::null_mut());

/// SIGINT + SIGTERM request cancellation between probes.
fn install_signal_handlers(flag: &Arc<AtomicBool>) {
    let raw = Arc::into_raw(flag.clone()) as *mut AtomicBool;
    CANCEL_FLAG.store(raw, Ordering::SeqCst);

    extern "C" fn handler(_: libc::c_int) {
        let flag = CANCEL_FLAG.load(Ordering::SeqCst);
        if !flag.is_null() {
            // SAFETY: the pointer comes from a leaked Arc and stays valid.
            unsafe { (*flag).store(true, Ordering::SeqCst) };
        }
    }

    // SAFETY: the handler only touches atomics.
    unsafe {
        let h = handler as extern "C" fn(libc::c_int) as libc::sighandler_t;
        libc::signal(libc::SIGINT, h);
        libc::signal(libc::SIGTERM, h);
    }
}

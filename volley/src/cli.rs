use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

const DURATION_HINT: &str = "expected e.g. 10s, 250ms, 1m or 1m30s";

/// Parses `10s`, `250ms`, `1m` and bare seconds; anything else goes through humantime
/// so compound forms like `1m30s` also work.
pub(crate) fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err(format!("duration cannot be empty ({DURATION_HINT})"));
    }

    let number_end = s
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit())
        .map_or(s.len(), |(idx, _)| idx);

    if number_end == 0 {
        return Err(format!("invalid duration '{s}' ({DURATION_HINT})"));
    }

    let (number_str, unit_str) = s.split_at(number_end);
    let value: u64 = number_str
        .parse()
        .map_err(|_| format!("invalid duration '{s}' ({DURATION_HINT})"))?;

    match unit_str.trim() {
        "" | "s" | "sec" | "secs" => Ok(Duration::from_secs(value)),
        "ms" => Ok(Duration::from_millis(value)),
        "m" | "min" | "mins" => value
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{s}' is too large")),
        "h" => value
            .checked_mul(60 * 60)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{s}' is too large")),
        _ => humantime::parse_duration(s)
            .map_err(|_| format!("invalid duration '{s}' ({DURATION_HINT})")),
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable progress and summary.
    HumanReadable,
    /// Emit JSON progress and summary lines (NDJSON) to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "volley",
    author,
    version,
    about = "HTTP load generator for scripted multi-step API scenarios",
    long_about = "volley drives a pool of virtual users through a YAML-defined sequence of HTTP steps, checks every response, aggregates latency and error metrics, and evaluates pass/fail thresholds at the end of the run.\n\nCLI flags override values from the plan file.",
    after_help = "Examples:\n  volley run plans/shop.yaml\n  volley run plans/shop.yaml --vus 50 --duration 30s --rps 1000\n  volley run plans/shop.yaml --credentials users.txt --output json\n  volley validate plans/shop.yaml"
)]
pub struct Cli {
    /// Log filter (e.g. info, volley_core=debug). Falls back to VOLLEY_LOG.
    #[arg(long, global = true, value_name = "LEVEL", env = "VOLLEY_LOG")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load test plan
    #[command(
        long_about = "Run a plan: setup once, drive virtual users through the steps until the duration or iteration budget is spent, then print the summary and threshold verdict."
    )]
    Run(RunArgs),

    /// Parse and validate a plan without sending any request
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Path to the plan (.yaml)
    pub plan: PathBuf,

    /// Base URL for relative step URLs; overrides the plan
    #[arg(long, value_name = "URL", env = "VOLLEY_BASE_URL")]
    pub base_url: Option<String>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the plan (.yaml)
    pub plan: PathBuf,

    /// Number of virtual users
    #[arg(long)]
    pub vus: Option<u64>,

    /// Test duration (e.g. 10s, 250ms, 1m)
    #[arg(long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Total iterations shared by all VUs (default 1 unless a duration is set)
    #[arg(long)]
    pub iterations: Option<u64>,

    /// Global requests-per-second ceiling
    #[arg(long)]
    pub rps: Option<u64>,

    /// Pause between iterations of one VU (e.g. 0s, 500ms)
    #[arg(long, value_parser = parse_duration)]
    pub think_time: Option<Duration>,

    /// Credentials file (`username:password` per line); overrides the plan
    #[arg(long, value_name = "PATH")]
    pub credentials: Option<PathBuf>,

    /// Base URL for relative step URLs; overrides the plan
    #[arg(long, value_name = "URL", env = "VOLLEY_BASE_URL")]
    pub base_url: Option<String>,

    /// Add/override env vars visible to templates as `env.KEY` (repeatable, KEY=VALUE).
    /// CLI-provided vars override the current process env.
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}

//! Command-line interface definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use spawnpool::logging::LogFormat;

/// Demo driver for the spawnpool process pool.
///
/// Workers re-execute this binary with the same arguments, so every flag
/// below is seen by the dispatcher and by each worker.
#[derive(Parser, Debug)]
#[command(name = "spawnpool")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log errors only.
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    pub quiet: bool,

    /// Log line format on stderr.
    #[arg(long, value_parser = parse_log_format, global = true)]
    pub log_format: Option<LogFormat>,

    /// Disable colored error output.
    #[arg(long, env = "NO_COLOR", global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Double each value on the worker pool.
    Double(DoubleArgs),

    /// Count Collatz steps for every start value up to a limit.
    Collatz(CollatzArgs),
}

/// Options every pool-backed command shares.
#[derive(Parser, Debug, Clone)]
pub struct PoolArgs {
    /// Number of worker processes.
    #[arg(short, long, env = "SPAWNPOOL_WORKERS", default_value_t = num_cpus())]
    pub workers: usize,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = OutputFormatArg::Plain)]
    pub format: OutputFormatArg,
}

/// Arguments for the double command.
#[derive(Parser, Debug)]
pub struct DoubleArgs {
    /// Values to double, in submission order.
    pub values: Vec<i64>,

    /// Sleep this long in the worker before doubling an odd value.
    #[arg(long, default_value_t = 0)]
    pub delay_ms: u64,

    #[command(flatten)]
    pub pool: PoolArgs,
}

/// Arguments for the collatz command.
#[derive(Parser, Debug)]
pub struct CollatzArgs {
    /// Largest start value.
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    pub limit: u64,

    #[command(flatten)]
    pub pool: PoolArgs,
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    s.parse()
}

/// Output format argument.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormatArg {
    /// One result per line, streamed as results arrive.
    #[default]
    Plain,
    /// A single JSON document with results and pool statistics.
    Json,
}

//! spawnpool - demo driver for the process pool.

mod cli;

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};
use serde::Serialize;
use spawnpool::logging::{self, LogConfig};
use spawnpool::{Payload, Pool, PoolConfig};

use cli::{Cli, CollatzArgs, Commands, DoubleArgs, OutputFormatArg, PoolArgs};

/// Parse arguments, run the selected command in whichever role this process
/// has, and report errors with their cause chain before exiting 1.
fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        owo_colors::set_override(false);
    }
    init_logging(&cli);

    let result = match &cli.command {
        Commands::Double(args) => cmd_double(args),
        Commands::Collatz(args) => cmd_collatz(args),
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli) {
    let mut config = if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::from_verbosity(cli.verbose)
    };
    // -v and -q beat SPAWNPOOL_LOG and RUST_LOG.
    if cli.verbose > 0 || cli.quiet {
        let level = config.level.as_str().to_lowercase();
        config = config.with_filter(level);
    }
    config = config.with_env_overrides();
    if let Some(format) = cli.log_format {
        config = config.with_format(format);
    }
    logging::init(config);
}

fn pool_config() -> PoolConfig {
    PoolConfig::new().with_env_overrides()
}

/// Double every value on the pool. Odd values can be delayed in the worker
/// to make completion order differ from submission order.
fn cmd_double(args: &DoubleArgs) -> Result<()> {
    let values = args.values.clone();
    let delay = Duration::from_millis(args.delay_ms);

    let pool = Pool::<i64>::with_config(pool_config())
        .dispatch(move |tasks| {
            for n in values {
                if tasks.send(n).is_err() {
                    break;
                }
            }
        })
        .work(move |tasks, results| {
            for n in tasks {
                if n % 2 != 0 && !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                if results.send(n.saturating_mul(2)).is_err() {
                    break;
                }
            }
        });

    run_and_report(pool, &args.pool, |n| n.to_string())
}

/// Count Collatz steps for 1..=limit. Tasks carry `(start, 0)` and come back
/// as `(start, steps)`.
fn cmd_collatz(args: &CollatzArgs) -> Result<()> {
    let limit = args.limit;

    let pool = Pool::<(u64, u64)>::with_config(pool_config())
        .dispatch(move |tasks| {
            for start in 1..=limit {
                if tasks.send((start, 0)).is_err() {
                    break;
                }
            }
        })
        .work(|tasks, results| {
            for (start, _) in tasks {
                if results.send((start, collatz_steps(start))).is_err() {
                    break;
                }
            }
        });

    run_and_report(pool, &args.pool, |(start, steps)| format!("{start} {steps}"))
}

fn collatz_steps(mut n: u64) -> u64 {
    let mut steps = 0;
    while n > 1 {
        n = if n % 2 == 0 {
            n / 2
        } else {
            n.saturating_mul(3).saturating_add(1)
        };
        steps += 1;
    }
    steps
}

/// Attach a collector matching the output format and run the pool.
///
/// Plain output streams one line per result as it arrives. JSON output
/// buffers results and prints them with the pool statistics at the end.
fn run_and_report<T, F>(pool: Pool<T>, args: &PoolArgs, line: F) -> Result<()>
where
    T: Payload,
    F: Fn(&T) -> String + 'static,
{
    match args.format {
        OutputFormatArg::Plain => {
            let stats = pool
                .collect(move |results| {
                    let mut out = std::io::stdout().lock();
                    for result in results {
                        // Stop reading on a closed stdout; the pool still drains.
                        if writeln!(out, "{}", line(&result)).is_err() {
                            break;
                        }
                    }
                })
                .run(args.workers)
                .context("Process pool failed")?;
            tracing::debug!(tasks = stats.tasks_done, "Printed results");
        }
        OutputFormatArg::Json => {
            let collected: Rc<RefCell<Vec<T>>> = Rc::default();
            let sink = Rc::clone(&collected);
            let stats = pool
                .collect(move |results| sink.borrow_mut().extend(results))
                .run(args.workers)
                .context("Process pool failed")?;
            let report = Report {
                results: collected.take(),
                stats,
            };
            let mut out = std::io::stdout().lock();
            serde_json::to_writer_pretty(&mut out, &report)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct Report<T> {
    results: Vec<T>,
    stats: spawnpool::PoolStats,
}

//! CLI entrypoint for the tieralloc workload harness.

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tieralloc_harness::scenario::{DEFAULT_OPS, parse_seed};
use tieralloc_harness::structured_log::{LogEmitter, validate_log_file};
use tieralloc_harness::{HarnessError, RunReport, Scenario, ScenarioOptions, ScenarioRunner};

/// Allocator workload tooling for tieralloc.
#[derive(Debug, Parser)]
#[command(name = "tieralloc-harness")]
#[command(about = "Workload scenarios and log validation for the tieralloc pool allocator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one scenario (or `all`) against fresh pool instances.
    Run {
        /// Scenario name, or `all`.
        #[arg(long, default_value = "all")]
        scenario: String,
        /// Root seed (decimal or 0x...).
        #[arg(long, default_value = "0x7A11_A10C")]
        seed: String,
        /// Operation budget for the randomized scenarios.
        #[arg(long, default_value_t = DEFAULT_OPS)]
        ops: usize,
        /// Structured JSONL log output path.
        #[arg(long)]
        log: Option<PathBuf>,
        /// JSON report output path (if omitted, a plain summary is printed).
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Validate a structured JSONL log file.
    ValidateLog {
        #[arg(long)]
        log: PathBuf,
    },
    /// List available scenarios.
    List,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            scenario,
            seed,
            ops,
            log,
            report,
        } => {
            let scenarios = Scenario::select(&scenario)?;
            let options = ScenarioOptions {
                seed: parse_seed(&seed)?,
                ops,
            };
            let runner = ScenarioRunner::new(options);
            let run_id = format!("{:x}-{}", options.seed, std::process::id());

            let results = match &log {
                Some(path) => {
                    let mut emitter = LogEmitter::to_file(path, &run_id)?;
                    runner.run_all(&scenarios, &mut emitter)?
                }
                None => runner.run_all(&scenarios, &mut LogEmitter::discard(&run_id))?,
            };
            if let Some(path) = &log {
                eprintln!("Structured log written to {}", path.display());
            }

            let config = runner.config();
            let summary = RunReport::new(
                run_id,
                options,
                config.refill_batch,
                config.max_growth_bytes,
                results,
            );
            match &report {
                Some(path) => {
                    summary.write_json(path)?;
                    eprintln!("Report written to {}", path.display());
                }
                None => print!("{}", summary.render_plain()),
            }
            if !summary.all_passed() {
                return Err(format!("{} of {} scenarios failed", summary.failed, summary.total).into());
            }
        }
        Command::ValidateLog { log } => {
            let (lines, errors) = validate_log_file(&log).map_err(HarnessError::from)?;
            if errors.is_empty() {
                println!("{}: {lines} entries, schema OK", log.display());
            } else {
                let mut stderr = std::io::stderr().lock();
                for err in &errors {
                    writeln!(stderr, "{err}")?;
                }
                return Err(format!(
                    "{}: {} validation errors in {lines} entries",
                    log.display(),
                    errors.len()
                )
                .into());
            }
        }
        Command::List => {
            for scenario in Scenario::all() {
                println!("{:<18} {}", scenario.as_str(), scenario.description());
            }
        }
    }

    Ok(())
}

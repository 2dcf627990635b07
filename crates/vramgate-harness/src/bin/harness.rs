//! CLI entrypoint for vramgate operator tooling.

use clap::{Parser, Subcommand};
use serde::Serialize;
use vramgate_core::{AdmissionMode, QuotaConfig, try_parse_size};
use vramgate_harness::scenario::{self, ScenarioKind, ScenarioParams};
use vramgate_harness::{ConfigReport, HarnessError, SizeReport};

/// Operator tooling for vramgate.
#[derive(Debug, Parser)]
#[command(name = "vramgate-harness")]
#[command(about = "Inspect vramgate configuration and exercise the quota engine")]
struct Cli {
    /// Pretty-print JSON output.
    #[arg(long, global = true)]
    pretty: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show how a quota string is interpreted.
    ParseSize {
        /// Size string, e.g. "16Gi", "4G", "1073741824".
        value: String,
    },
    /// Show the configuration resolved from the current environment.
    Config,
    /// Run a quota scenario against a simulated device.
    Scenario {
        #[arg(value_enum)]
        kind: ScenarioKind,
        /// Quota for the run.
        #[arg(long, default_value = "1Gi")]
        quota: String,
        /// Admission mode (`optimistic` or `strict`).
        #[arg(long, default_value = "optimistic")]
        mode: String,
        /// Concurrent threads (burst only).
        #[arg(long, default_value_t = 8)]
        threads: usize,
        /// Block size (fill-then-deny and burst).
        #[arg(long, default_value = "50Mi")]
        size: String,
    },
}

fn emit<T: Serialize>(value: &T, pretty: bool) -> Result<(), HarnessError> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{json}");
    Ok(())
}

fn main() -> Result<(), HarnessError> {
    let cli = Cli::parse();

    match cli.command {
        Command::ParseSize { value } => emit(&SizeReport::from_input(&value), cli.pretty),
        Command::Config => emit(&ConfigReport::from(&QuotaConfig::from_env()), cli.pretty),
        Command::Scenario {
            kind,
            quota,
            mode,
            threads,
            size,
        } => {
            let params = ScenarioParams {
                limit: try_parse_size(&quota)?,
                mode: AdmissionMode::from_str_loose(&mode),
                threads,
                size: try_parse_size(&size)?,
            };
            let report = scenario::run(kind, &params)?;
            eprintln!(
                "{}: {} steps, used={} limit={} exceeded={}",
                report.scenario,
                report.steps.len(),
                report.snapshot.used,
                report.limit,
                report.limit_exceeded,
            );
            emit(&report, cli.pretty)
        }
    }
}

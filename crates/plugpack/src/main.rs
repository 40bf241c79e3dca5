use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use log::{LevelFilter, debug, error, info};
use plugpack::{
    config::{Config, FailurePolicy},
    orchestrator::{BuildReport, Orchestrator, UnitStatus},
    warnings::WarningPolicy,
};

/// Exit code when at least one unit failed to build
const EXIT_UNIT_FAILED: u8 = 1;
/// Exit code for configuration and discovery problems
const EXIT_USAGE: u8 = 2;

/// Build every plugin unit into a bundled artifact with an integrity hash.
#[derive(Parser, Debug)]
#[command(name = "plugpack", version, about)]
struct Cli {
    /// Configuration file (defaults to ./plugpack.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory containing one subdirectory per unit
    #[arg(long)]
    units_dir: Option<PathBuf>,

    /// Directory receiving the built units
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Keep building the remaining units after a failure
    #[arg(long)]
    keep_going: bool,

    /// What to do with bundler warnings
    #[arg(long, value_enum)]
    warnings: Option<WarningPolicy>,

    /// Emit readable, unminified artifacts
    #[arg(long)]
    no_minify: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(units_dir) = &self.units_dir {
            config.units_dir.clone_from(units_dir);
        }
        if let Some(out_dir) = &self.out_dir {
            config.out_dir.clone_from(out_dir);
        }
        if self.keep_going {
            config.failure_policy = FailurePolicy::Continue;
        }
        if let Some(warnings) = self.warnings {
            config.bundle.warnings = warnings;
        }
        if self.no_minify {
            config.bundle.minify = false;
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(report) if report.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(EXIT_UNIT_FAILED),
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(EXIT_USAGE)
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn run(cli: &Cli) -> Result<BuildReport> {
    let mut config =
        Config::discover(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply_overrides(&mut config);
    debug!("Effective configuration: {config:?}");

    let orchestrator = Orchestrator::new(config);
    let report = orchestrator.run().context("Failed to discover units")?;
    summarize(&report);
    Ok(report)
}

fn summarize(report: &BuildReport) {
    let built = report.succeeded().count();
    let failed = report.failures().count();
    let skipped = report
        .units
        .iter()
        .filter(|unit| matches!(unit.status, UnitStatus::Pending))
        .count();

    for (unit, build) in report.succeeded() {
        for warning in &build.warnings {
            info!("{}: {warning}", unit.id);
        }
    }
    if failed == 0 {
        info!("Built {built} units");
    } else {
        error!("{failed} of {} units failed ({built} built, {skipped} not attempted)", report.units.len());
    }
}

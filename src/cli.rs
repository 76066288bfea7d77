//! Command-line interface for the simulation engine.

use kestrel::config::SimulationFileConfig;
use kestrel::data::{load_panel, DataConfig};
use kestrel::error::Result;
use kestrel::export::export_run;
use kestrel::simulation::Simulation;
use kestrel::sweep::{run_sweep, SweepConfig};

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Kestrel - walk-forward backtesting for re-optimized portfolios.
#[derive(Parser)]
#[command(name = "kestrel")]
#[command(version)]
#[command(about = "Walk-forward backtester for periodically re-optimized, discretely rebalanced portfolios")]
#[command(long_about = None)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one simulation from a configuration file
    Run {
        /// Path to TOML configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Override the output directory from the config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run one simulation per start date in parallel
    Sweep {
        /// Path to TOML configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// First candidate start date (YYYY-MM-DD)
        #[arg(long)]
        from: NaiveDate,

        /// Last candidate start date (YYYY-MM-DD)
        #[arg(long)]
        to: NaiveDate,

        /// Take every n-th trading date in the range
        #[arg(long, default_value = "7")]
        step: usize,

        /// Override the output directory from the config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate an example configuration file
    Init {
        /// Output path for config file
        #[arg(short, long, default_value = "kestrel.toml")]
        output: PathBuf,
    },

    /// Show a summary of a dataset
    Inspect {
        /// Path to CSV data file
        #[arg(short, long)]
        data: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    /// Initialize logging based on verbosity.
    pub fn init_logging(&self) {
        let level = match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };

        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .finish();

        if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
            eprintln!("Failed to set tracing subscriber: {}", e);
        }
    }
}

/// Run the CLI application.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging();

    match &cli.command {
        Commands::Run { config, output } => run_simulation(config, output.as_deref(), cli.format),
        Commands::Sweep {
            config,
            from,
            to,
            step,
            output,
        } => run_sweep_command(
            config,
            SweepConfig::new(*from, *to, *step),
            output.as_deref(),
            cli.format,
        ),
        Commands::Init { output } => init_config(output),
        Commands::Inspect { data } => inspect_data(data, cli.format),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct RunReport<'a> {
    start_date: NaiveDate,
    days: usize,
    initial_amount: f64,
    final_amount: f64,
    total_return_pct: f64,
    output_dir: &'a Path,
}

fn run_simulation(config_path: &Path, output: Option<&Path>, format: OutputFormat) -> Result<()> {
    let file_config = SimulationFileConfig::load(config_path)?;
    let panel = load_panel(&file_config.data.path, &file_config.data.to_data_config())?;
    let config = file_config.to_simulation_config(&panel)?;

    let mut simulation = Simulation::new(Arc::new(panel), config)?;
    simulation.run()?;
    let result = simulation.into_result();

    let output_dir = output.unwrap_or(file_config.output.dir.as_path());
    export_run(&result, output_dir)?;

    match format {
        OutputFormat::Text => {
            println!("{}", result.summary());
            println!("Output: {}", output_dir.display());
        }
        OutputFormat::Json => print_json(&RunReport {
            start_date: result.config.start_date,
            days: result.simulated_days(),
            initial_amount: result.config.initial_amount,
            final_amount: result.final_amount(),
            total_return_pct: result.total_return_pct(),
            output_dir,
        })?,
    }
    Ok(())
}

fn run_sweep_command(
    config_path: &Path,
    sweep: SweepConfig,
    output: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let file_config = SimulationFileConfig::load(config_path)?;
    let panel = load_panel(&file_config.data.path, &file_config.data.to_data_config())?;
    // Start date is replaced per run.
    let template = file_config.to_simulation_config_at(&panel, sweep.from)?;

    let output_dir = output.unwrap_or(file_config.output.dir.as_path());
    let outcomes = run_sweep(Arc::new(panel), &template, &sweep, Some(output_dir))?;

    match format {
        OutputFormat::Text => {
            println!("{:<12} {:>16} {:>10}  Status", "Start", "Final Amount", "Return");
            for o in &outcomes {
                match (&o.error, o.final_amount, o.total_return_pct) {
                    (None, Some(amount), Some(ret)) => {
                        println!("{:<12} {:>16.2} {:>9.2}%  ok", o.start_date, amount, ret)
                    }
                    (err, _, _) => println!(
                        "{:<12} {:>16} {:>10}  failed: {}",
                        o.start_date,
                        "-",
                        "-",
                        err.as_deref().unwrap_or("unknown error")
                    ),
                }
            }
        }
        OutputFormat::Json => print_json(&outcomes)?,
    }
    Ok(())
}

fn init_config(output: &Path) -> Result<()> {
    fs::write(output, SimulationFileConfig::example())?;
    info!("Wrote example configuration to {}", output.display());
    println!("Created {}", output.display());
    Ok(())
}

#[derive(Serialize)]
struct DatasetReport {
    tickers: Vec<String>,
    dates: usize,
    first_date: Option<NaiveDate>,
    last_date: Option<NaiveDate>,
}

fn inspect_data(path: &Path, format: OutputFormat) -> Result<()> {
    let panel = load_panel(path, &DataConfig::default())?;
    let report = DatasetReport {
        tickers: panel.tickers().to_vec(),
        dates: panel.len(),
        first_date: panel.dates().first().copied(),
        last_date: panel.dates().last().copied(),
    };

    match format {
        OutputFormat::Text => {
            println!("Tickers ({}): {}", report.tickers.len(), report.tickers.join(", "));
            println!("Dates: {}", report.dates);
            if let (Some(first), Some(last)) = (report.first_date, report.last_date) {
                println!("Range: {} to {}", first, last);
            }
        }
        OutputFormat::Json => print_json(&report)?,
    }
    Ok(())
}

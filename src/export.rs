//! Export of simulation runs to disk.
//!
//! A run directory holds:
//!
//! | File | Content |
//! |------|---------|
//! | `history.csv` | one row per portfolio state, vector columns as JSON arrays |
//! | `tickers.json` | ticker order every vector is aligned to |
//! | `initial_target_allocation.json` | only when an initial allocation was supplied |
//! | `parameters.json` | run parameters needed to reproduce the run |

use crate::covariance::CovarianceEstimator;
use crate::error::Result;
use crate::simulation::{SimulationConfig, SimulationResult};
use crate::solver::SolverConfig;
use chrono::NaiveDate;
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::info;

pub const HISTORY_FILE: &str = "history.csv";
pub const TICKERS_FILE: &str = "tickers.json";
pub const INITIAL_ALLOCATION_FILE: &str = "initial_target_allocation.json";
pub const PARAMETERS_FILE: &str = "parameters.json";

/// Parameters written alongside a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    pub start_date: NaiveDate,
    pub initial_amount: f64,
    pub window_size: usize,
    pub rebalancing_interval: Option<usize>,
    pub relocation_interval: Option<usize>,
    pub covariance_matrix_estimator: CovarianceEstimator,
    pub solver: SolverConfig,
}

impl From<&SimulationConfig> for RunParameters {
    fn from(config: &SimulationConfig) -> Self {
        Self {
            start_date: config.start_date,
            initial_amount: config.initial_amount,
            window_size: config.window_size,
            rebalancing_interval: config.rebalancing_interval,
            relocation_interval: config.relocation_interval,
            covariance_matrix_estimator: config.covariance_matrix_estimator,
            solver: config.solver.clone(),
        }
    }
}

/// Writer for one simulation result.
pub struct Exporter<'a> {
    result: &'a SimulationResult,
}

impl<'a> Exporter<'a> {
    pub fn new(result: &'a SimulationResult) -> Self {
        Self { result }
    }

    /// Export the state history to CSV.
    pub fn export_history_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = WriterBuilder::new().from_path(path)?;
        writer.write_record([
            "date",
            "amount",
            "unallocated",
            "cash",
            "target_allocation",
            "allocation",
            "positions",
        ])?;

        for state in &self.result.history {
            let target = match &state.target_allocation {
                Some(t) => serde_json::to_string(t)?,
                None => String::new(),
            };
            writer.write_record([
                state.date.format("%Y-%m-%d").to_string(),
                state.amount.to_string(),
                state.unallocated.to_string(),
                state.cash.to_string(),
                target,
                serde_json::to_string(&state.allocation)?,
                serde_json::to_string(&state.positions)?,
            ])?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Export the ticker order to JSON.
    pub fn export_tickers_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(file, &self.result.tickers)?;
        Ok(())
    }

    /// Export the initial target allocation, if one was supplied.
    ///
    /// Returns whether a file was written.
    pub fn export_initial_allocation_json(&self, path: impl AsRef<Path>) -> Result<bool> {
        match &self.result.initial_target_allocation {
            Some(allocation) => {
                let file = BufWriter::new(File::create(path)?);
                serde_json::to_writer_pretty(file, allocation)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Export the run parameters to JSON.
    pub fn export_parameters_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(file, &RunParameters::from(&self.result.config))?;
        Ok(())
    }

    /// Write every artifact into `dir`, creating it if needed.
    pub fn export_all(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let mut written = Vec::with_capacity(4);

        let path = dir.join(HISTORY_FILE);
        self.export_history_csv(&path)?;
        written.push(path);

        let path = dir.join(TICKERS_FILE);
        self.export_tickers_json(&path)?;
        written.push(path);

        let path = dir.join(INITIAL_ALLOCATION_FILE);
        if self.export_initial_allocation_json(&path)? {
            written.push(path);
        }

        let path = dir.join(PARAMETERS_FILE);
        self.export_parameters_json(&path)?;
        written.push(path);

        info!("Exported {} files to {}", written.len(), dir.display());
        Ok(written)
    }
}

/// Export a run's artifacts into `dir`.
pub fn export_run(result: &SimulationResult, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    Exporter::new(result).export_all(dir)
}

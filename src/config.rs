//! Configuration file support for simulations.
//!
//! Loads run configurations from TOML files so a run can be reproduced from
//! the file alone.

use crate::covariance::CovarianceEstimator;
use crate::data::DataConfig;
use crate::error::{Result, SimulationError};
use crate::panel::Panel;
use crate::simulation::SimulationConfig;
use crate::solver::SolverConfig;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Complete simulation configuration loaded from a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationFileConfig {
    /// Dataset settings.
    #[serde(default)]
    pub data: DataSettings,
    /// Simulation settings.
    #[serde(default)]
    pub simulation: SimulationSettings,
    /// Optimizer settings.
    #[serde(default)]
    pub solver: SolverConfig,
    /// Output settings.
    #[serde(default)]
    pub output: OutputSettings,
}

/// Dataset settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSettings {
    /// Path to the panel CSV.
    #[serde(default = "default_data_path")]
    pub path: String,
    /// Date format in the CSV (auto-detected when absent).
    #[serde(default)]
    pub date_format: Option<String>,
    /// Skip malformed rows instead of failing.
    #[serde(default)]
    pub skip_invalid: bool,
}

fn default_data_path() -> String { "data/panel.csv".to_string() }

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            path: default_data_path(),
            date_format: None,
            skip_invalid: false,
        }
    }
}

impl DataSettings {
    pub fn to_data_config(&self) -> DataConfig {
        DataConfig {
            date_format: self.date_format.clone(),
            skip_invalid: self.skip_invalid,
            ..Default::default()
        }
    }
}

/// Simulation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// Start date (YYYY-MM-DD format).
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default = "default_initial_amount")]
    pub initial_amount: f64,
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Days between rebalances; omit to disable.
    #[serde(default)]
    pub rebalancing_interval: Option<usize>,
    /// Days between relocations; omit to disable.
    #[serde(default)]
    pub relocation_interval: Option<usize>,
    #[serde(default)]
    pub covariance_matrix_estimator: CovarianceEstimator,
    #[serde(default)]
    pub show_progress: bool,
    /// Ticker to weight; tickers not listed start at zero.
    #[serde(default)]
    pub initial_target_allocation: Option<BTreeMap<String, f64>>,
}

fn default_initial_amount() -> f64 { 1_000_000.0 }
fn default_window_size() -> usize { 30 }

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            start_date: None,
            initial_amount: default_initial_amount(),
            window_size: default_window_size(),
            rebalancing_interval: None,
            relocation_interval: None,
            covariance_matrix_estimator: CovarianceEstimator::default(),
            show_progress: false,
            initial_target_allocation: None,
        }
    }
}

/// Output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Directory run artifacts are written to.
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

fn default_output_dir() -> PathBuf { PathBuf::from("output") }

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

/// Resolve a ticker-keyed allocation against the panel's ticker order.
pub fn resolve_allocation(allocation: &BTreeMap<String, f64>, tickers: &[String]) -> Result<Vec<f64>> {
    let mut weights = vec![0.0; tickers.len()];
    for (ticker, weight) in allocation {
        let index = tickers.iter().position(|t| t == ticker).ok_or_else(|| {
            SimulationError::ConfigError(format!(
                "Initial allocation references unknown ticker '{ticker}'"
            ))
        })?;
        weights[index] = *weight;
    }
    Ok(weights)
}

impl SimulationFileConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        let config: SimulationFileConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SimulationError::ConfigError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Parsed start date.
    pub fn start_date(&self) -> Result<NaiveDate> {
        let raw = self.simulation.start_date.as_deref().ok_or_else(|| {
            SimulationError::ConfigError("simulation.start_date is required".to_string())
        })?;
        Ok(NaiveDate::parse_from_str(raw, "%Y-%m-%d")?)
    }

    /// Convert to a [`SimulationConfig`] for the engine.
    ///
    /// Needs the panel to map the ticker-keyed initial allocation onto the
    /// panel's ticker order.
    pub fn to_simulation_config(&self, panel: &Panel) -> Result<SimulationConfig> {
        self.to_simulation_config_at(panel, self.start_date()?)
    }

    /// Same as [`Self::to_simulation_config`] with an explicit start date.
    pub fn to_simulation_config_at(&self, panel: &Panel, start_date: NaiveDate) -> Result<SimulationConfig> {
        let settings = &self.simulation;
        let initial_target_allocation = settings
            .initial_target_allocation
            .as_ref()
            .map(|a| resolve_allocation(a, panel.tickers()))
            .transpose()?;

        Ok(SimulationConfig {
            start_date,
            initial_amount: settings.initial_amount,
            window_size: settings.window_size,
            rebalancing_interval: settings.rebalancing_interval,
            relocation_interval: settings.relocation_interval,
            initial_target_allocation,
            covariance_matrix_estimator: settings.covariance_matrix_estimator,
            solver: self.solver.clone(),
            show_progress: settings.show_progress,
        })
    }

    /// Generate an example configuration file content.
    pub fn example() -> String {
        r#"# Kestrel Simulation Configuration File
# This file configures one walk-forward simulation run

[data]
path = "data/panel.csv"
# date_format = "%Y-%m-%d"
skip_invalid = false

[simulation]
start_date = "2018-01-11"
initial_amount = 1000000.0
window_size = 30
rebalancing_interval = 5
relocation_interval = 15
covariance_matrix_estimator = "ledoit_wolf"   # or "sample"
show_progress = true

[simulation.initial_target_allocation]
BOVA11 = 1.0

[solver]
population_size = 100
generations = 200
seed = 1
crossover_prob = 0.9
crossover_eta = 15.0
mutation_eta = 20.0

[output]
dir = "output"
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PanelRecord;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn panel() -> Panel {
        let mut records = Vec::new();
        for d in 1..=3 {
            let date = NaiveDate::from_ymd_opt(2018, 1, d).unwrap();
            records.push(PanelRecord::new(date, "BOVA11", 0.01, 80.0, 1.0));
            records.push(PanelRecord::new(date, "PETR4", -0.01, 20.0, 1.0));
        }
        Panel::from_records(records).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = SimulationFileConfig::default();
        assert_eq!(config.simulation.initial_amount, 1_000_000.0);
        assert_eq!(config.simulation.window_size, 30);
        assert_eq!(config.solver.seed, 1);
        assert_eq!(config.output.dir, PathBuf::from("output"));
    }

    #[test]
    fn test_load_config() {
        let toml_content = r#"
[data]
path = "prices.csv"

[simulation]
start_date = "2018-01-02"
initial_amount = 1000.0
window_size = 1
relocation_interval = 10
covariance_matrix_estimator = "sklearn.LedoitWolf"

[simulation.initial_target_allocation]
PETR4 = 0.25

[solver]
population_size = 20
generations = 5
"#;
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", toml_content).unwrap();

        let config = SimulationFileConfig::load(file.path()).unwrap();
        assert_eq!(config.data.path, "prices.csv");
        assert_eq!(config.simulation.relocation_interval, Some(10));
        assert_eq!(config.simulation.rebalancing_interval, None);
        assert_eq!(
            config.simulation.covariance_matrix_estimator,
            CovarianceEstimator::LedoitWolf
        );
        assert_eq!(config.solver.population_size, 20);
        assert_eq!(config.solver.crossover_eta, 15.0);

        let sim = config.to_simulation_config(&panel()).unwrap();
        assert_eq!(sim.start_date, NaiveDate::from_ymd_opt(2018, 1, 2).unwrap());
        assert_eq!(sim.initial_target_allocation, Some(vec![0.0, 0.25]));
        assert_eq!(sim.solver.generations, 5);
    }

    #[test]
    fn test_unknown_ticker_rejected() {
        let mut config = SimulationFileConfig::default();
        config.simulation.start_date = Some("2018-01-02".to_string());
        config.simulation.initial_target_allocation =
            Some(BTreeMap::from([("VALE3".to_string(), 1.0)]));
        let err = config.to_simulation_config(&panel()).unwrap_err();
        assert!(matches!(err, SimulationError::ConfigError(_)));
    }

    #[test]
    fn test_missing_start_date_rejected() {
        let config = SimulationFileConfig::default();
        assert!(config.to_simulation_config(&panel()).is_err());
    }

    #[test]
    fn test_unknown_estimator_rejected() {
        let toml_content = r#"
[simulation]
covariance_matrix_estimator = "oracle"
"#;
        assert!(toml::from_str::<SimulationFileConfig>(toml_content).is_err());
    }

    #[test]
    fn test_save_config() {
        let mut config = SimulationFileConfig::default();
        config.simulation.start_date = Some("2018-01-02".to_string());
        config.simulation.relocation_interval = Some(7);
        let file = NamedTempFile::new().unwrap();
        config.save(file.path()).unwrap();

        let loaded = SimulationFileConfig::load(file.path()).unwrap();
        assert_eq!(loaded.simulation.start_date, config.simulation.start_date);
        assert_eq!(loaded.simulation.relocation_interval, Some(7));
    }

    #[test]
    fn test_example_config() {
        let example = SimulationFileConfig::example();
        let parsed: SimulationFileConfig = toml::from_str(&example).unwrap();
        assert_eq!(parsed.simulation.rebalancing_interval, Some(5));
        assert!(example.contains("[simulation.initial_target_allocation]"));
        assert!(example.contains("[solver]"));
    }
}

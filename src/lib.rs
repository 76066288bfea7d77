//! Kestrel - walk-forward backtesting for periodically re-optimized portfolios.
//!
//! # Overview
//!
//! Kestrel replays a historical panel of per-ticker returns, prices, and
//! corporate-action adjustment factors one trading date at a time. At a
//! configurable cadence it re-optimizes the target allocation with a
//! two-objective evolutionary solver (risk against expected log return), and
//! at another cadence it converts that target into whole-share positions.
//! Every simulated date produces a [`PortfolioState`].
//!
//! - **Walk-forward**: each relocation only sees the returns strictly before it
//! - **Discrete lots**: positions are whole shares; leftover money stays in cash
//! - **Corporate actions**: share counts follow each date's adjustment factor
//! - **Pluggable solver**: any [`MultiObjectiveSolver`] can drive relocation
//! - **Parallel sweeps**: many start dates over one shared panel
//!
//! # Quick Start
//!
//! ```no_run
//! use kestrel::{
//!     data::{load_panel, DataConfig},
//!     simulation::{Simulation, SimulationConfig},
//! };
//! use chrono::NaiveDate;
//! use std::sync::Arc;
//!
//! let panel = load_panel("data/panel.csv", &DataConfig::default()).unwrap();
//! let start = NaiveDate::from_ymd_opt(2018, 1, 11).unwrap();
//!
//! let config = SimulationConfig::new(start, 1_000_000.0, 30)
//!     .with_relocation(15)
//!     .with_rebalancing(5);
//! let mut simulation = Simulation::new(Arc::new(panel), config).unwrap();
//! simulation.run().unwrap();
//!
//! let result = simulation.into_result();
//! println!("Return: {:.2}%", result.total_return_pct());
//! ```
//!
//! # Modules
//!
//! - [`types`]: Panel records and portfolio states
//! - [`panel`]: Date-ordered, ticker-indexed dataset view
//! - [`covariance`]: Sample and Ledoit-Wolf covariance estimators
//! - [`problem`]: Risk/return objectives of a weight vector
//! - [`repair`]: Projection onto whole-share, within-budget allocations
//! - [`solver`]: Solver trait and the bundled SMS-EMOA
//! - [`simulation`]: Walk-forward engine
//! - [`data`]: CSV loading
//! - [`config`]: TOML configuration file support
//! - [`export`]: Run artifacts on disk
//! - [`sweep`]: Parallel start-date sweeps

pub mod config;
pub mod covariance;
pub mod data;
pub mod error;
pub mod export;
pub mod panel;
pub mod problem;
pub mod repair;
pub mod simulation;
pub mod solver;
pub mod sweep;
pub mod types;

// Re-exports for convenience
pub use covariance::CovarianceEstimator;
pub use error::{Result, SimulationError};
pub use panel::Panel;
pub use problem::{Evaluation, PortfolioProblem};
pub use repair::PortfolioRepair;
pub use simulation::{Simulation, SimulationConfig, SimulationResult};
pub use solver::{select_max_sharpe, Candidate, MultiObjectiveSolver, SmsEmoa, SolverConfig};
pub use types::{PanelRecord, PortfolioState, Ticker};

// Data handling re-exports
pub use data::{load_panel, load_records, DataConfig};

// Export utilities
pub use export::{export_run, RunParameters};

// Sweeps
pub use sweep::{run_sweep, SweepConfig, SweepOutcome};

//! Walk-forward simulation engine.
//!
//! Replays the panel's trading dates from the configured start date, updating
//! the target allocation on relocation days, converting it into whole-share
//! positions on rebalancing days, and recording one [`PortfolioState`] per
//! date. Each run only reads the shared [`Panel`]; all mutable state lives in
//! the [`Simulation`] instance, so independent runs can execute in parallel.

use crate::covariance::CovarianceEstimator;
use crate::error::{Result, SimulationError};
use crate::panel::Panel;
use crate::problem::PortfolioProblem;
use crate::repair::{whole_shares, PortfolioRepair};
use crate::solver::{select_max_sharpe, MultiObjectiveSolver, SmsEmoa, SolverConfig};
use crate::types::{PortfolioState, Ticker};
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Tolerance on the sum of a user-supplied allocation.
const ALLOCATION_TOLERANCE: f64 = 1e-9;

/// Configuration of one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// First simulated date; must be a trading date of the panel.
    pub start_date: NaiveDate,
    /// Cash available on the seed date.
    pub initial_amount: f64,
    /// Number of trailing return rows used at each relocation.
    pub window_size: usize,
    /// Days between position updates (None = never rebalance).
    #[serde(default)]
    pub rebalancing_interval: Option<usize>,
    /// Days between re-optimizations (None = never relocate).
    #[serde(default)]
    pub relocation_interval: Option<usize>,
    /// Starting target weights, aligned to the panel's ticker order.
    #[serde(default)]
    pub initial_target_allocation: Option<Vec<f64>>,
    #[serde(default)]
    pub covariance_matrix_estimator: CovarianceEstimator,
    #[serde(default)]
    pub solver: SolverConfig,
    /// Show a progress bar while running.
    #[serde(default)]
    pub show_progress: bool,
}

impl SimulationConfig {
    /// Create a config with both cadences disabled.
    pub fn new(start_date: NaiveDate, initial_amount: f64, window_size: usize) -> Self {
        Self {
            start_date,
            initial_amount,
            window_size,
            rebalancing_interval: None,
            relocation_interval: None,
            initial_target_allocation: None,
            covariance_matrix_estimator: CovarianceEstimator::default(),
            solver: SolverConfig::default(),
            show_progress: false,
        }
    }

    pub fn with_rebalancing(mut self, interval: usize) -> Self {
        self.rebalancing_interval = Some(interval);
        self
    }

    pub fn with_relocation(mut self, interval: usize) -> Self {
        self.relocation_interval = Some(interval);
        self
    }

    pub fn with_initial_allocation(mut self, allocation: Vec<f64>) -> Self {
        self.initial_target_allocation = Some(allocation);
        self
    }

    pub fn with_estimator(mut self, estimator: CovarianceEstimator) -> Self {
        self.covariance_matrix_estimator = estimator;
        self
    }

    pub fn with_solver(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self
    }

    /// Validate against a panel and return the index of the start date.
    pub fn validate(&self, panel: &Panel) -> Result<usize> {
        if !(self.initial_amount.is_finite() && self.initial_amount > 0.0) {
            return Err(SimulationError::ConfigError(format!(
                "Initial amount must be positive, got {}",
                self.initial_amount
            )));
        }
        if self.window_size == 0 {
            return Err(SimulationError::ConfigError(
                "Window size must be positive".to_string(),
            ));
        }
        if self.rebalancing_interval == Some(0) {
            return Err(SimulationError::ConfigError(
                "Rebalancing interval must be positive or disabled".to_string(),
            ));
        }
        if self.relocation_interval == Some(0) {
            return Err(SimulationError::ConfigError(
                "Relocation interval must be positive or disabled".to_string(),
            ));
        }

        let start_index = panel.position_of(self.start_date).ok_or_else(|| {
            SimulationError::ConfigError(format!(
                "Start date {} is not a trading date of the dataset",
                self.start_date
            ))
        })?;

        match &self.initial_target_allocation {
            None if self.relocation_interval.is_none() => {
                return Err(SimulationError::ConfigError(
                    "An initial target allocation is required when relocation is disabled"
                        .to_string(),
                ));
            }
            None => {}
            Some(allocation) => {
                if allocation.len() != panel.tickers().len() {
                    return Err(SimulationError::ConfigError(format!(
                        "Initial allocation has {} weights, dataset has {} tickers",
                        allocation.len(),
                        panel.tickers().len()
                    )));
                }
                if allocation.iter().any(|w| !(w.is_finite() && *w >= 0.0)) {
                    return Err(SimulationError::ConfigError(
                        "Initial allocation weights must be non-negative".to_string(),
                    ));
                }
                let total: f64 = allocation.iter().sum();
                if total > 1.0 + ALLOCATION_TOLERANCE {
                    return Err(SimulationError::ConfigError(format!(
                        "Initial allocation sums to {total:.6}, exceeding 1"
                    )));
                }
            }
        }

        self.solver.validate()?;
        Ok(start_index)
    }
}

/// Whole-share positions for `target` weights of `amount` at `prices`.
pub fn rebalance(target: &[f64], amount: f64, prices: &[f64]) -> Vec<u64> {
    target
        .iter()
        .zip(prices)
        .map(|(w, p)| whole_shares(w * amount, *p))
        .collect()
}

/// Carry share counts through a date's adjustment factors: an exact
/// `floor(q / factor)`, with no rounding slack.
pub fn roll_forward(positions: &[u64], adjust_factors: &[f64]) -> Vec<u64> {
    positions
        .iter()
        .zip(adjust_factors)
        .map(|(&q, &f)| {
            if f.is_finite() && f > 0.0 {
                (q as f64 / f).floor() as u64
            } else {
                0
            }
        })
        .collect()
}

fn portfolio_value(prices: &[f64], positions: &[u64]) -> f64 {
    prices.iter().zip(positions).map(|(p, &q)| p * q as f64).sum()
}

/// Output of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    /// Ticker order every vector in the history is aligned to.
    pub tickers: Vec<Ticker>,
    /// Initial target allocation supplied by the caller, if any.
    pub initial_target_allocation: Option<Vec<f64>>,
    pub config: SimulationConfig,
    /// Seed state followed by one state per simulated date.
    pub history: Vec<PortfolioState>,
}

impl SimulationResult {
    /// Portfolio value on the last simulated date.
    pub fn final_amount(&self) -> f64 {
        self.history
            .last()
            .map(|s| s.amount)
            .unwrap_or(self.config.initial_amount)
    }

    /// Total return over the run, in percent.
    pub fn total_return_pct(&self) -> f64 {
        (self.final_amount() / self.config.initial_amount - 1.0) * 100.0
    }

    /// Number of simulated dates, excluding the seed state.
    pub fn simulated_days(&self) -> usize {
        self.history.len().saturating_sub(1)
    }

    pub fn summary(&self) -> String {
        format!(
            "Simulation Summary:\n\
             Start: {}\n\
             Days: {}\n\
             Tickers: {}\n\
             Initial Amount: {:.2}\n\
             Final Amount: {:.2}\n\
             Total Return: {:.2}%",
            self.config.start_date,
            self.simulated_days(),
            self.tickers.len(),
            self.config.initial_amount,
            self.final_amount(),
            self.total_return_pct()
        )
    }
}

/// One walk-forward run over a shared panel.
pub struct Simulation {
    panel: Arc<Panel>,
    config: SimulationConfig,
    solver: Box<dyn MultiObjectiveSolver>,
    start_index: usize,
    history: Vec<PortfolioState>,
}

impl Simulation {
    /// Create a simulation using the bundled SMS-EMOA solver.
    pub fn new(panel: Arc<Panel>, config: SimulationConfig) -> Result<Self> {
        let solver = Box::new(SmsEmoa::new(config.solver.clone()));
        Self::with_solver(panel, config, solver)
    }

    /// Create a simulation with a custom solver.
    pub fn with_solver(
        panel: Arc<Panel>,
        config: SimulationConfig,
        solver: Box<dyn MultiObjectiveSolver>,
    ) -> Result<Self> {
        let start_index = config.validate(&panel)?;
        Ok(Self {
            panel,
            config,
            solver,
            start_index,
            history: Vec::new(),
        })
    }

    pub fn tickers(&self) -> &[Ticker] {
        self.panel.tickers()
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn initial_target_allocation(&self) -> Option<&[f64]> {
        self.config.initial_target_allocation.as_deref()
    }

    /// States recorded by the last run.
    pub fn history(&self) -> &[PortfolioState] {
        &self.history
    }

    /// Compute a new target allocation for `date`.
    ///
    /// Uses only the `window_size` return rows strictly before `date`; fails
    /// rather than shortening the window when there are too few.
    pub fn optimize_portfolio(&self, date: NaiveDate, prices: &[f64], amount: f64) -> Result<Vec<f64>> {
        let rows = self.panel.window(date, self.config.window_size)?;
        let problem = PortfolioProblem::from_window(rows, self.config.covariance_matrix_estimator)?;
        let repair = PortfolioRepair::new(prices.to_vec(), amount)?;

        let candidates = self.solver.solve(&problem, &repair)?;
        let best = select_max_sharpe(&candidates).ok_or_else(|| {
            SimulationError::OptimizationError(format!(
                "{} returned no candidates for {}",
                self.solver.name(),
                date
            ))
        })?;
        if best.weights.len() != prices.len() {
            return Err(SimulationError::OptimizationError(format!(
                "Candidate has {} weights, expected {}",
                best.weights.len(),
                prices.len()
            )));
        }

        debug!(
            "Relocated on {}: {} candidates, risk {:.6}, log return {:.6}, sharpe {:.4}",
            date,
            candidates.len(),
            best.risk(),
            best.expected_log_return(),
            best.sharpe
        );
        Ok(best.weights.clone())
    }

    /// Replay every date from the start date to the end of the panel.
    pub fn run(&mut self) -> Result<&[PortfolioState]> {
        let panel = Arc::clone(&self.panel);
        let dates = &panel.dates()[self.start_index..];
        let n = panel.tickers().len();

        info!(
            "Running simulation from {} over {} dates ({} tickers, solver {})",
            self.config.start_date,
            dates.len(),
            n,
            self.solver.name()
        );

        let seed_date = if self.start_index > 0 {
            panel.dates()[self.start_index - 1]
        } else {
            self.config.start_date.pred_opt().unwrap_or(self.config.start_date)
        };

        let mut target = self.initial_target_allocation().map(<[f64]>::to_vec);
        let mut positions = vec![0u64; n];
        let mut cash = self.config.initial_amount;

        let mut history = Vec::with_capacity(dates.len() + 1);
        history.push(PortfolioState {
            date: seed_date,
            amount: self.config.initial_amount,
            target_allocation: target.clone(),
            allocation: vec![0.0; n],
            unallocated: 1.0,
            positions: positions.clone(),
            cash,
        });

        let progress = if self.config.show_progress {
            let pb = ProgressBar::new(dates.len() as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            Some(pb)
        } else {
            None
        };

        for (day, &date) in dates.iter().enumerate() {
            let index = self.start_index + day;
            let prices = panel.prices(index);
            let amount = portfolio_value(prices, &positions) + cash;

            if let Some(interval) = self.config.relocation_interval {
                if day % interval == 0 {
                    target = Some(self.optimize_portfolio(date, prices, amount)?);
                }
            }

            if let Some(interval) = self.config.rebalancing_interval {
                if day % interval == 0 {
                    let weights = target.as_deref().ok_or_else(|| {
                        SimulationError::ConfigError(format!(
                            "No target allocation available to rebalance on {date}"
                        ))
                    })?;
                    positions = rebalance(weights, amount, prices);
                }
            }

            let (allocation, unallocated) = if amount > 0.0 {
                let allocation: Vec<f64> = prices
                    .iter()
                    .zip(&positions)
                    .map(|(p, &q)| p * q as f64 / amount)
                    .collect();
                let unallocated = 1.0 - allocation.iter().sum::<f64>();
                (allocation, unallocated)
            } else {
                (vec![0.0; n], 1.0)
            };
            cash = amount * unallocated;

            history.push(PortfolioState {
                date,
                amount,
                target_allocation: target.clone(),
                allocation,
                unallocated,
                positions: positions.clone(),
                cash,
            });

            positions = roll_forward(&positions, panel.adjust_factors(index));

            if let Some(pb) = &progress {
                pb.inc(1);
            }
        }

        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        if let Some(last) = history.last() {
            info!(
                "Simulation from {} finished: final amount {:.2} ({:+.2}%)",
                self.config.start_date,
                last.amount,
                (last.amount / self.config.initial_amount - 1.0) * 100.0
            );
        }

        self.history = history;
        Ok(&self.history)
    }

    /// Consume the simulation and package the recorded history.
    pub fn into_result(self) -> SimulationResult {
        SimulationResult {
            tickers: self.panel.tickers().to_vec(),
            initial_target_allocation: self.config.initial_target_allocation.clone(),
            config: self.config,
            history: self.history,
        }
    }
}

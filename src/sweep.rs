//! Parallel sweeps over simulation start dates.
//!
//! Each start date runs as an independent [`Simulation`] over the same shared
//! panel. Failures are reported per date and never retried.

use crate::error::{Result, SimulationError};
use crate::export::export_run;
use crate::panel::Panel;
use crate::simulation::{Simulation, SimulationConfig};
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Start dates to sweep: every `step`-th trading date in `[from, to]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    pub from: NaiveDate,
    pub to: NaiveDate,
    #[serde(default = "default_step")]
    pub step: usize,
}

fn default_step() -> usize { 7 }

impl SweepConfig {
    pub fn new(from: NaiveDate, to: NaiveDate, step: usize) -> Self {
        Self { from, to, step }
    }

    /// Resolve the start dates against the panel's trading calendar.
    pub fn start_dates(&self, panel: &Panel) -> Result<Vec<NaiveDate>> {
        if self.step == 0 {
            return Err(SimulationError::ConfigError(
                "Sweep step must be positive".to_string(),
            ));
        }
        if self.from > self.to {
            return Err(SimulationError::ConfigError(format!(
                "Sweep range is empty: {} is after {}",
                self.from, self.to
            )));
        }
        Ok(panel
            .dates()
            .iter()
            .filter(|d| **d >= self.from && **d <= self.to)
            .step_by(self.step)
            .copied()
            .collect())
    }
}

/// Result of one start date in a sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepOutcome {
    pub start_date: NaiveDate,
    /// Final portfolio value when the run succeeded.
    pub final_amount: Option<f64>,
    pub total_return_pct: Option<f64>,
    /// Directory the run was exported to, if exported.
    pub output_dir: Option<PathBuf>,
    /// Error message when the run failed.
    pub error: Option<String>,
}

impl SweepOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

fn run_one(
    panel: Arc<Panel>,
    template: &SimulationConfig,
    start_date: NaiveDate,
    output_dir: Option<&Path>,
) -> Result<SweepOutcome> {
    let mut config = template.clone();
    config.start_date = start_date;
    config.show_progress = false;

    let mut simulation = Simulation::new(panel, config)?;
    simulation.run()?;
    let result = simulation.into_result();

    let dir = match output_dir {
        Some(root) => {
            let dir = root.join(start_date.format("%Y-%m-%d").to_string());
            export_run(&result, &dir)?;
            Some(dir)
        }
        None => None,
    };

    Ok(SweepOutcome {
        start_date,
        final_amount: Some(result.final_amount()),
        total_return_pct: Some(result.total_return_pct()),
        output_dir: dir,
        error: None,
    })
}

/// Run one simulation per start date in parallel.
///
/// `template` supplies every parameter except the start date. When
/// `output_dir` is set each run is exported to `<output_dir>/<start_date>/`.
/// Outcomes are returned in start-date order.
pub fn run_sweep(
    panel: Arc<Panel>,
    template: &SimulationConfig,
    sweep: &SweepConfig,
    output_dir: Option<&Path>,
) -> Result<Vec<SweepOutcome>> {
    let dates = sweep.start_dates(&panel)?;
    info!(
        "Sweeping {} start dates from {} to {} (step {})",
        dates.len(),
        sweep.from,
        sweep.to,
        sweep.step
    );

    let progress = if template.show_progress {
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

    let outcomes: Vec<SweepOutcome> = dates
        .par_iter()
        .map(|&start_date| {
            let outcome = match run_one(Arc::clone(&panel), template, start_date, output_dir) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Simulation starting {} failed: {}", start_date, e);
                    SweepOutcome {
                        start_date,
                        final_amount: None,
                        total_return_pct: None,
                        output_dir: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            if let Some(pb) = &progress {
                pb.inc(1);
            }
            outcome
        })
        .collect();

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    info!(
        "Sweep finished: {} succeeded, {} failed",
        outcomes.len() - failed,
        failed
    );
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PanelRecord;
    use tempfile::tempdir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn panel() -> Arc<Panel> {
        let mut records = Vec::new();
        for d in 1..=10 {
            records.push(PanelRecord::new(day(d), "A", 0.001 * d as f64, 10.0 + d as f64, 1.0));
            records.push(PanelRecord::new(day(d), "B", -0.001 * d as f64, 20.0, 1.0));
        }
        Arc::new(Panel::from_records(records).unwrap())
    }

    #[test]
    fn test_start_dates_step() {
        let dates = SweepConfig::new(day(2), day(9), 3).start_dates(&panel()).unwrap();
        assert_eq!(dates, vec![day(2), day(5), day(8)]);
    }

    #[test]
    fn test_invalid_sweep_rejected() {
        assert!(SweepConfig::new(day(2), day(9), 0).start_dates(&panel()).is_err());
        assert!(SweepConfig::new(day(9), day(2), 1).start_dates(&panel()).is_err());
    }

    #[test]
    fn test_run_sweep_reports_failures() {
        let template = SimulationConfig::new(day(1), 1000.0, 1)
            .with_initial_allocation(vec![0.5, 0.5])
            .with_rebalancing(2);
        let dir = tempdir().unwrap();
        let outcomes = run_sweep(
            panel(),
            &template,
            &SweepConfig::new(day(3), day(6), 1),
            Some(dir.path()),
        )
        .unwrap();

        assert_eq!(outcomes.len(), 4);
        assert!(outcomes.iter().all(|o| o.is_success()));
        assert_eq!(outcomes[0].start_date, day(3));
        assert!(dir.path().join("2024-01-03").join("history.csv").exists());

        // Window of 5 rows cannot be satisfied before the 3rd or 4th.
        let template = SimulationConfig::new(day(1), 1000.0, 5)
            .with_relocation(1)
            .with_rebalancing(1)
            .with_solver(crate::solver::SolverConfig {
                population_size: 8,
                generations: 2,
                ..Default::default()
            });
        let outcomes = run_sweep(panel(), &template, &SweepConfig::new(day(3), day(4), 1), None).unwrap();
        assert!(outcomes.iter().all(|o| !o.is_success()));
        assert!(outcomes[0].error.as_deref().unwrap_or("").contains("Insufficient history"));
    }
}

//! Multi-objective solver used at relocation events.
//!
//! The engine only depends on the [`MultiObjectiveSolver`] contract: given the
//! problem and the repair operator, return a Pareto set of repaired candidates,
//! deterministically for a fixed seed. [`SmsEmoa`] is the bundled
//! implementation, an S-metric selection evolutionary algorithm specialised to
//! two objectives.

use crate::error::{Result, SimulationError};
use crate::problem::{Evaluation, PortfolioProblem};
use crate::repair::PortfolioRepair;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, trace};

/// A repaired weight vector with its objective values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub weights: Vec<f64>,
    /// `[risk, -expected_log_return]`.
    pub objectives: [f64; 2],
    pub sharpe: f64,
}

impl Candidate {
    pub fn new(weights: Vec<f64>, evaluation: Evaluation) -> Self {
        Self {
            weights,
            objectives: evaluation.objectives(),
            sharpe: evaluation.sharpe,
        }
    }

    pub fn risk(&self) -> f64 {
        self.objectives[0]
    }

    pub fn expected_log_return(&self) -> f64 {
        -self.objectives[1]
    }

    fn is_feasible(&self) -> bool {
        self.objectives.iter().all(|f| f.is_finite())
    }
}

/// Contract for the Pareto-front search run at each relocation.
pub trait MultiObjectiveSolver: Send + Sync {
    /// Solver name for logging.
    fn name(&self) -> &str;

    /// Return the Pareto-optimal candidates for `problem`.
    ///
    /// Every candidate the solver evaluates must have passed through `repair`.
    fn solve(&self, problem: &PortfolioProblem, repair: &PortfolioRepair) -> Result<Vec<Candidate>>;
}

/// Pick the candidate with the highest Sharpe score.
///
/// NaN scores are skipped; if every score is NaN the first candidate is
/// returned. Ties keep the earliest candidate.
pub fn select_max_sharpe(candidates: &[Candidate]) -> Option<&Candidate> {
    candidates
        .iter()
        .filter(|c| !c.sharpe.is_nan())
        .fold(None, |best: Option<&Candidate>, c| match best {
            Some(b) if b.sharpe.total_cmp(&c.sharpe) != Ordering::Less => Some(b),
            _ => Some(c),
        })
        .or_else(|| candidates.first())
}

/// Settings for [`SmsEmoa`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Number of individuals kept between generations.
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    /// Offspring produced per generation (None = population size).
    #[serde(default)]
    pub offspring_size: Option<usize>,
    /// Number of generations to run.
    #[serde(default = "default_generations")]
    pub generations: usize,
    /// Seed for the solver's random number generator.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Probability that a mating applies SBX crossover.
    #[serde(default = "default_crossover_prob")]
    pub crossover_prob: f64,
    /// SBX distribution index.
    #[serde(default = "default_crossover_eta")]
    pub crossover_eta: f64,
    /// Polynomial mutation distribution index.
    #[serde(default = "default_mutation_eta")]
    pub mutation_eta: f64,
    /// Per-variable mutation probability (None = 1 / n).
    #[serde(default)]
    pub mutation_prob: Option<f64>,
}

fn default_population_size() -> usize { 100 }
fn default_generations() -> usize { 200 }
fn default_seed() -> u64 { 1 }
fn default_crossover_prob() -> f64 { 0.9 }
fn default_crossover_eta() -> f64 { 15.0 }
fn default_mutation_eta() -> f64 { 20.0 }

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            population_size: default_population_size(),
            offspring_size: None,
            generations: default_generations(),
            seed: default_seed(),
            crossover_prob: default_crossover_prob(),
            crossover_eta: default_crossover_eta(),
            mutation_eta: default_mutation_eta(),
            mutation_prob: None,
        }
    }
}

impl SolverConfig {
    /// Check parameter ranges.
    pub fn validate(&self) -> Result<()> {
        if self.population_size < 2 {
            return Err(SimulationError::ConfigError(
                "Solver population size must be at least 2".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.crossover_prob) {
            return Err(SimulationError::ConfigError(
                "Crossover probability must be in [0, 1]".to_string(),
            ));
        }
        if let Some(p) = self.mutation_prob {
            if !(0.0..=1.0).contains(&p) {
                return Err(SimulationError::ConfigError(
                    "Mutation probability must be in [0, 1]".to_string(),
                ));
            }
        }
        if self.crossover_eta < 0.0 || self.mutation_eta < 0.0 {
            return Err(SimulationError::ConfigError(
                "Distribution indices must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Use a different seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Steady (mu + lambda) S-metric selection EMOA for two objectives.
///
/// Survival keeps whole non-dominated fronts while they fit, then drops the
/// member of the splitting front with the smallest exclusive hypervolume
/// contribution, one at a time. Candidates with non-finite objectives always
/// rank behind every finite one.
#[derive(Debug, Clone, Default)]
pub struct SmsEmoa {
    config: SolverConfig,
}

impl SmsEmoa {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    fn tournament<'a>(&self, population: &'a [Candidate], rng: &mut StdRng) -> &'a Candidate {
        let a = &population[rng.gen_range(0..population.len())];
        let b = &population[rng.gen_range(0..population.len())];
        match (a.is_feasible(), b.is_feasible()) {
            (true, false) => a,
            (false, true) => b,
            _ if dominates(&a.objectives, &b.objectives) => a,
            _ if dominates(&b.objectives, &a.objectives) => b,
            _ => {
                if rng.gen_bool(0.5) {
                    a
                } else {
                    b
                }
            }
        }
    }

    fn sbx(&self, p1: &[f64], p2: &[f64], rng: &mut StdRng) -> (Vec<f64>, Vec<f64>) {
        let eta = self.config.crossover_eta;
        let mut c1 = p1.to_vec();
        let mut c2 = p2.to_vec();

        for i in 0..p1.len() {
            if rng.gen::<f64>() > 0.5 {
                continue;
            }
            let (y1, y2) = if p1[i] <= p2[i] { (p1[i], p2[i]) } else { (p2[i], p1[i]) };
            if y2 - y1 < 1e-14 {
                continue;
            }
            let u = rng.gen::<f64>();
            let spread = |beta: f64| {
                let alpha = 2.0 - beta.powf(-(eta + 1.0));
                if u <= 1.0 / alpha {
                    (u * alpha).powf(1.0 / (eta + 1.0))
                } else {
                    (1.0 / (2.0 - u * alpha)).powf(1.0 / (eta + 1.0))
                }
            };
            let beta_low = 1.0 + 2.0 * y1 / (y2 - y1);
            let beta_high = 1.0 + 2.0 * (1.0 - y2) / (y2 - y1);
            let mut a = (0.5 * ((y1 + y2) - spread(beta_low) * (y2 - y1))).clamp(0.0, 1.0);
            let mut b = (0.5 * ((y1 + y2) + spread(beta_high) * (y2 - y1))).clamp(0.0, 1.0);
            if rng.gen_bool(0.5) {
                std::mem::swap(&mut a, &mut b);
            }
            c1[i] = a;
            c2[i] = b;
        }
        (c1, c2)
    }

    fn mutate(&self, x: &mut [f64], rng: &mut StdRng) {
        let eta = self.config.mutation_eta;
        let prob = self
            .config
            .mutation_prob
            .unwrap_or(1.0 / x.len().max(1) as f64);
        let mut_pow = 1.0 / (eta + 1.0);

        for v in x.iter_mut() {
            if rng.gen::<f64>() >= prob {
                continue;
            }
            let y = *v;
            let u = rng.gen::<f64>();
            let deltaq = if u < 0.5 {
                let xy = 1.0 - y;
                let val = 2.0 * u + (1.0 - 2.0 * u) * xy.powf(eta + 1.0);
                val.powf(mut_pow) - 1.0
            } else {
                let xy = y;
                let val = 2.0 * (1.0 - u) + 2.0 * (u - 0.5) * xy.powf(eta + 1.0);
                1.0 - val.powf(mut_pow)
            };
            *v = (y + deltaq).clamp(0.0, 1.0);
        }
    }

    fn survive(&self, merged: Vec<Candidate>, size: usize) -> Vec<Candidate> {
        if merged.len() <= size {
            return merged;
        }

        let (feasible, infeasible): (Vec<Candidate>, Vec<Candidate>) =
            merged.into_iter().partition(|c| c.is_feasible());

        if feasible.len() <= size {
            let mut survivors = feasible;
            survivors.extend(infeasible.into_iter().take(size - survivors.len()));
            return survivors;
        }

        let points: Vec<[f64; 2]> = feasible.iter().map(|c| c.objectives).collect();
        let normalized = normalize(&points);
        let fronts = non_dominated_sort(&points);

        let mut keep: Vec<usize> = Vec::with_capacity(size);
        for front in fronts {
            if keep.len() + front.len() <= size {
                keep.extend(front);
                if keep.len() == size {
                    break;
                }
                continue;
            }

            let mut front = front;
            while keep.len() + front.len() > size {
                let pts: Vec<[f64; 2]> = front.iter().map(|&i| normalized[i]).collect();
                let contributions = hypervolume_contributions(&pts, [1.1, 1.1]);
                let worst = contributions
                    .iter()
                    .enumerate()
                    .min_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(pos, _)| pos)
                    .unwrap_or(0);
                front.remove(worst);
            }
            keep.extend(front);
            break;
        }

        keep.sort_unstable();
        let mut feasible: Vec<Option<Candidate>> = feasible.into_iter().map(Some).collect();
        keep.into_iter().filter_map(|i| feasible[i].take()).collect()
    }
}

impl MultiObjectiveSolver for SmsEmoa {
    fn name(&self) -> &str {
        "SMS-EMOA"
    }

    fn solve(&self, problem: &PortfolioProblem, repair: &PortfolioRepair) -> Result<Vec<Candidate>> {
        self.config.validate()?;
        let n = problem.n_var();
        if repair.prices().len() != n {
            return Err(SimulationError::InvalidInput(format!(
                "Repair operator covers {} assets, problem has {}",
                repair.prices().len(),
                n
            )));
        }

        let pop_size = self.config.population_size;
        let n_offspring = self.config.offspring_size.unwrap_or(pop_size).max(1);
        let max_attempts = pop_size.max(n_offspring) * 10;
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        let evaluate = |x: Vec<f64>| {
            let eval = problem.evaluate(&x);
            Candidate::new(x, eval)
        };

        let mut population: Vec<Candidate> = Vec::with_capacity(pop_size);
        let mut attempts = 0;
        while population.len() < pop_size && attempts < max_attempts {
            attempts += 1;
            let raw: Vec<f64> = (0..n).map(|_| rng.gen::<f64>()).collect();
            let x = repair.repair(&raw);
            if !contains_weights(&population, &x) {
                population.push(evaluate(x));
            }
        }

        for generation in 0..self.config.generations {
            let mut offspring: Vec<Candidate> = Vec::with_capacity(n_offspring);
            let mut attempts = 0;
            while offspring.len() < n_offspring && attempts < max_attempts {
                attempts += 1;
                let p1 = self.tournament(&population, &mut rng);
                let p2 = self.tournament(&population, &mut rng);
                let (mut c1, mut c2) = if rng.gen_bool(self.config.crossover_prob) {
                    self.sbx(&p1.weights, &p2.weights, &mut rng)
                } else {
                    (p1.weights.clone(), p2.weights.clone())
                };
                self.mutate(&mut c1, &mut rng);
                self.mutate(&mut c2, &mut rng);

                for child in [c1, c2] {
                    if offspring.len() >= n_offspring {
                        break;
                    }
                    let x = repair.repair(&child);
                    if !contains_weights(&population, &x) && !contains_weights(&offspring, &x) {
                        offspring.push(evaluate(x));
                    }
                }
            }

            if offspring.is_empty() {
                trace!("Generation {}: no new offspring, stopping early", generation);
                break;
            }

            population.extend(offspring);
            population = self.survive(population, pop_size);
        }

        let feasible: Vec<Candidate> = population.into_iter().filter(|c| c.is_feasible()).collect();
        if feasible.is_empty() {
            return Err(SimulationError::OptimizationError(
                "Every candidate has a non-finite objective".to_string(),
            ));
        }

        let points: Vec<[f64; 2]> = feasible.iter().map(|c| c.objectives).collect();
        let first_front = non_dominated_sort(&points).into_iter().next().unwrap_or_default();
        let mut front: Vec<Candidate> = first_front.into_iter().map(|i| feasible[i].clone()).collect();
        front.sort_by(|a, b| a.objectives[0].total_cmp(&b.objectives[0]));

        debug!(
            "{} returned {} Pareto candidates over {} assets",
            self.name(),
            front.len(),
            n
        );
        Ok(front)
    }
}

fn contains_weights(population: &[Candidate], x: &[f64]) -> bool {
    population.iter().any(|c| c.weights == x)
}

/// `a` Pareto-dominates `b` (both objectives minimized).
pub fn dominates(a: &[f64; 2], b: &[f64; 2]) -> bool {
    a[0] <= b[0] && a[1] <= b[1] && (a[0] < b[0] || a[1] < b[1])
}

/// Fast non-dominated sorting; returns fronts as index lists, best first.
pub fn non_dominated_sort(points: &[[f64; 2]]) -> Vec<Vec<usize>> {
    let n = points.len();
    let mut dominated_by: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut domination_count = vec![0usize; n];

    for i in 0..n {
        for j in (i + 1)..n {
            if dominates(&points[i], &points[j]) {
                dominated_by[i].push(j);
                domination_count[j] += 1;
            } else if dominates(&points[j], &points[i]) {
                dominated_by[j].push(i);
                domination_count[i] += 1;
            }
        }
    }

    let mut fronts = Vec::new();
    let mut current: Vec<usize> = (0..n).filter(|&i| domination_count[i] == 0).collect();
    while !current.is_empty() {
        let mut next = Vec::new();
        for &i in &current {
            for &j in &dominated_by[i] {
                domination_count[j] -= 1;
                if domination_count[j] == 0 {
                    next.push(j);
                }
            }
        }
        next.sort_unstable();
        fronts.push(current);
        current = next;
    }
    fronts
}

/// Exclusive hypervolume contribution of each point of a non-dominated 2-D front.
pub fn hypervolume_contributions(front: &[[f64; 2]], reference: [f64; 2]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..front.len()).collect();
    order.sort_by(|&a, &b| {
        front[a][0]
            .total_cmp(&front[b][0])
            .then(front[a][1].total_cmp(&front[b][1]))
    });

    let mut contributions = vec![0.0; front.len()];
    for (k, &i) in order.iter().enumerate() {
        let right = order.get(k + 1).map(|&j| front[j][0]).unwrap_or(reference[0]);
        let upper = if k == 0 {
            reference[1]
        } else {
            front[order[k - 1]][1]
        };
        contributions[i] = ((right - front[i][0]) * (upper - front[i][1])).max(0.0);
    }
    contributions
}

fn normalize(points: &[[f64; 2]]) -> Vec<[f64; 2]> {
    let mut ideal = [f64::INFINITY; 2];
    let mut nadir = [f64::NEG_INFINITY; 2];
    for p in points {
        for m in 0..2 {
            ideal[m] = ideal[m].min(p[m]);
            nadir[m] = nadir[m].max(p[m]);
        }
    }
    let range = [
        if nadir[0] > ideal[0] { nadir[0] - ideal[0] } else { 1.0 },
        if nadir[1] > ideal[1] { nadir[1] - ideal[1] } else { 1.0 },
    ];
    points
        .iter()
        .map(|p| [(p[0] - ideal[0]) / range[0], (p[1] - ideal[1]) / range[1]])
        .collect()
}

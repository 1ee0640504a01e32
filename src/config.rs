//! Solver configuration.
//!
//! A [`SolverConfig`] groups what one experiment needs:
//! - [`RunConfig`]: debug flag, local search switch, time and run budgets, worker threads
//! - [`ParameterSets`]: the discrete values the Q-learning controller chooses from
//! - [`SearchSettings`]: restart, local-search trigger and community detection thresholds
//!
//! Every section has defaults, so a JSON file only needs the fields it changes.

use crate::error::SolverError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Per-experiment run settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Log every generation and the final Q-table
    pub debug: bool,
    /// Apply RVND to promising elites
    pub local_search: bool,
    /// Wall-clock budget of one run, in seconds
    pub max_time: f64,
    /// Number of independent runs (seeded 1..=max_runs)
    pub max_runs: usize,
    /// Worker threads per run
    pub max_threads: usize,
    /// Stop after this many generations even if time remains
    pub max_generations: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            debug: false,
            local_search: true,
            max_time: 60.0,
            max_runs: 1,
            max_threads: 1,
            max_generations: None,
        }
    }
}

/// Candidate values of the seven controlled parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterSets {
    pub population: Vec<usize>,
    pub elite: Vec<f64>,
    pub mutant: Vec<f64>,
    pub inheritance: Vec<f64>,
    pub epsilon: Vec<f64>,
    pub learning_rate: Vec<f64>,
    pub discount: Vec<f64>,
}

impl Default for ParameterSets {
    fn default() -> Self {
        ParameterSets {
            population: vec![233, 377, 610, 987, 1597],
            elite: vec![0.10, 0.15, 0.20, 0.25, 0.30],
            mutant: vec![0.01, 0.02, 0.03, 0.04, 0.05],
            inheritance: vec![0.55, 0.60, 0.65, 0.70, 0.75, 0.80],
            epsilon: vec![0.5, 0.6, 0.7, 0.8, 0.9],
            learning_rate: vec![0.1, 0.2, 0.3, 0.4, 0.5],
            discount: vec![0.4, 0.5, 0.6, 0.7, 0.8],
        }
    }
}

impl ParameterSets {
    /// Largest candidate population size (initial population)
    pub fn max_population(&self) -> usize {
        self.population.iter().copied().max().unwrap_or(0)
    }
}

/// Thresholds of the evolutionary loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Generations without a new best before the population is regenerated
    pub restart_after: usize,
    /// Generations without a new best before local search fires anyway
    pub stagnation_trigger: usize,
    /// Generations before greedy Q-learning actions are allowed
    pub greedy_warmup: usize,
    /// Minimum Pearson correlation for an edge between two elites
    pub correlation_threshold: f64,
    /// Upper bound on label propagation passes
    pub max_label_passes: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        SearchSettings {
            restart_after: 40,
            stagnation_trigger: 5,
            greedy_warmup: 30,
            correlation_threshold: 0.7,
            max_label_passes: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub run: RunConfig,
    pub parameters: ParameterSets,
    pub search: SearchSettings,
}

impl SolverConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, SolverError> {
        let content = fs::read_to_string(path)?;
        let config: SolverConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the optimizer cannot run with.
    pub fn validate(&self) -> Result<(), SolverError> {
        let fail = |msg: String| Err(SolverError::Config(msg));
        let run = &self.run;
        let sets = &self.parameters;

        if run.max_threads == 0 {
            return fail("max_threads must be at least 1".to_string());
        }
        if run.max_runs == 0 {
            return fail("max_runs must be at least 1".to_string());
        }
        if !(run.max_time.is_finite() && run.max_time >= 0.0) {
            return fail(format!("max_time must be a non-negative number, got {}", run.max_time));
        }

        let lists: [(&str, usize); 7] = [
            ("population", sets.population.len()),
            ("elite", sets.elite.len()),
            ("mutant", sets.mutant.len()),
            ("inheritance", sets.inheritance.len()),
            ("epsilon", sets.epsilon.len()),
            ("learning_rate", sets.learning_rate.len()),
            ("discount", sets.discount.len()),
        ];
        if let Some((name, _)) = lists.iter().find(|(_, len)| *len == 0) {
            return fail(format!("parameter set '{}' is empty", name));
        }
        if sets.population.iter().any(|&p| p < 3) {
            return fail("population sizes must be at least 3".to_string());
        }

        let fractions = [
            ("elite", &sets.elite),
            ("mutant", &sets.mutant),
            ("inheritance", &sets.inheritance),
            ("epsilon", &sets.epsilon),
            ("learning_rate", &sets.learning_rate),
            ("discount", &sets.discount),
        ];
        for (name, values) in fractions {
            if let Some(v) = values.iter().find(|v| !(0.0..=1.0).contains(*v)) {
                return fail(format!("parameter set '{}' contains {} outside [0, 1]", name, v));
            }
        }
        if !(0.0..=1.0).contains(&self.search.correlation_threshold) {
            return fail(format!(
                "correlation_threshold must lie in [0, 1], got {}",
                self.search.correlation_threshold
            ));
        }
        Ok(())
    }
}

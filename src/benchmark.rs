//! Multi-run experiments.
//!
//! An [`Experiment`] runs the optimizer once per seed `1..=max_runs`, keeps
//! the per-run diagnostics and produces the statistics, CSV table, JSON
//! export and text report of the whole experiment.

use crate::config::SolverConfig;
use crate::error::SolverError;
use crate::heuristics::brkga::{solve, RunResult};
use crate::problem::Problem;
use crate::solution::Solution;

use chrono::{DateTime, Local};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::fs::File;
use std::path::Path;

/// One row of the per-run table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub seed: u64,
    pub objective: f64,
    pub feasible: bool,
    /// Whether the best solution came out of local search
    pub local_searched: bool,
    pub decoder_key: f64,
    pub decoder: String,
    pub scheduler_key: f64,
    pub scheduler: String,
    pub charging_priority_key: f64,
    pub charging_priority: String,
    pub trt: f64,
    pub ert: f64,
    pub cc: f64,
    pub violations: usize,
    pub time_to_best: f64,
    pub total_time: f64,
    pub generations: usize,
    pub restarts: usize,
    pub local_search_calls: usize,
}

impl RunRecord {
    pub fn from_result(result: &RunResult) -> Self {
        let best = &result.best;
        let chromosome = &best.chromosome;
        RunRecord {
            seed: result.seed,
            objective: best.objective,
            feasible: best.is_feasible(),
            local_searched: best.local_searched,
            decoder_key: chromosome.decoder_key(),
            decoder: format!("{:?}", chromosome.decoder_variant()),
            scheduler_key: chromosome.scheduler_key(),
            scheduler: format!("{:?}", chromosome.scheduler_variant()),
            charging_priority_key: chromosome.charging_priority_key(),
            charging_priority: format!("{:?}", chromosome.charging_priority()),
            trt: best.terms.trt,
            ert: best.terms.ert,
            cc: best.terms.cc,
            violations: best.terms.violations,
            time_to_best: result.time_to_best,
            total_time: result.total_time,
            generations: result.generations,
            restarts: result.restarts,
            local_search_calls: result.local_search_calls,
        }
    }
}

/// Aggregated statistics over the runs of an experiment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSummary {
    pub problem: String,
    pub started: String,
    pub runs: usize,
    pub feasible_runs: usize,
    pub best_objective: f64,
    pub best_seed: u64,
    pub avg_objective: f64,
    pub std_objective: f64,
    pub avg_time_to_best: f64,
    pub avg_total_time: f64,
}

/// Independent runs of the optimizer on one problem
pub struct Experiment<'a> {
    problem: &'a Problem,
    config: &'a SolverConfig,
    started: DateTime<Local>,
    results: Vec<RunResult>,
}

impl<'a> Experiment<'a> {
    pub fn new(problem: &'a Problem, config: &'a SolverConfig) -> Self {
        Experiment {
            problem,
            config,
            started: Local::now(),
            results: Vec::new(),
        }
    }

    /// Run every seed, calling `on_run` after each one.
    pub fn run<F: FnMut(&RunRecord)>(&mut self, mut on_run: F) -> Result<(), SolverError> {
        self.started = Local::now();
        log::info!(
            "Running {} runs of {:.1}s on {} with {} threads",
            self.config.run.max_runs,
            self.config.run.max_time,
            self.problem.name,
            self.config.run.max_threads
        );

        for seed in 1..=self.config.run.max_runs as u64 {
            let result = solve(self.problem, self.config, seed)?;
            on_run(&RunRecord::from_result(&result));
            self.results.push(result);
        }
        Ok(())
    }

    pub fn results(&self) -> &[RunResult] {
        &self.results
    }

    pub fn records(&self) -> Vec<RunRecord> {
        self.results.iter().map(RunRecord::from_result).collect()
    }

    /// Best run over the experiment (first one on ties)
    pub fn best(&self) -> Option<&RunResult> {
        self.results.iter().min_by_key(|r| OrderedFloat(r.best.objective))
    }

    pub fn summary(&self) -> Option<ExperimentSummary> {
        let best = self.best()?;
        let objectives: Vec<f64> = self.results.iter().map(|r| r.best.objective).collect();
        let std_objective = if objectives.len() > 1 {
            objectives.iter().std_dev()
        } else {
            0.0
        };

        Some(ExperimentSummary {
            problem: self.problem.name.clone(),
            started: self.started.format("%Y-%m-%d %H:%M:%S").to_string(),
            runs: self.results.len(),
            feasible_runs: self.results.iter().filter(|r| r.best.is_feasible()).count(),
            best_objective: best.best.objective,
            best_seed: best.seed,
            avg_objective: objectives.iter().mean(),
            std_objective,
            avg_time_to_best: self.results.iter().map(|r| r.time_to_best).mean(),
            avg_total_time: self.results.iter().map(|r| r.total_time).mean(),
        })
    }

    /// Export the per-run table to CSV
    pub fn export_to_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), SolverError> {
        let file = File::create(path)?;
        let mut writer = csv::Writer::from_writer(file);
        for record in self.records() {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Export the best solution found to JSON
    pub fn export_best_json<P: AsRef<Path>>(&self, path: P) -> Result<(), SolverError> {
        let best = self.best().ok_or(SolverError::NoSolution)?;
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, &best.best)?;
        Ok(())
    }

    /// Generate summary report
    pub fn generate_report(&self) -> String {
        let mut report = String::new();

        report.push_str("========================================\n");
        report.push_str("      E-ADARP BRKGA-QL Report\n");
        report.push_str("========================================\n\n");

        let summary = match self.summary() {
            Some(summary) => summary,
            None => {
                report.push_str("No run completed.\n");
                return report;
            }
        };

        report.push_str(&format!("Problem: {}\n", summary.problem));
        report.push_str(&format!("Started: {}\n\n", summary.started));

        report.push_str(&format!(
            "{:<6} {:>14} {:>10} {:>10} {:>10} {:>14} {:>16} {:>10} {:>10}\n",
            "Seed", "Objective", "TRT", "ERT", "CC", "Decoder", "Scheduler", "Best(s)", "Total(s)"
        ));
        report.push_str("-".repeat(100).as_str());
        report.push('\n');

        for record in self.records() {
            report.push_str(&format!(
                "{:<6} {:>14.2} {:>10.2} {:>10.2} {:>10.2} {:>14} {:>16} {:>10.2} {:>10.2}{}\n",
                record.seed,
                record.objective,
                record.trt,
                record.ert,
                record.cc,
                record.decoder,
                record.scheduler,
                record.time_to_best,
                record.total_time,
                if record.local_searched { " LS" } else { "" }
            ));
        }

        report.push_str("-".repeat(100).as_str());
        report.push('\n');
        report.push_str(&format!(
            "Best: {:.2} (seed {})\nAverage: {:.2}\nStd dev: {:.2}\nFeasible runs: {}/{}\n",
            summary.best_objective,
            summary.best_seed,
            summary.avg_objective,
            summary.std_objective,
            summary.feasible_runs,
            summary.runs
        ));
        report.push_str(&format!(
            "Avg time to best: {:.2}s, avg run time: {:.2}s\n",
            summary.avg_time_to_best, summary.avg_total_time
        ));

        if let Some(best) = self.best() {
            report.push_str(&format_routes(self.problem, &best.best));
        }
        report
    }
}

/// Node sequence of every route, charging stops marked with `*`
pub fn format_routes(problem: &Problem, solution: &Solution) -> String {
    let mut text = String::from("\nRoutes of the best solution:\n");
    for (v, route) in solution.routes.iter().enumerate() {
        let nodes: Vec<String> = route
            .iter()
            .map(|stop| {
                if stop.is_charging {
                    format!("{}*", stop.node)
                } else {
                    stop.node.to_string()
                }
            })
            .collect();
        text.push_str(&format!(
            "  Vehicle {} ({} users): {}\n",
            v,
            solution.users_of(problem, v).len(),
            nodes.join(" -> ")
        ));
    }
    text
}

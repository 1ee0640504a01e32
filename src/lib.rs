//! E-ADARP BRKGA-QL Library
//!
//! A solver for the Electric Autonomous Dial-a-Ride Problem (E-ADARP): a fleet
//! of electric vehicles serves pickup/dropoff requests under time windows,
//! ride-time limits and battery constraints, charging at shared stations with
//! time-varying electricity prices.
//!
//! # Features
//!
//! - Random-key decoding with two insertion orders and two timing policies
//! - Charging insertion at zero-load points with a per-charger minute calendar
//! - Biased random-key genetic algorithm with Q-learning parameter control
//! - Community detection over the elites and RVND local search
//! - Multi-run experiments with CSV / JSON / text reports
//!
//! # Example
//!
//! ```no_run
//! use eadarp_brkga_ql::config::SolverConfig;
//! use eadarp_brkga_ql::heuristics::brkga::solve;
//! use eadarp_brkga_ql::problem::Problem;
//!
//! let problem = Problem::from_json_file("instance.json").unwrap();
//! let mut config = SolverConfig::default();
//! config.run.max_time = 10.0;
//!
//! let result = solve(&problem, &config, 1).unwrap();
//! println!("Best objective: {:.2}", result.best.objective);
//! ```

pub mod benchmark;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod heuristics;
pub mod problem;
pub mod solution;

#[cfg(test)]
mod fixtures;

pub use config::SolverConfig;
pub use error::{ProblemError, SolverError};
pub use problem::Problem;
pub use solution::Solution;

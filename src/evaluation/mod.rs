//! Chromosome evaluation: decoding, charging and timing, objective.

pub mod charging;
pub mod decoder;
pub mod objective;
pub mod routing;
pub mod scheduler;

pub use decoder::decode;
pub use objective::{objective, split_objective};
pub use scheduler::schedule;

use crate::problem::Problem;
use crate::solution::Solution;

/// Schedule an already routed solution and compute its objective.
pub fn evaluate(problem: &Problem, solution: &mut Solution) {
    schedule(problem, solution);
    solution.objective = objective(problem, solution);
}

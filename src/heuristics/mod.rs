//! Search components of the BRKGA-QL.
//!
//! This module exports the local search, the community detector, the
//! Q-learning controller and the evolutionary loop built on them.

pub mod brkga;
pub mod community;
pub mod local_search;
pub mod qlearning;

pub use brkga::{solve, OptimizerContext, RunResult};
pub use community::detect_communities;
pub use local_search::*;
pub use qlearning::{GenerationParameters, QLearningController, QTable};

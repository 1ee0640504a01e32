//! Error types for the E-ADARP solver.
//!
//! Infeasible chromosomes are never errors: they are ranked through the
//! objective value. These types only cover malformed data and the I/O
//! wrappers around the optimizer.

use thiserror::Error;

/// Errors raised while validating a problem bundle.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProblemError {
    #[error("the fleet is empty")]
    EmptyFleet,

    #[error("expected one origin depot per vehicle ({vehicles}), found {depots}")]
    OriginDepotCount { vehicles: usize, depots: usize },

    #[error("at least one final depot is required")]
    NoFinalDepot,

    #[error("{nodes} nodes cannot hold {users} pickups, {users} dropoffs and the depots")]
    TooFewNodes { nodes: usize, users: usize },

    #[error("{context} references node {index}, but only {nodes} nodes exist")]
    NodeOutOfRange {
        context: &'static str,
        index: usize,
        nodes: usize,
    },

    #[error("{matrix} matrix must be {expected}x{expected}")]
    MatrixDimension {
        matrix: &'static str,
        expected: usize,
    },

    #[error("expected {expected} maximum ride times, found {found}")]
    RideTimeCount { expected: usize, found: usize },

    #[error("expected at least {expected} electricity prices, found {found}")]
    PriceCount { expected: usize, found: usize },

    #[error("period length must be positive, got {0}")]
    PeriodLength(f64),

    #[error("charging station at node {node} is invalid: {reason}")]
    InvalidStation { node: usize, reason: &'static str },
}

/// Errors raised by the solver entry points (configuration, worker pool, reports).
#[derive(Debug, Error)]
pub enum SolverError {
    #[error(transparent)]
    Problem(#[from] ProblemError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to build the worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("the run finished without any decoded solution")]
    NoSolution,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

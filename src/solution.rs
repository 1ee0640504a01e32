//! Solution representation for the E-ADARP.
//!
//! A [`Solution`] owns its random-key [`Chromosome`] together with the routes
//! derived from it by the decoder and the scheduler. Chromosome layout for
//! `U` users and `V` vehicles:
//! - `[0, U)` pickup genes, `[U, 2U)` dropoff genes (both carry the user id)
//! - `[2U, 2U+V)` vehicle genes (final depot choice)
//! - charging priority, scheduler and decoder genes (user id `-1`)

use crate::problem::Problem;
use ordered_float::OrderedFloat;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Objective added per user left out of the routes
pub const UNASSIGNED_PENALTY: f64 = 1_000_000.0;
/// Objective per vehicle that could not reach its end-of-route battery level
pub const BATTERY_PENALTY: f64 = 100_000.0;
/// Objective added per user whose ride time exceeds its maximum
pub const RIDE_TIME_PENALTY: f64 = 10_000.0;

/// User id carried by the strategy genes
pub const STRATEGY_USER: i32 = -1;

/// Map a random key onto a variant in `1..=n` using `ceil(key * n + 1e-12)`.
pub fn variant_index(key: f64, n: usize) -> usize {
    let index = (key * n as f64 + 1e-12).ceil();
    (index.max(1.0) as usize).min(n)
}

/// Insertion order used by the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecoderVariant {
    /// Insert the pickup, then the dropoff after it
    PickupFirst,
    /// Insert the dropoff, then the pickup before it
    DropoffFirst,
}

impl DecoderVariant {
    pub fn from_key(key: f64) -> Self {
        match variant_index(key, 2) {
            1 => DecoderVariant::PickupFirst,
            _ => DecoderVariant::DropoffFirst,
        }
    }
}

/// Policy used to fix service start times
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerVariant {
    /// Late pickups, price-aware charging, early dropoffs
    LatePickup,
    /// Pickup times interpolated by the pickup key
    RandomKeyPickup,
}

impl SchedulerVariant {
    pub fn from_key(key: f64) -> Self {
        match variant_index(key, 2) {
            1 => SchedulerVariant::LatePickup,
            _ => SchedulerVariant::RandomKeyPickup,
        }
    }
}

/// Order in which zero-load points are tried for a charging detour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargingPriority {
    CheapestPrice,
    EarliestFirst,
    LatestFirst,
    RandomKey,
    WidestWindow,
}

impl ChargingPriority {
    pub fn from_key(key: f64) -> Self {
        match variant_index(key, 5) {
            1 => ChargingPriority::CheapestPrice,
            2 => ChargingPriority::EarliestFirst,
            3 => ChargingPriority::LatestFirst,
            4 => ChargingPriority::RandomKey,
            _ => ChargingPriority::WidestWindow,
        }
    }
}

/// A `(user, key)` pair of the chromosome
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gene {
    pub user: i32,
    pub key: f64,
}

/// Random-key vector decoded into routes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chromosome {
    pub genes: Vec<Gene>,
}

impl Chromosome {
    /// Build a chromosome from raw keys, assigning the canonical user ids.
    pub fn from_keys(problem: &Problem, keys: &[f64]) -> Self {
        let u = problem.nb_users;
        let routing = 2 * u + problem.nb_vehicles();
        let genes = keys
            .iter()
            .enumerate()
            .map(|(j, &key)| {
                let user = if j < u {
                    j as i32
                } else if j < 2 * u {
                    (j - u) as i32
                } else if j < routing {
                    (j - 2 * u) as i32
                } else {
                    STRATEGY_USER
                };
                Gene { user, key }
            })
            .collect();
        Chromosome { genes }
    }

    /// Draw every key uniformly from `[0, 1)`.
    pub fn random<R: Rng + ?Sized>(problem: &Problem, rng: &mut R) -> Self {
        let keys: Vec<f64> = (0..problem.chromosome_len()).map(|_| rng.gen::<f64>()).collect();
        Self::from_keys(problem, &keys)
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = f64> + '_ {
        self.genes.iter().map(|g| g.key)
    }

    pub fn charging_priority_key(&self) -> f64 {
        self.genes[self.genes.len() - 3].key
    }

    pub fn scheduler_key(&self) -> f64 {
        self.genes[self.genes.len() - 2].key
    }

    pub fn decoder_key(&self) -> f64 {
        self.genes[self.genes.len() - 1].key
    }

    pub fn decoder_variant(&self) -> DecoderVariant {
        DecoderVariant::from_key(self.decoder_key())
    }

    pub fn scheduler_variant(&self) -> SchedulerVariant {
        SchedulerVariant::from_key(self.scheduler_key())
    }

    pub fn charging_priority(&self) -> ChargingPriority {
        ChargingPriority::from_key(self.charging_priority_key())
    }

    /// Sort the pickup genes ascending by key (insertion order).
    pub fn sort_pickups_by_key(&mut self, nb_users: usize) {
        self.genes[..nb_users].sort_by_key(|g| OrderedFloat(g.key));
    }

    /// Restore the canonical order of the pickup genes.
    pub fn sort_pickups_by_user(&mut self, nb_users: usize) {
        self.genes[..nb_users].sort_by_key(|g| g.user);
    }

    /// Vehicle a pickup key assigns its user to
    pub fn vehicle_slot(key: f64, nb_vehicles: usize) -> usize {
        ((key * nb_vehicles as f64).floor().max(0.0) as usize).min(nb_vehicles - 1)
    }

    /// Check the gene layout invariants for `problem`.
    pub fn is_consistent(&self, problem: &Problem) -> bool {
        let u = problem.nb_users;
        let routing = 2 * u + problem.nb_vehicles();
        self.genes.len() == problem.chromosome_len()
            && self.genes.iter().enumerate().all(|(j, g)| {
                let expected = if j < u {
                    j as i32
                } else if j < 2 * u {
                    (j - u) as i32
                } else if j < routing {
                    (j - 2 * u) as i32
                } else {
                    STRATEGY_USER
                };
                g.user == expected && (0.0..1.0).contains(&g.key)
            })
    }
}

/// One visit of a route
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    /// Node index
    pub node: usize,
    /// Service (or charging) start time
    pub t: f64,
    /// Charging duration (0 unless a charging stop)
    pub w: f64,
    /// Earliest feasible start
    pub et: f64,
    /// Latest feasible start
    pub lt: f64,
    /// Remaining passenger capacity after the visit
    pub capacity: i32,
    /// Battery level on arrival
    pub battery: f64,
    /// Charging stops are stripped before re-scheduling
    pub is_charging: bool,
}

impl Stop {
    pub fn new(node: usize) -> Self {
        Stop { node, ..Default::default() }
    }
}

pub type Route = Vec<Stop>;

/// Decomposed objective terms
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveTerms {
    /// Total ride (travel) time
    pub trt: f64,
    /// Excess ride time
    pub ert: f64,
    /// Charging cost
    pub cc: f64,
    /// Users riding longer than their maximum
    pub violations: usize,
}

/// A decoded (and possibly scheduled) individual
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Solution {
    pub chromosome: Chromosome,
    /// One route per vehicle
    pub routes: Vec<Route>,
    pub objective: f64,
    /// Vehicles that could not be charged enough
    pub battery_infeasibles: usize,
    /// Whether start times were assigned
    pub scheduled: bool,
    /// Whether local search was already applied
    pub local_searched: bool,
    /// Community label among the elites
    pub label: usize,
    /// Selected for local search in the current generation
    pub promising: bool,
    pub terms: ObjectiveTerms,
}

impl Solution {
    pub fn new(chromosome: Chromosome) -> Self {
        Solution {
            chromosome,
            objective: f64::INFINITY,
            ..Default::default()
        }
    }

    /// Number of users the decoder left out, read back from the objective
    pub fn unassigned_users(&self) -> usize {
        if self.objective >= UNASSIGNED_PENALTY {
            (self.objective / UNASSIGNED_PENALTY).floor() as usize
        } else {
            0
        }
    }

    /// Route and position of every stop visiting `node`
    pub fn locate(&self, node: usize) -> Option<(usize, usize)> {
        self.routes.iter().enumerate().find_map(|(v, route)| {
            route.iter().position(|s| s.node == node).map(|pos| (v, pos))
        })
    }

    /// Users currently served by route `v`
    pub fn users_of(&self, problem: &Problem, v: usize) -> Vec<usize> {
        self.routes[v]
            .iter()
            .filter(|s| problem.is_pickup(s.node))
            .map(|s| s.node)
            .collect()
    }

    pub fn is_feasible(&self) -> bool {
        self.scheduled
            && self.battery_infeasibles == 0
            && self.terms.violations == 0
            && self.objective < BATTERY_PENALTY
    }
}

//! Random-key decoder.
//!
//! Users are inserted in ascending pickup-key order into the vehicle their
//! pickup key selects, by cheapest feasible insertion. The decoder gene
//! selects whether the pickup or the dropoff is placed first.

use crate::evaluation::evaluate;
use crate::evaluation::routing::{insert_request, SlotFilter};
use crate::problem::Problem;
use crate::solution::{Chromosome, Route, Solution, Stop, UNASSIGNED_PENALTY};
use ordered_float::OrderedFloat;

/// Final depot of every vehicle, chosen by the vehicle genes.
///
/// Vehicles pick in ascending key order. A vehicle whose preferred depot is
/// already taken gets the closest free one (or shares it when none is left).
pub fn assign_final_depots(problem: &Problem, chromosome: &Chromosome) -> Vec<usize> {
    let u = problem.nb_users;
    let nb_vehicles = problem.nb_vehicles();
    let candidates = &problem.final_depots;

    let mut order: Vec<(usize, f64)> = chromosome.genes[2 * u..2 * u + nb_vehicles]
        .iter()
        .enumerate()
        .map(|(v, gene)| (v, gene.key))
        .collect();
    order.sort_by_key(|&(_, key)| OrderedFloat(key));

    let mut assigned = vec![0; nb_vehicles];
    let mut taken: Vec<usize> = Vec::with_capacity(nb_vehicles);
    for (v, key) in order {
        let slot = ((key * candidates.len() as f64).floor().max(0.0) as usize).min(candidates.len() - 1);
        let mut depot = candidates[slot];
        if taken.contains(&depot) {
            if let Some(free) = candidates
                .iter()
                .copied()
                .filter(|d| !taken.contains(d))
                .min_by_key(|&d| OrderedFloat(problem.distance(depot, d)))
            {
                depot = free;
            }
        }
        taken.push(depot);
        assigned[v] = depot;
    }
    assigned
}

/// Origin depot to final depot route of every vehicle
fn initial_routes(problem: &Problem, final_depots: &[usize]) -> Vec<Route> {
    problem
        .vehicles
        .iter()
        .zip(problem.origin_depots.iter().zip(final_depots))
        .map(|(vehicle, (&origin, &destination))| {
            vec![
                Stop {
                    et: problem.nodes[origin].earliest,
                    lt: problem.nodes[origin].latest,
                    capacity: vehicle.capacity,
                    battery: vehicle.initial_battery,
                    ..Stop::new(origin)
                },
                Stop {
                    et: problem.nodes[destination].earliest,
                    lt: problem.nodes[destination].latest,
                    capacity: vehicle.capacity,
                    ..Stop::new(destination)
                },
            ]
        })
        .collect()
}

/// Build the untimed routes of `solution` from its chromosome.
///
/// Returns the number of users left out: the failing user and every user
/// after it in key order. The vehicle that failed keeps its previous route.
pub fn build_routes(problem: &Problem, solution: &mut Solution) -> usize {
    let u = problem.nb_users;
    let nb_vehicles = problem.nb_vehicles();
    let final_depots = assign_final_depots(problem, &solution.chromosome);
    solution.routes = initial_routes(problem, &final_depots);
    let order = solution.chromosome.decoder_variant();

    solution.chromosome.sort_pickups_by_key(u);
    let sequence: Vec<(usize, f64)> = solution.chromosome.genes[..u]
        .iter()
        .map(|g| (g.user as usize, g.key))
        .collect();
    solution.chromosome.sort_pickups_by_user(u);

    for (rank, (user, key)) in sequence.into_iter().enumerate() {
        let v = Chromosome::vehicle_slot(key, nb_vehicles);
        match insert_request(problem, &solution.routes[v], user, order, SlotFilter::NodeWindow) {
            Some(route) => solution.routes[v] = route,
            None => return u - rank,
        }
    }
    0
}

/// Decode a chromosome into a routed, scheduled and evaluated solution.
///
/// Structural failures are not errors: the objective becomes
/// `unassigned * 1_000_000` and no schedule is attempted.
pub fn decode(problem: &Problem, chromosome: Chromosome) -> Solution {
    let mut solution = Solution::new(chromosome);
    let unassigned = build_routes(problem, &mut solution);
    if unassigned > 0 {
        solution.objective = unassigned as f64 * UNASSIGNED_PENALTY;
        return solution;
    }
    evaluate(problem, &mut solution);
    solution
}

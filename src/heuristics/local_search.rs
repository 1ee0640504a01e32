//! Local search for decoded E-ADARP solutions.
//!
//! Operators work on the route skeleton: charging stops are stripped and the
//! windows reset, so every candidate is evaluated by scheduling a copy. The
//! neighborhoods are:
//! - adjacent swap inside a route
//! - tail exchange between two routes at zero-load points
//! - request relocation to another route
//! - request exchange between two routes
//!
//! [`Rvnd`] applies them in random order and restores the schedule at the end.

use crate::evaluation::routing::{
    insert_request, recompute_capacity, remove_request, reset_windows, tighten_et_forward, tighten_lt_backward,
    update_et_forward, update_lt_backward, SlotFilter,
};
use crate::evaluation::{evaluate, objective, schedule};
use crate::problem::Problem;
use crate::solution::{Chromosome, DecoderVariant, Route, Solution, Stop};
use ordered_float::OrderedFloat;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

/// Trait for local search improvement methods
pub trait LocalSearch {
    /// Improve `solution` in place; returns true if its objective decreased.
    fn improve(&self, problem: &Problem, solution: &mut Solution, rng: &mut ChaCha8Rng) -> bool;
    fn name(&self) -> &str;
}

/// Objective of a route skeleton, scheduled on a copy.
pub fn skeleton_objective(problem: &Problem, solution: &Solution) -> f64 {
    let mut scheduled = solution.clone();
    schedule(problem, &mut scheduled);
    objective(problem, &scheduled)
}

/// Recompute remaining capacities of every route; false if any goes negative.
fn recompute_capacities(problem: &Problem, solution: &mut Solution) -> bool {
    solution
        .routes
        .iter_mut()
        .enumerate()
        .all(|(v, route)| recompute_capacity(problem, route, problem.vehicles[v].capacity))
}

/// Remove charging stops and reset every window to its propagated static value.
pub fn strip_charging(problem: &Problem, solution: &mut Solution) {
    for (v, route) in solution.routes.iter_mut().enumerate() {
        route.retain(|stop| !stop.is_charging);
        if !reset_windows(problem, route) {
            log::debug!("route {} has crossing windows after reset", v);
        }
        recompute_capacity(problem, route, problem.vehicles[v].capacity);
    }
    solution.scheduled = false;
}

/// Insert the users the decoder left out into a vehicle other than their own.
///
/// Works on `solution` in place and evaluates it when every user is placed.
/// Returns false (with `solution` partially modified) otherwise.
pub fn repair(problem: &Problem, solution: &mut Solution) -> bool {
    let missing = solution.unassigned_users();
    if missing == 0 {
        return true;
    }
    let u = problem.nb_users;
    let nb_vehicles = problem.nb_vehicles();

    let mut order: Vec<(usize, f64)> = solution.chromosome.genes[..u]
        .iter()
        .map(|g| (g.user as usize, g.key))
        .collect();
    order.sort_by_key(|&(_, key)| OrderedFloat(key));

    for &(user, key) in &order[u - missing.min(u)..] {
        let home = Chromosome::vehicle_slot(key, nb_vehicles);
        let placed = (0..nb_vehicles).filter(|&v| v != home).find_map(|v| {
            insert_request(problem, &solution.routes[v], user, DecoderVariant::PickupFirst, SlotFilter::RouteWindow)
                .map(|route| (v, route))
        });
        match placed {
            Some((v, route)) => solution.routes[v] = route,
            None => return false,
        }
    }

    recompute_capacities(problem, solution);
    let mut scheduled = solution.clone();
    evaluate(problem, &mut scheduled);
    solution.objective = scheduled.objective;
    true
}

/// Move each pickup key into the vehicle slot of the route serving its user.
///
/// The fractional part within the slot is kept.
pub fn sync_chromosome(problem: &Problem, solution: &mut Solution) {
    let nb_vehicles = problem.nb_vehicles();
    let scale = nb_vehicles as f64;
    for v in 0..solution.routes.len() {
        for user in solution.users_of(problem, v) {
            let gene = &mut solution.chromosome.genes[user];
            if Chromosome::vehicle_slot(gene.key, nb_vehicles) != v {
                let scaled = gene.key * scale;
                let fraction = scaled - scaled.floor();
                gene.key = ((v as f64 + fraction) / scale).min(1.0 - f64::EPSILON);
            }
        }
    }
}

// ==================== Adjacent Swap ====================

/// Swap each pair of consecutive stops (except a pickup and its own dropoff)
/// and keep the best swap over all routes.
pub struct AdjacentSwap;

impl AdjacentSwap {
    /// Route with stops `i` and `i + 1` exchanged, windows re-tightened.
    fn swap(problem: &Problem, route: &[Stop], i: usize) -> Option<Route> {
        let mut r = route.to_vec();
        r.swap(i, i + 1);
        let (a, b) = (r[i].node, r[i + 1].node);
        let prev = r[i - 1].node;
        let next = r[i + 2].node;

        r[i].et = (r[i - 1].et + problem.service_time(prev) + problem.distance(prev, a)).max(problem.nodes[a].earliest);
        r[i + 1].lt = (r[i + 2].lt - problem.service_time(b) - problem.distance(b, next)).min(problem.nodes[b].latest);
        r[i].lt = (r[i + 1].lt - problem.service_time(a) - problem.distance(a, b)).min(problem.nodes[a].latest);
        r[i + 1].et = (r[i].et + problem.service_time(a) + problem.distance(a, b)).max(problem.nodes[b].earliest);
        if r[i].lt < r[i].et || r[i + 1].lt < r[i + 1].et {
            return None;
        }
        if !tighten_lt_backward(problem, &mut r, i, 1) || !tighten_et_forward(problem, &mut r, i + 2) {
            return None;
        }
        Some(r)
    }
}

impl LocalSearch for AdjacentSwap {
    fn improve(&self, problem: &Problem, solution: &mut Solution, _rng: &mut ChaCha8Rng) -> bool {
        let mut best: Option<Solution> = None;
        let mut best_objective = solution.objective;

        for v in 0..solution.routes.len() {
            let route = &solution.routes[v];
            for i in 1..route.len().saturating_sub(2) {
                if problem.is_pickup(route[i].node) && route[i + 1].node == route[i].node + problem.nb_users {
                    continue;
                }
                let swapped = match Self::swap(problem, route, i) {
                    Some(r) => r,
                    None => continue,
                };
                let mut candidate = solution.clone();
                candidate.routes[v] = swapped;
                if !recompute_capacity(problem, &mut candidate.routes[v], problem.vehicles[v].capacity) {
                    continue;
                }
                candidate.objective = skeleton_objective(problem, &candidate);
                if candidate.objective < best_objective {
                    best_objective = candidate.objective;
                    best = Some(candidate);
                }
            }
        }

        match best {
            Some(candidate) => {
                *solution = candidate;
                true
            }
            None => false,
        }
    }

    fn name(&self) -> &str {
        "AdjacentSwap"
    }
}

// ==================== Zero-Load Exchange ====================

/// Exchange the route tails of two random vehicles at zero-load points.
///
/// The vehicles also exchange their vehicle genes, since each now ends at
/// the other's final depot.
pub struct ZeroLoadExchange;

impl ZeroLoadExchange {
    fn zero_load_points(problem: &Problem, route: &[Stop], v: usize) -> Vec<usize> {
        (1..route.len().saturating_sub(1))
            .filter(|&i| route[i].capacity == problem.vehicles[v].capacity)
            .collect()
    }

    /// Earliest arrival at stop `i` seen from its predecessor
    fn reach(problem: &Problem, route: &[Stop], i: usize) -> f64 {
        let prev = route[i - 1].node;
        route[i].et + problem.service_time(prev) + problem.distance(prev, route[i].node)
    }

    fn splice(problem: &Problem, head: &[Stop], tail: &[Stop], cut: usize) -> Option<Route> {
        let mut route: Route = head.to_vec();
        route.extend_from_slice(tail);
        if update_et_forward(problem, &mut route, cut) && update_lt_backward(problem, &mut route, cut) {
            Some(route)
        } else {
            None
        }
    }
}

impl LocalSearch for ZeroLoadExchange {
    fn improve(&self, problem: &Problem, solution: &mut Solution, rng: &mut ChaCha8Rng) -> bool {
        let nb_routes = solution.routes.len();
        if nb_routes < 2 {
            return false;
        }
        let first = rng.gen_range(0..nb_routes);
        let mut second = rng.gen_range(0..nb_routes);
        while second == first {
            second = rng.gen_range(0..nb_routes);
        }

        let route1 = &solution.routes[first];
        let route2 = &solution.routes[second];
        let points1 = Self::zero_load_points(problem, route1, first);
        let points2 = Self::zero_load_points(problem, route2, second);

        let u = problem.nb_users;
        let mut best: Option<Solution> = None;
        let mut best_objective = solution.objective;

        for &i in &points1 {
            for &j in &points2 {
                if Self::reach(problem, route1, i) > route2[j + 1].lt || Self::reach(problem, route2, j) > route1[i + 1].lt {
                    continue;
                }
                let new1 = match Self::splice(problem, &route1[..=i], &route2[j + 1..], i) {
                    Some(r) => r,
                    None => continue,
                };
                let new2 = match Self::splice(problem, &route2[..=j], &route1[i + 1..], j) {
                    Some(r) => r,
                    None => continue,
                };

                let mut candidate = solution.clone();
                candidate.routes[first] = new1;
                candidate.routes[second] = new2;
                let genes = &mut candidate.chromosome.genes;
                let key = genes[2 * u + first].key;
                genes[2 * u + first].key = genes[2 * u + second].key;
                genes[2 * u + second].key = key;
                if !recompute_capacities(problem, &mut candidate) {
                    continue;
                }
                candidate.objective = skeleton_objective(problem, &candidate);
                if candidate.objective < best_objective {
                    best_objective = candidate.objective;
                    best = Some(candidate);
                }
            }
        }

        match best {
            Some(candidate) => {
                *solution = candidate;
                true
            }
            None => false,
        }
    }

    fn name(&self) -> &str {
        "ZeroLoadExchange"
    }
}

// ==================== Relocate ====================

/// Move every user of one random route to its best other route; keep the best move.
pub struct Relocate;

impl LocalSearch for Relocate {
    fn improve(&self, problem: &Problem, solution: &mut Solution, rng: &mut ChaCha8Rng) -> bool {
        let nb_routes = solution.routes.len();
        let from = rng.gen_range(0..nb_routes);
        let mut best: Option<Solution> = None;
        let mut best_objective = solution.objective;

        let positions: Vec<usize> = (1..solution.routes[from].len().saturating_sub(1))
            .filter(|&i| problem.is_pickup(solution.routes[from][i].node))
            .collect();

        for position in positions {
            let mut removed = solution.clone();
            let user = remove_request(problem, &mut removed.routes[from], position);

            for to in (0..nb_routes).filter(|&v| v != from) {
                let route = match insert_request(
                    problem,
                    &removed.routes[to],
                    user,
                    DecoderVariant::PickupFirst,
                    SlotFilter::RouteWindow,
                ) {
                    Some(r) => r,
                    None => continue,
                };
                let mut candidate = removed.clone();
                candidate.routes[to] = route;
                if !recompute_capacities(problem, &mut candidate) {
                    continue;
                }
                candidate.objective = skeleton_objective(problem, &candidate);
                if candidate.objective < best_objective {
                    best_objective = candidate.objective;
                    best = Some(candidate);
                }
            }
        }

        match best {
            Some(candidate) => {
                *solution = candidate;
                true
            }
            None => false,
        }
    }

    fn name(&self) -> &str {
        "Relocate"
    }
}

// ==================== Request Exchange ====================

/// Swap one random request between two random non-empty routes.
pub struct RequestExchange;

impl RequestExchange {
    /// Position of the pickup of the request visited at `position`
    fn pickup_position(problem: &Problem, route: &[Stop], position: usize) -> usize {
        let node = route[position].node;
        if problem.is_pickup(node) {
            return position;
        }
        let pickup = node - problem.nb_users;
        (1..position).rev().find(|&i| route[i].node == pickup).unwrap_or(position)
    }
}

impl LocalSearch for RequestExchange {
    fn improve(&self, problem: &Problem, solution: &mut Solution, rng: &mut ChaCha8Rng) -> bool {
        let non_empty: Vec<usize> = (0..solution.routes.len())
            .filter(|&v| solution.routes[v].len() > 3)
            .collect();
        if non_empty.len() < 2 {
            return false;
        }
        let first = non_empty[rng.gen_range(0..non_empty.len())];
        let others: Vec<usize> = non_empty.iter().copied().filter(|&v| v != first).collect();
        let second = others[rng.gen_range(0..others.len())];

        let pick = |rng: &mut ChaCha8Rng, v: usize| {
            let route = &solution.routes[v];
            let position = rng.gen_range(1..route.len() - 1);
            Self::pickup_position(problem, route, position)
        };
        let position1 = pick(rng, first);
        let position2 = pick(rng, second);

        let mut candidate = solution.clone();
        let user1 = remove_request(problem, &mut candidate.routes[first], position1);
        let user2 = remove_request(problem, &mut candidate.routes[second], position2);

        let order = DecoderVariant::PickupFirst;
        let filter = SlotFilter::RouteWindow;
        match insert_request(problem, &candidate.routes[second], user1, order, filter) {
            Some(route) => candidate.routes[second] = route,
            None => return false,
        }
        match insert_request(problem, &candidate.routes[first], user2, order, filter) {
            Some(route) => candidate.routes[first] = route,
            None => return false,
        }
        if !recompute_capacities(problem, &mut candidate) {
            return false;
        }

        candidate.objective = skeleton_objective(problem, &candidate);
        if candidate.objective < solution.objective {
            *solution = candidate;
            true
        } else {
            false
        }
    }

    fn name(&self) -> &str {
        "RequestExchange"
    }
}

// ==================== RVND ====================

/// Random Variable Neighborhood Descent
///
/// Picks a random operator from the remaining list; an improvement restores
/// the full list, a failure removes that operator. The returned solution is
/// re-scheduled and never worse than the input.
pub struct Rvnd {
    /// List of local search operators
    operators: Vec<Box<dyn LocalSearch + Send + Sync>>,
}

impl Rvnd {
    pub fn new() -> Self {
        Rvnd { operators: Vec::new() }
    }

    pub fn with_standard_operators() -> Self {
        let operators: Vec<Box<dyn LocalSearch + Send + Sync>> = vec![
            Box::new(AdjacentSwap),
            Box::new(ZeroLoadExchange),
            Box::new(Relocate),
            Box::new(RequestExchange),
        ];
        Rvnd { operators }
    }

    pub fn add_operator<L: LocalSearch + Send + Sync + 'static>(&mut self, op: L) {
        self.operators.push(Box::new(op));
    }
}

impl Default for Rvnd {
    fn default() -> Self {
        Self::with_standard_operators()
    }
}

impl LocalSearch for Rvnd {
    fn improve(&self, problem: &Problem, solution: &mut Solution, rng: &mut ChaCha8Rng) -> bool {
        let initial = solution.objective;
        let mut current = solution.clone();
        if current.unassigned_users() > 0 && !repair(problem, &mut current) {
            return false;
        }
        strip_charging(problem, &mut current);

        let mut remaining: Vec<usize> = (0..self.operators.len()).collect();
        while !remaining.is_empty() {
            let pos = rng.gen_range(0..remaining.len());
            let operator = &self.operators[remaining[pos]];
            if operator.improve(problem, &mut current, rng) {
                log::trace!("{} improved to {:.3}", operator.name(), current.objective);
                remaining = (0..self.operators.len()).collect();
            } else {
                remaining.remove(pos);
            }
        }

        sync_chromosome(problem, &mut current);
        recompute_capacities(problem, &mut current);
        evaluate(problem, &mut current);
        current.local_searched = true;

        if current.objective <= initial {
            *solution = current;
        } else {
            solution.local_searched = true;
        }
        solution.objective < initial
    }

    fn name(&self) -> &str {
        "RVND"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::decode;
    use crate::fixtures;

    #[test]
    fn test_strip_charging_restores_skeleton() {
        let problem = fixtures::charging_detour();
        let mut solution = decode(&problem, Chromosome::from_keys(&problem, &[0.5, 0.5, 0.5, 0.1, 0.1, 0.1]));
        assert!(solution.routes[0].iter().any(|s| s.is_charging));

        let objective = solution.objective;
        strip_charging(&problem, &mut solution);
        let nodes: Vec<usize> = solution.routes[0].iter().map(|s| s.node).collect();
        assert_eq!(nodes, vec![2, 0, 1, 3]);
        assert!(solution.routes[0].iter().all(|s| s.w == 0.0 && s.t == 0.0));
        assert!(!solution.scheduled);
        assert!((skeleton_objective(&problem, &solution) - objective).abs() < 1e-9);
    }

    #[test]
    fn test_repair_uses_another_vehicle() {
        let problem = fixtures::far_depot();
        let keys = [0.2, 0.5, 0.5, 0.5, 0.1, 0.1, 0.1];
        let mut solution = decode(&problem, Chromosome::from_keys(&problem, &keys));
        assert_eq!(solution.unassigned_users(), 1);

        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert!(Rvnd::default().improve(&problem, &mut solution, &mut rng));

        assert_eq!(solution.unassigned_users(), 0);
        assert!(solution.scheduled);
        assert!(solution.local_searched);
        assert!((solution.objective - 500.0).abs() < 1e-9);
        assert_eq!(solution.locate(0).map(|(v, _)| v), Some(1));
        // the pickup key now selects vehicle 1 with the same position in its slot
        assert_eq!(Chromosome::vehicle_slot(solution.chromosome.genes[0].key, 2), 1);
        assert!((solution.chromosome.genes[0].key - 0.7).abs() < 1e-9);
        assert!(solution.chromosome.is_consistent(&problem));
    }

    #[test]
    fn test_failed_repair_returns_input() {
        let problem = fixtures::unreachable_pickup();
        let mut solution = decode(&problem, Chromosome::from_keys(&problem, &[0.5; 6]));
        let before = solution.clone();

        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert!(!Rvnd::default().improve(&problem, &mut solution, &mut rng));
        assert_eq!(solution.objective, before.objective);
        assert_eq!(solution.routes, before.routes);
    }

    #[test]
    fn test_operators_report_real_improvements() {
        let problem = fixtures::small_fleet();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let operators: Vec<Box<dyn LocalSearch>> = vec![
            Box::new(AdjacentSwap),
            Box::new(ZeroLoadExchange),
            Box::new(Relocate),
            Box::new(RequestExchange),
        ];

        for _ in 0..40 {
            let mut solution = decode(&problem, Chromosome::random(&problem, &mut rng));
            if solution.unassigned_users() > 0 {
                continue;
            }
            strip_charging(&problem, &mut solution);
            solution.objective = skeleton_objective(&problem, &solution);
            for operator in &operators {
                let before = solution.objective;
                let improved = operator.improve(&problem, &mut solution, &mut rng);
                assert_eq!(improved, solution.objective < before, "{}", operator.name());
                assert!(solution.objective <= before);
                assert!((skeleton_objective(&problem, &solution) - solution.objective).abs() < 1e-9);
                assert!(solution.routes.iter().all(|r| r.iter().all(|s| !s.is_charging)));
            }
        }
    }

    #[test]
    fn test_rvnd_never_worsens() {
        let problem = fixtures::small_fleet();
        let rvnd = Rvnd::with_standard_operators();
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        for _ in 0..30 {
            let mut solution = decode(&problem, Chromosome::random(&problem, &mut rng));
            let before = solution.objective;
            rvnd.improve(&problem, &mut solution, &mut rng);

            assert!(solution.objective <= before);
            assert!(solution.chromosome.is_consistent(&problem));
            if solution.local_searched && solution.objective < crate::solution::BATTERY_PENALTY {
                assert!(solution.scheduled);
            }
        }
    }

    #[test]
    fn test_sync_chromosome_keeps_fraction() {
        let problem = fixtures::small_fleet();
        let keys = [0.1, 0.6, 0.2, 0.5, 0.5, 0.5, 0.1, 0.9, 0.1, 0.1, 0.1];
        let mut solution = Solution::new(Chromosome::from_keys(&problem, &keys));
        // user 0 is served by vehicle 1 although its key selects vehicle 0
        let stops = |nodes: &[usize]| nodes.iter().map(|&n| Stop::new(n)).collect::<Route>();
        solution.routes = vec![stops(&[6, 2, 5, 8]), stops(&[7, 0, 1, 3, 4, 9])];

        sync_chromosome(&problem, &mut solution);
        assert!((solution.chromosome.genes[0].key - 0.6).abs() < 1e-9);
        assert!((solution.chromosome.genes[1].key - 0.6).abs() < 1e-12);
        assert!((solution.chromosome.genes[2].key - 0.2).abs() < 1e-12);
        assert!(solution.chromosome.is_consistent(&problem));
    }
}

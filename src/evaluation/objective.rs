//! Objective evaluation of scheduled solutions.

use crate::problem::Problem;
use crate::solution::{ObjectiveTerms, Solution, Stop, BATTERY_PENALTY, RIDE_TIME_PENALTY};

/// Cost of a charging session starting at `start` for `duration` minutes.
///
/// The session is split at period boundaries and every part is priced with
/// its own period.
pub fn charging_cost(problem: &Problem, start: f64, duration: f64) -> f64 {
    let first = problem.period_index(start);
    let last = problem.period_index(start + duration);
    if first == last {
        return duration * problem.prices[first];
    }

    let pl = problem.period_length;
    let mut cost = ((first + 1) as f64 * pl - start) * problem.prices[first];
    cost += (start + duration - last as f64 * pl) * problem.prices[last];
    cost += problem.prices[first + 1..last].iter().map(|price| pl * price).sum::<f64>();
    cost
}

/// Travel time, ride times and charging cost of a set of timed routes.
pub fn objective_terms(problem: &Problem, routes: &[Vec<Stop>]) -> ObjectiveTerms {
    let u = problem.nb_users;
    let mut ride_times: Vec<f64> = (0..u).map(|i| -problem.service_time(i)).collect();
    let mut terms = ObjectiveTerms::default();

    for route in routes {
        terms.trt += route
            .windows(2)
            .map(|leg| problem.distance(leg[0].node, leg[1].node))
            .sum::<f64>();

        let inner = route.len().saturating_sub(1);
        for stop in route.iter().take(inner).skip(1) {
            if problem.is_pickup(stop.node) {
                ride_times[stop.node] -= stop.t;
            } else if problem.is_dropoff(stop.node) {
                ride_times[stop.node - u] += stop.t;
            } else if stop.is_charging {
                terms.cc += charging_cost(problem, stop.t, stop.w);
            }
        }
    }

    for (i, ride_time) in ride_times.iter().enumerate() {
        if *ride_time > problem.max_ride_times[i] {
            terms.violations += 1;
        }
        terms.ert += ride_time - problem.distance(i, i + u);
    }
    terms
}

/// Objective value of a scheduled solution.
///
/// Battery infeasibility dominates: `battery_infeasibles * 100_000` is
/// returned without looking at the routes.
pub fn objective(problem: &Problem, solution: &Solution) -> f64 {
    if solution.battery_infeasibles > 0 {
        return solution.battery_infeasibles as f64 * BATTERY_PENALTY;
    }
    weighted(problem, &objective_terms(problem, &solution.routes))
}

pub fn weighted(problem: &Problem, terms: &ObjectiveTerms) -> f64 {
    let [w0, w1, w2] = problem.weights;
    w0 * terms.trt + w1 * terms.ert + w2 * terms.cc + RIDE_TIME_PENALTY * terms.violations as f64
}

/// Store the decomposed objective terms on the solution.
pub fn split_objective(problem: &Problem, solution: &mut Solution) {
    solution.terms = objective_terms(problem, &solution.routes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::decoder::decode;
    use crate::fixtures;
    use crate::solution::Chromosome;

    #[test]
    fn test_single_request_objective() {
        let problem = fixtures::single_request();
        let chromosome = Chromosome::from_keys(&problem, &[0.5, 0.5, 0.5, 0.1, 0.1, 0.1]);
        let mut solution = decode(&problem, chromosome);
        split_objective(&problem, &mut solution);

        assert!(solution.scheduled);
        assert_eq!(solution.terms.trt, 4.0);
        assert_eq!(solution.terms.ert, 0.0);
        assert_eq!(solution.terms.cc, 0.0);
        assert_eq!(solution.terms.violations, 0);
        assert_eq!(solution.objective, 4.0);
    }

    #[test]
    fn test_two_requests_travel_time_is_sum_of_legs() {
        let problem = fixtures::two_requests();
        for decoder_key in [0.1, 0.9] {
            let keys = [0.2, 0.6, 0.5, 0.5, 0.5, 0.1, 0.1, decoder_key];
            let mut solution = decode(&problem, Chromosome::from_keys(&problem, &keys));
            split_objective(&problem, &mut solution);

            let nodes: Vec<usize> = solution.routes[0].iter().map(|s| s.node).collect();
            assert_eq!(nodes, vec![4, 0, 1, 2, 3, 5]);
            assert!(solution.scheduled);

            let legs: f64 = nodes.windows(2).map(|leg| problem.distance(leg[0], leg[1])).sum();
            assert_eq!(legs, 5.0);
            assert_eq!(solution.terms.trt, legs);
            assert_eq!(solution.terms.violations, 0);
            assert_eq!(solution.terms.cc, 0.0);
            let expected = solution.terms.trt + solution.terms.ert + solution.terms.cc;
            assert!((solution.objective - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_ride_time_violation_penalty() {
        let mut data = fixtures::single_request_data();
        data.max_ride_times = vec![1.5];
        let problem = Problem::new(data).unwrap();

        // pickup late at 995, dropoff early at 998: ride time 2 > 1.5
        let mut solution = decode(&problem, Chromosome::from_keys(&problem, &[0.5, 0.5, 0.5, 0.1, 0.1, 0.1]));
        split_objective(&problem, &mut solution);
        assert_eq!(solution.terms.violations, 1);
        assert_eq!(solution.objective, 4.0 + RIDE_TIME_PENALTY);
    }

    #[test]
    fn test_charging_cost_split_across_periods() {
        let mut data = fixtures::single_request_data();
        data.electricity_prices = (0..17).map(|p| p as f64 * 0.1).collect();
        let problem = Problem::new(data).unwrap();

        assert!((charging_cost(&problem, 10.0, 20.0) - 20.0 * 0.0).abs() < 1e-9);
        // 50 -> 130: 10 min at 0.0, 60 min at 0.1, 10 min at 0.2
        assert!((charging_cost(&problem, 50.0, 80.0) - (6.0 + 2.0)).abs() < 1e-9);
        // sessions past the horizon are priced with the last period
        assert!((charging_cost(&problem, 1000.0, 30.0) - 30.0 * 1.6).abs() < 1e-9);
    }

    #[test]
    fn test_battery_penalty_dominates() {
        let problem = fixtures::stranded_vehicle();
        let solution = decode(&problem, Chromosome::from_keys(&problem, &[0.5; 6]));

        assert_eq!(solution.battery_infeasibles, 1);
        assert_eq!(objective(&problem, &solution), BATTERY_PENALTY);
        assert_eq!(solution.objective, BATTERY_PENALTY);
    }

    #[test]
    fn test_charging_detour_objective() {
        let problem = fixtures::charging_detour();
        let mut solution = decode(&problem, Chromosome::from_keys(&problem, &[0.5, 0.5, 0.5, 0.1, 0.1, 0.1]));
        split_objective(&problem, &mut solution);

        let detour = 5f64.sqrt() + 2f64.sqrt() - 1.0;
        let charge = 4.0 + detour;
        assert!((solution.terms.trt - (4.0 + detour)).abs() < 1e-9);
        assert!((solution.terms.cc - charge * 0.1).abs() < 1e-9);
        let expected = solution.terms.trt + solution.terms.ert + solution.terms.cc;
        assert!((solution.objective - expected).abs() < 1e-9);
    }
}

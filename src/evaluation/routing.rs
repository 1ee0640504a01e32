//! Route-level feasibility primitives shared by the decoder and local search.
//!
//! Every insertion works on a copy: a candidate route is returned only when
//! capacity and time windows stay feasible, so callers commit by assignment.

use crate::problem::Problem;
use crate::solution::{DecoderVariant, Route, Stop};
use std::ops::Range;

/// Upper bound used to pre-filter insertion slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotFilter {
    /// Static latest time of the node that would follow
    NodeWindow,
    /// Propagated LT of the stop that would follow
    RouteWindow,
}

/// Insert `node` before position `pos` and tighten the windows around it.
///
/// Remaining capacity must not become negative from `pos` to the end of the
/// route. LT is propagated backward and ET forward only while values change.
pub fn insert_stop(problem: &Problem, route: &[Stop], pos: usize, node: usize) -> Option<Route> {
    if pos == 0 || pos >= route.len() {
        return None;
    }
    let mut candidate = route.to_vec();
    candidate.insert(pos, Stop::new(node));

    for k in pos..candidate.len() {
        candidate[k].capacity = candidate[k - 1].capacity - problem.nodes[candidate[k].node].load_change;
        if candidate[k].capacity < 0 {
            return None;
        }
    }

    let prev = &candidate[pos - 1];
    let next = &candidate[pos + 1];
    let info = &problem.nodes[node];
    let et = (prev.et + problem.service_time(prev.node) + problem.distance(prev.node, node)).max(info.earliest);
    let lt = (next.lt - info.service_time - problem.distance(node, next.node)).min(info.latest);
    if lt < et {
        return None;
    }
    candidate[pos].et = et;
    candidate[pos].lt = lt;

    if !tighten_lt_backward(problem, &mut candidate, pos, 0) || !tighten_et_forward(problem, &mut candidate, pos + 1) {
        return None;
    }
    Some(candidate)
}

/// Tighten LT from `start - 1` down to `lowest`, stopping at the first unchanged stop.
///
/// Returns false if a tightened window closes.
pub fn tighten_lt_backward(problem: &Problem, route: &mut [Stop], start: usize, lowest: usize) -> bool {
    for k in (lowest..start).rev() {
        let bound = route[k + 1].lt
            - problem.distance(route[k].node, route[k + 1].node)
            - problem.service_time(route[k].node);
        if bound >= route[k].lt {
            break;
        }
        route[k].lt = bound;
        if route[k].lt < route[k].et {
            return false;
        }
    }
    true
}

/// Tighten ET from `start` to the end of the route, stopping at the first unchanged stop.
pub fn tighten_et_forward(problem: &Problem, route: &mut [Stop], start: usize) -> bool {
    for k in start.max(1)..route.len() {
        let bound = route[k - 1].et
            + problem.distance(route[k - 1].node, route[k].node)
            + problem.service_time(route[k - 1].node);
        if bound <= route[k].et {
            break;
        }
        route[k].et = bound;
        if route[k].lt < route[k].et {
            return false;
        }
    }
    true
}

/// Cheapest feasible insertion of `node` over the given slots.
///
/// Slots are checked only when strictly cheaper than the best feasible one so
/// far. Returns the chosen slot and the candidate route.
pub fn cheapest_insertion(
    problem: &Problem,
    route: &[Stop],
    node: usize,
    slots: Range<usize>,
    filter: SlotFilter,
) -> Option<(usize, Route)> {
    let info = &problem.nodes[node];
    let mut best: Option<(usize, Route)> = None;
    let mut best_cost = f64::INFINITY;

    for j in slots.start.max(1)..slots.end.min(route.len()) {
        let next = route[j].node;
        let limit = match filter {
            SlotFilter::NodeWindow => problem.nodes[next].latest,
            SlotFilter::RouteWindow => route[j].lt,
        };
        if info.earliest >= limit - problem.distance(node, next) - info.service_time {
            continue;
        }

        let prev = route[j - 1].node;
        let cost = problem.distance(prev, node) + problem.distance(node, next) - problem.distance(prev, next);
        if cost < best_cost {
            if let Some(candidate) = insert_stop(problem, route, j, node) {
                best_cost = cost;
                best = Some((j, candidate));
            }
        }
    }

    best
}

/// Insert both halves of `user`'s request in the given order.
pub fn insert_request(
    problem: &Problem,
    route: &[Stop],
    user: usize,
    order: DecoderVariant,
    filter: SlotFilter,
) -> Option<Route> {
    let pickup = user;
    let dropoff = user + problem.nb_users;
    match order {
        DecoderVariant::PickupFirst => {
            let (slot, partial) = cheapest_insertion(problem, route, pickup, 1..route.len(), filter)?;
            let end = partial.len();
            cheapest_insertion(problem, &partial, dropoff, slot + 1..end, filter).map(|(_, r)| r)
        }
        DecoderVariant::DropoffFirst => {
            let (slot, partial) = cheapest_insertion(problem, route, dropoff, 1..route.len(), filter)?;
            cheapest_insertion(problem, &partial, pickup, 1..slot + 1, filter).map(|(_, r)| r)
        }
    }
}

/// Recompute LT from `start` down to position 1 against the static windows.
///
/// Returns false as soon as a stop's ET exceeds its LT.
pub fn update_lt_backward(problem: &Problem, route: &mut [Stop], start: usize) -> bool {
    if route.len() < 2 {
        return true;
    }
    let start = start.min(route.len() - 2);
    for i in (1..=start).rev() {
        let node = route[i].node;
        route[i].lt = problem.nodes[node]
            .latest
            .min(route[i + 1].lt - problem.service_time(node) - problem.distance(node, route[i + 1].node));
        if route[i].et > route[i].lt {
            return false;
        }
    }
    true
}

/// Recompute ET from `start` to the end of the route against the static windows.
pub fn update_et_forward(problem: &Problem, route: &mut [Stop], start: usize) -> bool {
    for i in start.max(1)..route.len() {
        let prev = route[i - 1].node;
        let node = route[i].node;
        route[i].et = problem.nodes[node]
            .earliest
            .max(route[i - 1].et + problem.service_time(prev) + problem.distance(prev, node));
        if route[i].et > route[i].lt {
            return false;
        }
    }
    true
}

/// Remove the request whose pickup sits at `position`; returns its user.
pub fn remove_request(problem: &Problem, route: &mut Route, position: usize) -> usize {
    let user = route[position].node;
    let dropoff = user + problem.nb_users;

    // Removing stops only loosens windows, so propagation cannot fail here.
    route.remove(position);
    update_lt_backward(problem, route, position - 1);
    update_et_forward(problem, route, position);

    if let Some(j) = (position..route.len() - 1).find(|&j| route[j].node == dropoff) {
        route.remove(j);
        update_lt_backward(problem, route, j - 1);
        update_et_forward(problem, route, j);
    }
    user
}

/// Recompute remaining capacities from the vehicle capacity.
///
/// Returns false if the capacity goes negative anywhere.
pub fn recompute_capacity(problem: &Problem, route: &mut [Stop], capacity: i32) -> bool {
    let mut feasible = true;
    if let Some(first) = route.first_mut() {
        first.capacity = capacity;
    }
    for k in 1..route.len() {
        route[k].capacity = route[k - 1].capacity - problem.nodes[route[k].node].load_change;
        feasible &= route[k].capacity >= 0;
    }
    feasible
}

/// Reset times and windows to the static node windows and propagate them.
pub fn reset_windows(problem: &Problem, route: &mut [Stop]) -> bool {
    for stop in route.iter_mut() {
        let node = &problem.nodes[stop.node];
        stop.et = node.earliest;
        stop.lt = node.latest;
        stop.t = 0.0;
        stop.w = 0.0;
    }
    let last = route.len().saturating_sub(2);
    update_et_forward(problem, route, 1) && update_lt_backward(problem, route, last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn empty_route(problem: &Problem) -> Route {
        let vehicle = &problem.vehicles[0];
        let origin = problem.origin_depots[0];
        let destination = problem.final_depots[0];
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
    }

    #[test]
    fn test_insert_request_tightens_windows() {
        let problem = fixtures::single_request();
        let route = empty_route(&problem);

        let full = insert_request(&problem, &route, 0, DecoderVariant::PickupFirst, SlotFilter::NodeWindow).unwrap();
        let nodes: Vec<usize> = full.iter().map(|s| s.node).collect();
        assert_eq!(nodes, vec![2, 0, 1, 3]);

        let et: Vec<f64> = full.iter().map(|s| s.et).collect();
        let lt: Vec<f64> = full.iter().map(|s| s.lt).collect();
        assert_eq!(et, vec![0.0, 1.0, 4.0, 6.0]);
        assert_eq!(lt, vec![994.0, 995.0, 998.0, 1000.0]);
        assert_eq!(full[1].capacity, 2);
        assert_eq!(full[2].capacity, 3);
    }

    #[test]
    fn test_both_orders_build_the_same_route() {
        let problem = fixtures::single_request();
        let route = empty_route(&problem);

        let a = insert_request(&problem, &route, 0, DecoderVariant::PickupFirst, SlotFilter::NodeWindow).unwrap();
        let b = insert_request(&problem, &route, 0, DecoderVariant::DropoffFirst, SlotFilter::NodeWindow).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_insert_rejects_missed_window() {
        let problem = fixtures::unreachable_pickup();
        let route = empty_route(&problem);

        assert!(insert_stop(&problem, &route, 1, 0).is_none());
        assert!(insert_request(&problem, &route, 0, DecoderVariant::DropoffFirst, SlotFilter::NodeWindow).is_none());
    }

    #[test]
    fn test_insert_rejects_negative_capacity() {
        let problem = fixtures::single_request();
        let mut route = empty_route(&problem);
        route[0].capacity = 0;
        route[1].capacity = 0;

        assert!(insert_stop(&problem, &route, 1, 0).is_none());
    }

    #[test]
    fn test_remove_request_restores_windows() {
        let problem = fixtures::single_request();
        let route = empty_route(&problem);
        let mut full = insert_request(&problem, &route, 0, DecoderVariant::PickupFirst, SlotFilter::RouteWindow).unwrap();

        let user = remove_request(&problem, &mut full, 1);
        assert_eq!(user, 0);
        assert_eq!(full.len(), 2);
        // depot (0,0) straight to the final depot (4,0)
        assert_eq!(full[1].et, 4.0);
        assert!(recompute_capacity(&problem, &mut full, 3));
    }

    #[test]
    fn test_reset_windows_matches_incremental_propagation() {
        let problem = fixtures::single_request();
        let route = empty_route(&problem);
        let full = insert_request(&problem, &route, 0, DecoderVariant::PickupFirst, SlotFilter::NodeWindow).unwrap();

        let mut reset = full.clone();
        reset[1].et = 500.0;
        reset[2].lt = 10.0;
        assert!(reset_windows(&problem, &mut reset));
        for (a, b) in full.iter().zip(reset.iter()).skip(1) {
            assert_eq!(a.et, b.et);
            assert_eq!(a.lt, b.lt);
        }
    }
}

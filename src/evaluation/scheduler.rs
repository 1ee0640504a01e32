//! Charging insertion and start-time assignment.
//!
//! For every vehicle whose battery would end below `r * Q`, the scheduler
//! tries zero-load points in the order given by the charging-priority gene,
//! inserts detours to the closest charging station with a free charger and
//! sizes each charge. It then fixes the start time of every stop with the
//! policy selected by the scheduler gene.

use crate::evaluation::charging::ChargingCalendar;
use crate::problem::{Problem, Vehicle};
use crate::solution::{ChargingPriority, Chromosome, Route, SchedulerVariant, Solution, Stop};
use ordered_float::OrderedFloat;
use std::cmp::Reverse;

/// Charge shortfall below which a vehicle counts as fully charged
const CHARGE_TOLERANCE: f64 = 1e-9;

const KEY_PRECISION: i64 = 1_000_000;

/// A position after which the vehicle is empty and may detour to charge
#[derive(Debug, Clone, PartialEq)]
struct ZeroLoadPoint {
    /// Route position of the stop the detour leaves from
    position: usize,
    /// Electricity price when the vehicle leaves that stop
    price: f64,
    /// Slack until the next stop must start
    window: f64,
    /// Random key used by [`ChargingPriority::RandomKey`]
    key: f64,
}

/// Insert charging detours and assign start times to every route.
///
/// On success `scheduled` is set. Vehicles that cannot reach their minimum
/// end battery are counted in `battery_infeasibles` and the solution is left
/// unscheduled.
pub fn schedule(problem: &Problem, solution: &mut Solution) {
    let mut calendar = ChargingCalendar::new(problem);
    let priority = solution.chromosome.charging_priority();
    solution.battery_infeasibles = 0;
    solution.scheduled = false;

    for v in 0..solution.routes.len() {
        let vehicle = &problem.vehicles[v];
        let route = &mut solution.routes[v];
        initialize_battery(problem, route, vehicle);

        let needed = vehicle.min_end_battery() - route.last().map_or(0.0, |s| s.battery);
        if needed <= 0.0 {
            continue;
        }

        let mut points = zero_load_points(problem, &solution.chromosome, route, v);
        order_points(&mut points, priority);
        if !charge_route(problem, &mut calendar, route, vehicle, points, needed) {
            solution.battery_infeasibles += 1;
        }
    }

    if solution.battery_infeasibles > 0 {
        return;
    }
    assign_times(problem, solution);
    solution.scheduled = true;
}

fn initialize_battery(problem: &Problem, route: &mut [Stop], vehicle: &Vehicle) {
    if let Some(first) = route.first_mut() {
        first.battery = vehicle.initial_battery;
    }
    for j in 1..route.len() {
        route[j].battery = route[j - 1].battery - problem.consumption(route[j - 1].node, route[j].node);
    }
}

fn zero_load_points(problem: &Problem, chromosome: &Chromosome, route: &[Stop], v: usize) -> Vec<ZeroLoadPoint> {
    let capacity = problem.vehicles[v].capacity;
    let requests = 2 * problem.nb_users;
    route[..route.len() - 1]
        .iter()
        .enumerate()
        .filter(|(_, stop)| stop.capacity == capacity)
        .map(|(j, stop)| {
            let service = problem.service_time(stop.node);
            // Depots and stations carry no gene of their own: use the vehicle gene.
            let key = if stop.node >= requests {
                chromosome.genes[requests + v].key
            } else {
                chromosome.genes[stop.node].key
            };
            ZeroLoadPoint {
                position: j,
                price: problem.price_at(stop.et + service),
                window: route[j + 1].lt - service - stop.et,
                key,
            }
        })
        .collect()
}

fn order_points(points: &mut Vec<ZeroLoadPoint>, priority: ChargingPriority) {
    match priority {
        ChargingPriority::CheapestPrice => points.sort_by_key(|p| OrderedFloat(p.price)),
        ChargingPriority::EarliestFirst => {}
        ChargingPriority::LatestFirst => points.reverse(),
        ChargingPriority::RandomKey => points.sort_by_key(|p| Reverse(OrderedFloat(p.key))),
        ChargingPriority::WidestWindow => points.sort_by_key(|p| Reverse(OrderedFloat(p.window))),
    }
}

/// Closest station (by detour travel time) with a free charger between the two stops.
fn closest_station(problem: &Problem, calendar: &ChargingCalendar, from: &Stop, to: &Stop) -> Option<usize> {
    let mut best = None;
    let mut best_detour = f64::INFINITY;
    for (index, station) in problem.stations.iter().enumerate() {
        let to_station = problem.distance(from.node, station.node);
        let from_station = problem.distance(station.node, to.node);
        if to_station + from_station < best_detour {
            let start = from.et + problem.service_time(from.node) + to_station;
            let end = to.lt - from_station;
            if calendar.is_available(index, start, end) {
                best_detour = to_station + from_station;
                best = Some(index);
            }
        }
    }
    best
}

/// Charging window left once the detour to `station` is inserted after `inspect`.
///
/// The window loses the detour travel, is clamped so the next stop keeps its
/// LT, and shrinks again wherever an upstream stop could no longer start in time.
fn usable_window(problem: &Problem, route: &[Stop], inspect: usize, station: usize, window: f64) -> f64 {
    let from = route[inspect].node;
    let to = route[inspect + 1].node;
    let to_station = problem.distance(from, station);
    let from_station = problem.distance(station, to);

    let mut window = window - to_station - from_station;
    let station_et = route[inspect].et + problem.service_time(from) + to_station;
    let next_lt = route[inspect + 1].lt;
    if station_et + window + from_station > next_lt {
        window = next_lt - from_station - station_et;
    }

    let station_lt = next_lt - from_station - window;
    let mut preceding_lt = station_lt - to_station - problem.service_time(from);
    for j in (1..=inspect).rev() {
        if route[j].et > preceding_lt {
            window -= route[inspect].et - preceding_lt;
        }
        let prev = &route[j - 1];
        preceding_lt -= problem.distance(prev.node, route[j].node) + problem.service_time(prev.node) + prev.w;
    }
    window
}

/// Insert charging detours until `needed` battery has been assigned.
///
/// Returns false when the zero-load points run out first.
fn charge_route(
    problem: &Problem,
    calendar: &mut ChargingCalendar,
    route: &mut Route,
    vehicle: &Vehicle,
    mut points: Vec<ZeroLoadPoint>,
    mut needed: f64,
) -> bool {
    let full = vehicle.battery_capacity;
    let mut assigned = 0.0;

    while needed - assigned > CHARGE_TOLERANCE {
        if points.is_empty() {
            return false;
        }
        let inspect = points[0].position;
        let station_index = match closest_station(problem, calendar, &route[inspect], &route[inspect + 1]) {
            Some(index) => index,
            None => {
                points.remove(0);
                continue;
            }
        };
        let station = &problem.stations[station_index];
        let alpha = station.recharge_rate;
        let s = station.node;
        let a = route[inspect].node;
        let b = route[inspect + 1].node;

        let window = usable_window(problem, route, inspect, s, points[0].window);
        if window <= 0.0 {
            points.remove(0);
            continue;
        }
        let detour = problem.consumption(a, s) + problem.consumption(s, b) - problem.consumption(a, b);
        if window * alpha - detour <= 0.0 {
            points.remove(0);
            continue;
        }

        route.insert(
            inspect + 1,
            Stop {
                capacity: route[inspect].capacity,
                is_charging: true,
                ..Stop::new(s)
            },
        );
        needed += detour;

        let remaining: f64 = route[inspect + 1..]
            .windows(2)
            .map(|leg| problem.consumption(leg[0].node, leg[1].node))
            .sum();
        let arrival_battery = (route[inspect].battery - problem.consumption(a, s)).max(0.0);
        let mut charge = ((vehicle.min_end_battery() + remaining - arrival_battery) / alpha)
            .min((full - arrival_battery) / alpha)
            .min(window)
            .min((needed - assigned) / alpha);

        // Downstream battery levels may not exceed the capacity.
        for l in inspect + 2..route.len() {
            let level = route[l].battery + route[l].w * alpha - detour;
            if level + charge * alpha > full {
                charge = (full - level) / alpha;
            }
        }

        if charge * alpha <= detour {
            needed -= detour;
            route.remove(inspect + 1);
            points.remove(0);
            continue;
        }

        let station_et = route[inspect].et + problem.service_time(a) + problem.distance(a, s);
        let station_lt = route[inspect + 2].lt - problem.distance(s, b) - charge;
        route[inspect + 1].et = station_et;
        route[inspect + 1].lt = station_lt;
        route[inspect].lt = route[inspect]
            .lt
            .min(station_lt - problem.service_time(a) - problem.distance(a, s));
        route[inspect + 2].et = route[inspect + 2]
            .et
            .max(station_et + charge + problem.distance(s, b));
        calendar.reserve(station_index, station_et, station_lt + charge);

        for j in (0..inspect).rev() {
            let bound = route[j + 1].lt
                - problem.distance(route[j].node, route[j + 1].node)
                - problem.service_time(route[j].node)
                - route[j].w;
            if bound >= route[j].lt {
                break;
            }
            route[j].lt = bound;
        }
        for j in inspect + 3..route.len() {
            let bound = route[j - 1].et
                + problem.distance(route[j - 1].node, route[j].node)
                + problem.service_time(route[j - 1].node)
                + route[j - 1].w;
            if bound <= route[j].et {
                break;
            }
            route[j].et = bound;
        }

        route[inspect + 1].w = charge;
        route[inspect + 1].battery = route[inspect].battery - problem.consumption(a, s);
        route[inspect + 2].battery = route[inspect + 1].battery + charge * alpha - problem.consumption(s, b);
        for stop in route[inspect + 3..].iter_mut() {
            stop.battery += charge * alpha - detour;
        }

        assigned += charge * alpha;
        points.remove(0);
        for point in points.iter_mut().filter(|p| p.position > inspect) {
            point.position += 1;
        }
    }
    true
}

/// Pickup key with the vehicle-selection part removed, rescaled to `[0, 1)`.
pub fn filtered_key(key: f64, nb_vehicles: usize) -> f64 {
    let slot = KEY_PRECISION / nb_vehicles as i64;
    let scaled = (key * KEY_PRECISION as f64) as i64;
    (scaled % slot) as f64 / KEY_PRECISION as f64 * nb_vehicles as f64
}

fn assign_times(problem: &Problem, solution: &mut Solution) {
    let variant = solution.chromosome.scheduler_variant();
    let nb_vehicles = problem.nb_vehicles();
    let chromosome = &solution.chromosome;

    for route in solution.routes.iter_mut() {
        if let Some(first) = route.first_mut() {
            first.t = 0.0;
        }
        for j in 1..route.len() {
            let prev = &route[j - 1];
            let stop = &route[j];
            let arrival = prev.t + problem.service_time(prev.node) + problem.distance(prev.node, stop.node) + prev.w;

            let t = if problem.is_pickup(stop.node) {
                match variant {
                    SchedulerVariant::LatePickup => stop.lt,
                    // Directly after a charge the pickup must stay at LT to keep the station's LT valid.
                    SchedulerVariant::RandomKeyPickup if prev.is_charging => stop.lt,
                    SchedulerVariant::RandomKeyPickup => {
                        let k = filtered_key(chromosome.genes[stop.node].key, nb_vehicles);
                        (stop.et + k * (stop.lt - stop.et)).max(arrival)
                    }
                }
            } else if stop.is_charging {
                let early = problem.price_at(stop.et);
                let late = problem.price_at(stop.lt + stop.w);
                if late <= early {
                    stop.lt
                } else {
                    stop.et.max(arrival)
                }
            } else {
                stop.et.max(arrival)
            };
            route[j].t = t;
        }
    }
}

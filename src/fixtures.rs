//! Small hand-checkable problems shared by the unit tests.

use crate::problem::{ChargingStation, Node, Problem, ProblemData, Vehicle};

fn request_node(x: f64, y: f64, load_change: i32) -> Node {
    Node::new(x, y, 1.0, load_change, 0.0, 1000.0)
}

fn depot_node(x: f64, y: f64, latest: f64) -> Node {
    Node::new(x, y, 0.0, 0, 0.0, latest)
}

/// One user on a line: depot (0,0) -> pickup (1,0) -> dropoff (3,0) -> final depot (4,0).
///
/// Nodes: 0 pickup, 1 dropoff, 2 origin depot, 3 final depot.
pub fn single_request_data() -> ProblemData {
    ProblemData {
        name: "single-request".to_string(),
        nb_users: 1,
        nodes: vec![
            request_node(1.0, 0.0, 1),
            request_node(3.0, 0.0, -1),
            depot_node(0.0, 0.0, 1000.0),
            depot_node(4.0, 0.0, 1000.0),
        ],
        vehicles: vec![Vehicle {
            capacity: 3,
            initial_battery: 100.0,
            battery_capacity: 100.0,
            min_end_ratio: 0.1,
        }],
        origin_depots: vec![2],
        final_depots: vec![3],
        charging_stations: Vec::new(),
        max_ride_times: vec![100.0],
        weights: [1.0, 1.0, 1.0],
        electricity_prices: vec![0.1; 17],
        period_length: 60.0,
        horizon: 1000.0,
        discharge_rate: 1.0,
        distances: None,
        consumption: None,
    }
}

pub fn single_request() -> Problem {
    Problem::new(single_request_data()).unwrap()
}

/// The single request with a pickup window that closes before the vehicle can arrive.
pub fn unreachable_pickup() -> Problem {
    let mut data = single_request_data();
    data.nodes[0].latest = 0.5;
    Problem::new(data).unwrap()
}

/// The single request with a battery too low to finish and no charging station.
pub fn stranded_vehicle() -> Problem {
    let mut data = single_request_data();
    data.vehicles[0].initial_battery = 10.0;
    data.vehicles[0].min_end_ratio = 0.5;
    Problem::new(data).unwrap()
}

/// The single request with a low battery and one station at (2,1).
///
/// Node 4 is the station.
pub fn charging_detour() -> Problem {
    let mut data = single_request_data();
    data.nodes.push(depot_node(2.0, 1.0, 1000.0));
    data.vehicles[0].initial_battery = 10.0;
    data.charging_stations.push(ChargingStation {
        node: 4,
        recharge_rate: 1.0,
        chargers: 1,
    });
    Problem::new(data).unwrap()
}

/// Three users, two vehicles, one single-charger station.
///
/// Nodes: pickups 0-2, dropoffs 3-5, origin depots 6-7, final depots 8-9, station 10.
pub fn small_fleet_data() -> ProblemData {
    let window = |x: f64, y: f64, load_change: i32| Node::new(x, y, 1.0, load_change, 0.0, 200.0);
    ProblemData {
        name: "small-fleet".to_string(),
        nb_users: 3,
        nodes: vec![
            window(1.0, 1.0, 1),
            window(2.0, 3.0, 1),
            window(5.0, 1.0, 1),
            window(4.0, 2.0, -1),
            window(6.0, 4.0, -1),
            window(8.0, 2.0, -1),
            depot_node(0.0, 0.0, 240.0),
            depot_node(0.0, 0.0, 240.0),
            depot_node(9.0, 0.0, 240.0),
            depot_node(9.0, 1.0, 240.0),
            depot_node(5.0, 5.0, 240.0),
        ],
        vehicles: vec![
            Vehicle {
                capacity: 2,
                initial_battery: 14.0,
                battery_capacity: 30.0,
                min_end_ratio: 0.4,
            };
            2
        ],
        origin_depots: vec![6, 7],
        final_depots: vec![8, 9],
        charging_stations: vec![ChargingStation {
            node: 10,
            recharge_rate: 0.5,
            chargers: 1,
        }],
        max_ride_times: vec![30.0; 3],
        weights: [0.75, 0.25, 1.0],
        electricity_prices: vec![0.3, 0.1, 0.2, 0.5, 0.4, 0.1, 0.3, 0.2],
        period_length: 30.0,
        horizon: 240.0,
        discharge_rate: 0.2,
        distances: None,
        consumption: None,
    }
}

pub fn small_fleet() -> Problem {
    Problem::new(small_fleet_data()).unwrap()
}

/// The single request with a short pickup window and a second vehicle.
///
/// Vehicle 0 starts at node 4 (500,0) and cannot reach the pickup before it
/// closes at 100; vehicle 1 starts at node 2 (0,0) as usual.
pub fn far_depot() -> Problem {
    let mut data = single_request_data();
    data.nodes[0].latest = 100.0;
    data.nodes.push(depot_node(500.0, 0.0, 1000.0));
    data.vehicles.push(data.vehicles[0].clone());
    data.origin_depots = vec![4, 2];
    data.discharge_rate = 0.01;
    Problem::new(data).unwrap()
}

/// Two users on a line served by one vehicle.
///
/// Nodes: pickups 0 (1,0) and 1 (2,0), dropoffs 2 (3,0) and 3 (4,0),
/// origin depot 4 (0,0), final depot 5 (5,0).
pub fn two_requests() -> Problem {
    let mut data = single_request_data();
    data.name = "two-requests".to_string();
    data.nb_users = 2;
    data.nodes = vec![
        request_node(1.0, 0.0, 1),
        request_node(2.0, 0.0, 1),
        request_node(3.0, 0.0, -1),
        request_node(4.0, 0.0, -1),
        depot_node(0.0, 0.0, 1000.0),
        depot_node(5.0, 0.0, 1000.0),
    ];
    data.origin_depots = vec![4];
    data.final_depots = vec![5];
    data.max_ride_times = vec![100.0; 2];
    Problem::new(data).unwrap()
}

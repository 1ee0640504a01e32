//! Module for representing E-ADARP problem data.
//!
//! This module turns a raw [`ProblemData`] bundle into a validated [`Problem`]:
//! - node, vehicle and charging station records
//! - travel-time and battery-consumption matrices (Euclidean when not supplied)
//! - tightened pickup/dropoff time windows
//! - the electricity price table indexed by period
//!
//! Node indices are 0-based. Nodes `0..U` are pickups and node `i + U` is the
//! dropoff of pickup `i`; depots and charging stations follow in any order.

use crate::error::{ProblemError, SolverError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// A physical location: pickup, dropoff, depot or charging station
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
    /// Service duration at this node
    #[serde(default)]
    pub service_time: f64,
    /// Load change when visited (+1 pickup, -1 dropoff, 0 otherwise)
    #[serde(default)]
    pub load_change: i32,
    /// Earliest service start
    pub earliest: f64,
    /// Latest service start
    pub latest: f64,
}

impl Node {
    pub fn new(x: f64, y: f64, service_time: f64, load_change: i32, earliest: f64, latest: f64) -> Self {
        Node { x, y, service_time, load_change, earliest, latest }
    }
}

/// An electric vehicle of the fleet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    /// Passenger capacity
    pub capacity: i32,
    /// Battery level when leaving the origin depot
    pub initial_battery: f64,
    /// Battery capacity (Q)
    pub battery_capacity: f64,
    /// Minimum battery ratio required at the end of the route (r)
    pub min_end_ratio: f64,
}

impl Vehicle {
    /// Battery level the route must end with (r * Q)
    pub fn min_end_battery(&self) -> f64 {
        self.min_end_ratio * self.battery_capacity
    }
}

/// A charging station with parallel chargers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargingStation {
    /// Node index of the station
    pub node: usize,
    /// Battery gained per minute of charging (alpha)
    pub recharge_rate: f64,
    /// Number of parallel chargers
    pub chargers: usize,
}

/// Raw problem bundle, as produced by an instance reader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemData {
    pub name: String,
    /// Number of users (U)
    pub nb_users: usize,
    pub nodes: Vec<Node>,
    pub vehicles: Vec<Vehicle>,
    /// Origin depot node of each vehicle
    pub origin_depots: Vec<usize>,
    /// Candidate final depot nodes
    pub final_depots: Vec<usize>,
    #[serde(default)]
    pub charging_stations: Vec<ChargingStation>,
    /// Maximum ride time of each user
    pub max_ride_times: Vec<f64>,
    /// Objective weights for TRT, ERT and CC
    pub weights: [f64; 3],
    /// Electricity price of each period
    pub electricity_prices: Vec<f64>,
    pub period_length: f64,
    pub horizon: f64,
    #[serde(default)]
    pub discharge_rate: f64,
    /// Travel-time matrix; Euclidean distances when absent
    #[serde(default)]
    pub distances: Option<Vec<Vec<f64>>>,
    /// Battery-consumption matrix; `discharge_rate * distance` when absent
    #[serde(default)]
    pub consumption: Option<Vec<Vec<f64>>>,
}

/// Validated, read-only problem shared by every component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub name: String,
    pub nb_users: usize,
    /// Nodes with tightened time windows
    pub nodes: Vec<Node>,
    pub vehicles: Vec<Vehicle>,
    pub origin_depots: Vec<usize>,
    pub final_depots: Vec<usize>,
    pub stations: Vec<ChargingStation>,
    pub max_ride_times: Vec<f64>,
    pub weights: [f64; 3],
    /// Non-negative price of each period
    pub prices: Vec<f64>,
    pub period_length: f64,
    pub horizon: f64,
    /// Travel times
    #[serde(skip)]
    pub dist: Vec<Vec<f64>>,
    /// Battery consumption
    #[serde(skip)]
    pub cons: Vec<Vec<f64>>,
}

impl Problem {
    /// Validate a bundle and derive matrices and tightened windows.
    pub fn new(data: ProblemData) -> Result<Self, ProblemError> {
        let n = data.nodes.len();
        let users = data.nb_users;

        if data.vehicles.is_empty() {
            return Err(ProblemError::EmptyFleet);
        }
        if data.origin_depots.len() != data.vehicles.len() {
            return Err(ProblemError::OriginDepotCount {
                vehicles: data.vehicles.len(),
                depots: data.origin_depots.len(),
            });
        }
        if data.final_depots.is_empty() {
            return Err(ProblemError::NoFinalDepot);
        }
        if n < 2 * users + 2 {
            return Err(ProblemError::TooFewNodes { nodes: n, users });
        }
        check_indices("origin depots", &data.origin_depots, n)?;
        check_indices("final depots", &data.final_depots, n)?;
        for station in &data.charging_stations {
            check_indices("charging stations", &[station.node], n)?;
            if station.chargers == 0 {
                return Err(ProblemError::InvalidStation { node: station.node, reason: "no charger" });
            }
            if station.recharge_rate <= 0.0 {
                return Err(ProblemError::InvalidStation {
                    node: station.node,
                    reason: "non-positive recharge rate",
                });
            }
        }
        if data.max_ride_times.len() != users {
            return Err(ProblemError::RideTimeCount {
                expected: users,
                found: data.max_ride_times.len(),
            });
        }
        if data.period_length <= 0.0 {
            return Err(ProblemError::PeriodLength(data.period_length));
        }

        let nb_periods = ((data.horizon / data.period_length).ceil() as usize).max(1);
        if data.electricity_prices.len() < nb_periods {
            return Err(ProblemError::PriceCount {
                expected: nb_periods,
                found: data.electricity_prices.len(),
            });
        }
        let prices: Vec<f64> = data.electricity_prices[..nb_periods]
            .iter()
            .map(|&p| p.max(0.0))
            .collect();

        let dist = match data.distances {
            Some(matrix) => {
                check_matrix("distance", &matrix, n)?;
                matrix
            }
            None => Self::compute_distance_matrix(&data.nodes),
        };
        let cons = match data.consumption {
            Some(matrix) => {
                check_matrix("consumption", &matrix, n)?;
                matrix
            }
            None => dist
                .iter()
                .map(|row| row.iter().map(|d| data.discharge_rate * d).collect())
                .collect(),
        };

        let mut problem = Problem {
            name: data.name,
            nb_users: users,
            nodes: data.nodes,
            vehicles: data.vehicles,
            origin_depots: data.origin_depots,
            final_depots: data.final_depots,
            stations: data.charging_stations,
            max_ride_times: data.max_ride_times,
            weights: data.weights,
            prices,
            period_length: data.period_length,
            horizon: data.horizon,
            dist,
            cons,
        };
        problem.tighten_time_windows();
        Ok(problem)
    }

    /// Load a JSON problem bundle from disk.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, SolverError> {
        let reader = BufReader::new(File::open(path)?);
        let data: ProblemData = serde_json::from_reader(reader)?;
        Ok(Problem::new(data)?)
    }

    /// Compute the Euclidean distance matrix
    pub fn compute_distance_matrix(nodes: &[Node]) -> Vec<Vec<f64>> {
        nodes
            .iter()
            .map(|a| {
                nodes
                    .iter()
                    .map(|b| ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt())
                    .collect()
            })
            .collect()
    }

    // Pickups are tightened first so dropoffs see the final pickup windows.
    fn tighten_time_windows(&mut self) {
        let u = self.nb_users;
        for i in 0..u {
            let d = self.nodes[i].service_time;
            let dropoff = &self.nodes[i + u];
            let earliest = dropoff.earliest - self.max_ride_times[i] - d;
            let latest = dropoff.latest - self.dist[i][i + u] - d;
            let pickup = &mut self.nodes[i];
            pickup.earliest = pickup.earliest.max(earliest);
            pickup.latest = pickup.latest.min(latest);
        }
        for i in u..2 * u {
            let p = i - u;
            let pickup = &self.nodes[p];
            let earliest = pickup.earliest + self.dist[p][i] + pickup.service_time;
            let latest = pickup.latest + pickup.service_time + self.max_ride_times[p];
            let dropoff = &mut self.nodes[i];
            dropoff.earliest = dropoff.earliest.max(earliest);
            dropoff.latest = dropoff.latest.min(latest);
        }
    }

    pub fn nb_vehicles(&self) -> usize {
        self.vehicles.len()
    }

    /// Number of random keys: pickups, dropoffs, vehicles and three strategy genes
    pub fn chromosome_len(&self) -> usize {
        2 * self.nb_users + self.vehicles.len() + 3
    }

    pub fn is_pickup(&self, node: usize) -> bool {
        node < self.nb_users
    }

    pub fn is_dropoff(&self, node: usize) -> bool {
        node >= self.nb_users && node < 2 * self.nb_users
    }

    #[inline]
    pub fn distance(&self, i: usize, j: usize) -> f64 {
        self.dist[i][j]
    }

    #[inline]
    pub fn consumption(&self, i: usize, j: usize) -> f64 {
        self.cons[i][j]
    }

    #[inline]
    pub fn service_time(&self, node: usize) -> f64 {
        self.nodes[node].service_time
    }

    /// Price period containing time `t`, clamped into the price table
    pub fn period_index(&self, t: f64) -> usize {
        let period = (t / self.period_length).floor();
        if period <= 0.0 {
            0
        } else {
            (period as usize).min(self.prices.len() - 1)
        }
    }

    /// Electricity price at time `t`
    pub fn price_at(&self, t: f64) -> f64 {
        self.prices[self.period_index(t)]
    }

    /// Number of one-hour slots covered by the price table
    pub fn nb_hours(&self) -> usize {
        (self.prices.len() as f64 * self.period_length / 60.0).ceil() as usize
    }

    /// Get statistics about the problem
    pub fn statistics(&self) -> ProblemStatistics {
        let min_price = self.prices.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_price = self.prices.iter().cloned().fold(0.0, f64::max);
        let avg_direct_ride = if self.nb_users > 0 {
            (0..self.nb_users)
                .map(|i| self.dist[i][i + self.nb_users])
                .sum::<f64>()
                / self.nb_users as f64
        } else {
            0.0
        };

        ProblemStatistics {
            name: self.name.clone(),
            nb_nodes: self.nodes.len(),
            nb_users: self.nb_users,
            nb_vehicles: self.vehicles.len(),
            nb_final_depots: self.final_depots.len(),
            nb_stations: self.stations.len(),
            nb_chargers: self.stations.iter().map(|s| s.chargers).sum(),
            horizon: self.horizon,
            nb_periods: self.prices.len(),
            min_price,
            max_price,
            avg_direct_ride,
            chromosome_len: self.chromosome_len(),
        }
    }
}

fn check_indices(context: &'static str, indices: &[usize], nodes: usize) -> Result<(), ProblemError> {
    match indices.iter().find(|&&i| i >= nodes) {
        Some(&index) => Err(ProblemError::NodeOutOfRange { context, index, nodes }),
        None => Ok(()),
    }
}

fn check_matrix(matrix: &'static str, values: &[Vec<f64>], expected: usize) -> Result<(), ProblemError> {
    if values.len() != expected || values.iter().any(|row| row.len() != expected) {
        return Err(ProblemError::MatrixDimension { matrix, expected });
    }
    Ok(())
}

/// Statistics about an E-ADARP problem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemStatistics {
    pub name: String,
    pub nb_nodes: usize,
    pub nb_users: usize,
    pub nb_vehicles: usize,
    pub nb_final_depots: usize,
    pub nb_stations: usize,
    pub nb_chargers: usize,
    pub horizon: f64,
    pub nb_periods: usize,
    pub min_price: f64,
    pub max_price: f64,
    pub avg_direct_ride: f64,
    pub chromosome_len: usize,
}

impl std::fmt::Display for ProblemStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Problem: {}", self.name)?;
        writeln!(f, "  Nodes: {} ({} users)", self.nb_nodes, self.nb_users)?;
        writeln!(f, "  Vehicles: {}", self.nb_vehicles)?;
        writeln!(f, "  Final depots: {}", self.nb_final_depots)?;
        writeln!(f, "  Charging stations: {} ({} chargers)", self.nb_stations, self.nb_chargers)?;
        writeln!(f, "  Horizon: {:.1} ({} price periods)", self.horizon, self.nb_periods)?;
        writeln!(f, "  Price range: {:.3} - {:.3}", self.min_price, self.max_price)?;
        writeln!(f, "  Avg direct ride: {:.2}", self.avg_direct_ride)?;
        writeln!(f, "  Chromosome length: {}", self.chromosome_len)
    }
}

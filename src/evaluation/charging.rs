//! Charger occupancy calendar used while scheduling one solution.
//!
//! Every charger keeps one 60-bit minute mask per hour of the planning
//! horizon. Reservations fill chargers lowest index first, so a station is
//! full over a session exactly when its highest-index charger overlaps it.

use crate::problem::Problem;

const MINUTES_PER_HOUR: f64 = 60.0;

/// Occupied minutes of one charger during one hour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MinuteMask(u64);

impl MinuteMask {
    pub const FULL: MinuteMask = MinuteMask((1u64 << 60) - 1);

    /// Minutes `[0, n)` of the hour
    pub fn first(n: u32) -> Self {
        MinuteMask(((1u64 << n.min(60)) - 1) & Self::FULL.0)
    }

    /// Minutes `[from, to)` of the hour
    pub fn span(from: u32, to: u32) -> Self {
        MinuteMask(Self::first(to).0 ^ Self::first(from).0)
    }

    pub fn overlaps(self, other: MinuteMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }
}

/// How the start minute of a session is rounded inside its first hour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartRounding {
    Floor,
    Ceil,
}

/// Minutes of `hour` covered by the session `[start, end]`.
///
/// `None` means the session ended before this hour. Sessions starting and
/// ending inside the same hour use `rounding` on the start minute.
fn session_mask(start: f64, end: f64, hour: usize, rounding: StartRounding) -> Option<MinuteMask> {
    let hour_start = hour as f64 * MINUTES_PER_HOUR;
    let hour_end = hour_start + MINUTES_PER_HOUR;
    let ends_inside = end > hour_start && end <= hour_end;
    let minute = |t: f64| (t - hour_start).floor().clamp(0.0, 60.0) as u32;

    if start > hour_end {
        Some(MinuteMask::default())
    } else if start > hour_start {
        let first = match rounding {
            StartRounding::Floor => minute(start),
            StartRounding::Ceil => (start - hour_start).ceil().clamp(0.0, 60.0) as u32,
        };
        if ends_inside {
            Some(MinuteMask::span(first, minute(end)))
        } else {
            let first = (start - hour_start).ceil().clamp(0.0, 60.0) as u32;
            Some(MinuteMask::span(first, 60))
        }
    } else if end <= hour_start {
        None
    } else if ends_inside {
        Some(MinuteMask::first(minute(end)))
    } else {
        Some(MinuteMask::FULL)
    }
}

/// Per-station, per-charger, per-hour occupancy
#[derive(Debug, Clone)]
pub struct ChargingCalendar {
    /// `slots[station][charger][hour]`
    slots: Vec<Vec<Vec<MinuteMask>>>,
}

impl ChargingCalendar {
    /// Empty calendar covering the problem's price horizon
    pub fn new(problem: &Problem) -> Self {
        let hours = problem.nb_hours();
        let slots = problem
            .stations
            .iter()
            .map(|station| vec![vec![MinuteMask::default(); hours]; station.chargers])
            .collect();
        ChargingCalendar { slots }
    }

    pub fn nb_hours(&self) -> usize {
        self.slots
            .first()
            .and_then(|chargers| chargers.first())
            .map_or(0, |hours| hours.len())
    }

    /// Whether `station` still has a free charger over `[start, end]`.
    pub fn is_available(&self, station: usize, start: f64, end: f64) -> bool {
        let last = match self.slots[station].last() {
            Some(charger) => charger,
            None => return false,
        };
        for (hour, occupied) in last.iter().enumerate() {
            match session_mask(start, end, hour, StartRounding::Floor) {
                None => break,
                Some(session) if occupied.overlaps(session) => return false,
                Some(_) => {}
            }
        }
        true
    }

    /// Reserve `[start, end]` at `station`, spilling onto the next charger
    /// wherever the current one is already busy.
    pub fn reserve(&mut self, station: usize, start: f64, end: f64) {
        let hours = self.nb_hours();
        for hour in 0..hours {
            let mut session = match session_mask(start, end, hour, StartRounding::Ceil) {
                None => break,
                Some(session) => session,
            };
            for charger in self.slots[station].iter_mut() {
                let slot = &mut charger[hour];
                let carry = MinuteMask(slot.0 & session.0);
                slot.0 |= session.0;
                session = carry;
            }
        }
    }

    /// Occupied minutes of one charger during one hour
    pub fn occupancy(&self, station: usize, charger: usize, hour: usize) -> MinuteMask {
        self.slots[station][charger][hour]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_minute_masks() {
        assert_eq!(MinuteMask::first(0).count(), 0);
        assert_eq!(MinuteMask::first(60), MinuteMask::FULL);
        assert_eq!(MinuteMask::span(10, 20).count(), 10);
        assert!(MinuteMask::span(10, 20).overlaps(MinuteMask::span(19, 30)));
        assert!(!MinuteMask::span(10, 20).overlaps(MinuteMask::span(20, 30)));
    }

    #[test]
    fn test_session_spanning_hours() {
        // 50.5 -> 130.2 : minutes 51..60, then the whole second hour, then 0..10
        assert_eq!(
            session_mask(50.5, 130.2, 0, StartRounding::Ceil),
            Some(MinuteMask::span(51, 60))
        );
        assert_eq!(session_mask(50.5, 130.2, 1, StartRounding::Ceil), Some(MinuteMask::FULL));
        assert_eq!(session_mask(50.5, 130.2, 2, StartRounding::Ceil), Some(MinuteMask::first(10)));
        assert_eq!(session_mask(50.5, 130.2, 3, StartRounding::Ceil), None);
        assert_eq!(
            session_mask(10.5, 20.0, 0, StartRounding::Floor),
            Some(MinuteMask::span(10, 20))
        );
    }

    #[test]
    fn test_single_charger_blocks_overlap() {
        let problem = fixtures::charging_detour();
        let mut calendar = ChargingCalendar::new(&problem);

        assert!(calendar.is_available(0, 100.0, 150.0));
        calendar.reserve(0, 100.0, 150.0);

        assert!(!calendar.is_available(0, 140.0, 200.0));
        assert!(!calendar.is_available(0, 60.0, 101.5));
        assert!(calendar.is_available(0, 150.0, 200.0));
        assert!(calendar.is_available(0, 10.0, 90.0));
    }

    #[test]
    fn test_reservations_spill_to_next_charger() {
        let mut data = fixtures::single_request_data();
        data.nodes.push(crate::problem::Node::new(2.0, 1.0, 0.0, 0, 0.0, 1000.0));
        data.charging_stations.push(crate::problem::ChargingStation {
            node: 4,
            recharge_rate: 1.0,
            chargers: 2,
        });
        let problem = crate::problem::Problem::new(data).unwrap();
        let mut calendar = ChargingCalendar::new(&problem);

        calendar.reserve(0, 0.0, 30.0);
        assert!(calendar.is_available(0, 10.0, 20.0));
        assert!(calendar.occupancy(0, 1, 0).is_empty());

        calendar.reserve(0, 0.0, 20.0);
        assert_eq!(calendar.occupancy(0, 1, 0), MinuteMask::first(20));
        assert!(!calendar.is_available(0, 10.0, 20.0));
        assert!(calendar.is_available(0, 20.0, 40.0));
    }
}

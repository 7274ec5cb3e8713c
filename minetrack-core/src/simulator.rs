//! Synthetic fleet motion along waypoint cycles.
//!
//! Each simulated device walks its own closed path at a fixed speed. One
//! shared tick advances every device in turn; devices never share progress
//! state. Heading, zone and signal are derived from the interpolated point.
//! Signal jitter comes from a seeded RNG so runs are reproducible.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::geo::{bearing_degrees, distance_meters, offset_meters};
use crate::types::{DeviceCategory, DeviceId, Position, Timestamp};
use crate::zones::zone_for_depth;

/// Default tick cadence, seconds.
pub const DEFAULT_TICK_SECS: f64 = 2.0;

/// Accepted tick cadence range, seconds.
pub const MIN_TICK_SECS: f64 = 0.1;
pub const MAX_TICK_SECS: f64 = 3600.0;

/// Default vehicle speed, km/h.
pub const DEFAULT_SPEED_KMH: f64 = 15.0;

const SIGNAL_FLOOR: f64 = 5.0;
const SIGNAL_LOSS_PER_M: f64 = 0.3;
const SIGNAL_JITTER: f64 = 5.0;
const BATTERY_DRAIN_PER_TICK: f64 = 0.05;
const SIM_ACCURACY_M: f64 = 5.0;

/// A node of a waypoint cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Waypoint {
    pub lat: f64,
    pub lng: f64,
    pub depth: f64,
}

/// Ordered cycle of waypoints; the last node links back to the first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaypointPath {
    pub waypoints: Vec<Waypoint>,
}

impl WaypointPath {
    pub fn new(waypoints: Vec<Waypoint>) -> Self {
        WaypointPath { waypoints }
    }

    /// Build a path from (north, east, depth) offsets around a reference.
    pub fn from_offsets(center_lat: f64, center_lng: f64, offsets: &[(f64, f64, f64)]) -> Self {
        let waypoints = offsets
            .iter()
            .map(|(north, east, depth)| {
                let (lat, lng) = offset_meters(center_lat, center_lng, *north, *east);
                Waypoint {
                    lat,
                    lng,
                    depth: *depth,
                }
            })
            .collect();
        WaypointPath { waypoints }
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    fn next_index(&self, index: usize) -> usize {
        (index + 1) % self.waypoints.len()
    }
}

/// Where a device is along its path.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SimulationProgress {
    pub edge: usize,
    pub fraction: f64,
}

/// Static description of a simulated device.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedDevice {
    pub device_id: DeviceId,
    pub name: String,
    pub category: DeviceCategory,
    pub speed_kmh: f64,
    pub path: WaypointPath,
}

#[derive(Debug, Clone)]
struct Runner {
    speed_kmh: f64,
    path: WaypointPath,
    progress: SimulationProgress,
    battery: f64,
}

pub struct Simulator {
    pub tick_secs: f64,
    seed: u64,
    rng: StdRng,
    running: BTreeMap<DeviceId, Runner>,
}

impl Simulator {
    /// A non-finite or non-positive `tick_secs` falls back to the default;
    /// anything else is clamped into `MIN_TICK_SECS..=MAX_TICK_SECS`.
    pub fn new(tick_secs: f64, seed: u64) -> Self {
        let tick_secs = if tick_secs.is_finite() && tick_secs > 0.0 {
            tick_secs.clamp(MIN_TICK_SECS, MAX_TICK_SECS)
        } else {
            DEFAULT_TICK_SECS
        };
        Simulator {
            tick_secs,
            seed,
            rng: StdRng::seed_from_u64(seed),
            running: BTreeMap::new(),
        }
    }

    /// Start simulating the given devices. Devices already running keep their
    /// progress; devices with an empty path are skipped. Returns how many
    /// devices were newly started.
    pub fn start(&mut self, devices: &[SimulatedDevice]) -> usize {
        if self.running.is_empty() {
            self.rng = StdRng::seed_from_u64(self.seed);
        }
        let mut started = 0;
        for dev in devices {
            if dev.path.is_empty() || self.running.contains_key(&dev.device_id) {
                continue;
            }
            self.running.insert(
                dev.device_id.clone(),
                Runner {
                    speed_kmh: dev.speed_kmh,
                    path: dev.path.clone(),
                    progress: SimulationProgress::default(),
                    battery: 100.0,
                },
            );
            started += 1;
        }
        started
    }

    /// Drop all progress; a later start begins each device at its first waypoint.
    pub fn stop(&mut self) {
        self.running.clear();
    }

    pub fn is_running(&self) -> bool {
        !self.running.is_empty()
    }

    pub fn running_devices(&self) -> Vec<DeviceId> {
        self.running.keys().cloned().collect()
    }

    pub fn progress(&self, device_id: &str) -> Option<SimulationProgress> {
        self.running.get(device_id).map(|r| r.progress)
    }

    /// Advance every running device by one tick and emit their new fixes.
    pub fn step(&mut self, now: Timestamp) -> Vec<Position> {
        let tick_secs = self.tick_secs;
        let rng = &mut self.rng;
        self.running
            .iter_mut()
            .map(|(device_id, runner)| advance(device_id, runner, tick_secs, now, rng))
            .collect()
    }
}

fn advance(
    device_id: &str,
    runner: &mut Runner,
    tick_secs: f64,
    now: Timestamp,
    rng: &mut StdRng,
) -> Position {
    let path = &runner.path;
    let from = path.waypoints[runner.progress.edge];
    let to = path.waypoints[path.next_index(runner.progress.edge)];

    let horizontal = distance_meters(from.lat, from.lng, to.lat, to.lng);
    let segment = (horizontal.powi(2) + (to.depth - from.depth).powi(2)).sqrt();
    let step_m = runner.speed_kmh / 3.6 * tick_secs;

    let fraction = if segment > f64::EPSILON {
        runner.progress.fraction + step_m / segment
    } else {
        1.0
    };

    let point = if fraction >= 1.0 {
        runner.progress.edge = path.next_index(runner.progress.edge);
        runner.progress.fraction = 0.0;
        to
    } else {
        runner.progress.fraction = fraction;
        Waypoint {
            lat: from.lat + (to.lat - from.lat) * fraction,
            lng: from.lng + (to.lng - from.lng) * fraction,
            depth: from.depth + (to.depth - from.depth) * fraction,
        }
    };

    let target = path.waypoints[path.next_index(runner.progress.edge)];
    let heading = if distance_meters(point.lat, point.lng, target.lat, target.lng) > 0.01 {
        bearing_degrees(point.lat, point.lng, target.lat, target.lng)
    } else {
        bearing_degrees(from.lat, from.lng, to.lat, to.lng)
    };

    let depth = point.depth.max(0.0);
    let jitter = rng.gen_range(-SIGNAL_JITTER..=SIGNAL_JITTER);
    let signal = (100.0 - SIGNAL_LOSS_PER_M * depth + jitter).clamp(SIGNAL_FLOOR, 100.0);
    runner.battery = (runner.battery - BATTERY_DRAIN_PER_TICK).max(0.0);

    Position {
        id: uuid::Uuid::new_v4().to_string(),
        device_id: device_id.to_string(),
        lat: point.lat,
        lng: point.lng,
        timestamp: now,
        speed_kmh: runner.speed_kmh,
        heading,
        altitude: -depth,
        accuracy: SIM_ACCURACY_M,
        battery: runner.battery,
        depth,
        zone: zone_for_depth(depth).to_string(),
        signal,
    }
}

/// The demo fleet: two vehicles, a drill rig and a shift supervisor, each on
/// its own loop through the generated mine layout.
pub fn default_fleet(center_lat: f64, center_lng: f64, vehicle_speed_kmh: f64) -> Vec<SimulatedDevice> {
    let fleet: &[(&str, &str, DeviceCategory, f64, &[(f64, f64, f64)])] = &[
        (
            "haul-07",
            "Haul Truck 07",
            DeviceCategory::Vehicle,
            vehicle_speed_kmh,
            &[
                (0.0, 0.0, 0.0),
                (0.0, 150.0, 20.0),
                (200.0, 150.0, 50.0),
                (300.0, 350.0, 60.0),
                (0.0, 150.0, 20.0),
            ],
        ),
        (
            "lhd-02",
            "Loader LHD-02",
            DeviceCategory::Vehicle,
            vehicle_speed_kmh,
            &[
                (0.0, 150.0, 20.0),
                (-200.0, 300.0, 150.0),
                (-220.0, 350.0, 160.0),
                (-400.0, 500.0, 250.0),
                (-420.0, 560.0, 280.0),
                (-450.0, 600.0, 260.0),
                (-250.0, 400.0, 150.0),
            ],
        ),
        (
            "drill-03",
            "Drill Rig 3",
            DeviceCategory::Drill,
            vehicle_speed_kmh / 5.0,
            &[
                (-400.0, 500.0, 250.0),
                (-350.0, 650.0, 270.0),
                (-450.0, 600.0, 285.0),
            ],
        ),
        (
            "boss-01",
            "Shift Boss",
            DeviceCategory::Personnel,
            5.0,
            &[
                (0.0, 0.0, 0.0),
                (180.0, 200.0, 45.0),
                (300.0, -250.0, 0.0),
            ],
        ),
    ];

    fleet
        .iter()
        .map(|(id, name, category, speed, offsets)| SimulatedDevice {
            device_id: id.to_string(),
            name: name.to_string(),
            category: *category,
            speed_kmh: *speed,
            path: WaypointPath::from_offsets(center_lat, center_lng, offsets),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

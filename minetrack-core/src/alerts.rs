//! Alert list and alert generation rules.
//!
//! The list is bounded and newest-first. It does not dedup by content: the
//! producers (geofence transitions, edge detectors) only fire on crossings.

use std::collections::{HashMap, VecDeque};

use crate::geofence::{Crossing, Transition};
use crate::types::{Alert, AlertPriority, AlertType, Position, ZoneType};

/// Maximum alerts retained.
pub const ALERT_CAPACITY: usize = 50;

/// Signal strength below this is considered lost.
pub const SIGNAL_LOST_THRESHOLD: f64 = 20.0;

/// Battery percentage below this is considered low.
pub const LOW_BATTERY_THRESHOLD: f64 = 20.0;

/// Default speed limit underground, km/h.
pub const DEFAULT_SPEED_LIMIT_KMH: f64 = 25.0;

// ---------------------------------------------------------------------------
// Alert list
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct AlertManager {
    alerts: VecDeque<Alert>,
}

impl AlertManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend, dropping the oldest past capacity.
    pub fn record(&mut self, alert: Alert) {
        self.alerts.push_front(alert);
        self.alerts.truncate(ALERT_CAPACITY);
    }

    /// Mark an alert read. Unknown ids are ignored. Returns whether the
    /// read flag actually changed.
    pub fn dismiss(&mut self, id: &str) -> bool {
        match self.alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) if !alert.read => {
                alert.read = true;
                true
            }
            _ => false,
        }
    }

    /// Mark every alert read. Returns how many changed.
    pub fn dismiss_all(&mut self) -> usize {
        let mut changed = 0;
        for alert in self.alerts.iter_mut().filter(|a| !a.read) {
            alert.read = true;
            changed += 1;
        }
        changed
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.alerts.iter().any(|a| a.id == id)
    }

    pub fn unread_count(&self) -> usize {
        self.alerts.iter().filter(|a| !a.read).count()
    }

    /// Newest first.
    pub fn all(&self) -> impl Iterator<Item = &Alert> + '_ {
        self.alerts.iter()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Generation rules
// ---------------------------------------------------------------------------

/// Priority for a geofence crossing.
pub fn transition_priority(crossing: Crossing, zone_type: ZoneType) -> AlertPriority {
    match (crossing, zone_type) {
        (Crossing::Enter, ZoneType::Hazard) => AlertPriority::Critical,
        (Crossing::Enter, _) => AlertPriority::Low,
        (Crossing::Exit, ZoneType::Safe) => AlertPriority::High,
        (Crossing::Exit, _) => AlertPriority::Medium,
    }
}

pub fn transition_alert(device_name: &str, transition: &Transition, position: &Position) -> Alert {
    let fence = &transition.geofence;
    let (alert_type, verb) = match transition.crossing {
        Crossing::Enter => (AlertType::ZoneEnter, "entered"),
        Crossing::Exit => (AlertType::ZoneExit, "left"),
    };
    Alert::new(
        alert_type,
        transition_priority(transition.crossing, fence.zone_type),
        &position.device_id,
        format!("{device_name} {verb} {} ({} zone)", fence.name, fence.zone_type),
        position.timestamp,
    )
    .with_geofence(&fence.id)
    .at(position)
}

pub fn emergency_alert(device_name: &str, position: &Position, timestamp: f64) -> Alert {
    Alert::new(
        AlertType::Emergency,
        AlertPriority::Critical,
        &position.device_id,
        format!("EMERGENCY declared by {device_name} in {}", position.zone),
        timestamp,
    )
    .at(position)
}

pub fn breakdown_alert(device_name: &str, position: &Position, timestamp: f64) -> Alert {
    Alert::new(
        AlertType::Breakdown,
        AlertPriority::High,
        &position.device_id,
        format!("{device_name} reported a breakdown in {}", position.zone),
        timestamp,
    )
    .at(position)
}

pub fn offline_alert(device_id: &str, device_name: &str, last_seen: f64, now: f64) -> Alert {
    Alert::new(
        AlertType::Offline,
        AlertPriority::High,
        device_id,
        format!("{device_name} offline, no fix for {:.0}s", now - last_seen),
        now,
    )
}

// ---------------------------------------------------------------------------
// Edge detection
// ---------------------------------------------------------------------------

/// Last seen readings for one device.
#[derive(Debug, Clone, Copy, Default)]
struct Readings {
    signal: Option<f64>,
    battery: Option<f64>,
    speed_kmh: Option<f64>,
}

/// Per-device threshold crossing detector for signal, battery and speed.
///
/// Every rule needs a previous reading: the first fix of a device only
/// establishes the baseline.
#[derive(Debug, Clone)]
pub struct EdgeDetector {
    pub speed_limit_kmh: f64,
    last: HashMap<String, Readings>,
}

impl EdgeDetector {
    pub fn new(speed_limit_kmh: f64) -> Self {
        EdgeDetector {
            speed_limit_kmh,
            last: HashMap::new(),
        }
    }

    /// Feed a fix, returning alerts for any falling/rising edge crossed.
    pub fn check(&mut self, device_name: &str, position: &Position) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let prev = self
            .last
            .insert(
                position.device_id.clone(),
                Readings {
                    signal: Some(position.signal),
                    battery: Some(position.battery),
                    speed_kmh: Some(position.speed_kmh),
                },
            )
            .unwrap_or_default();

        if falls_below(prev.signal, position.signal, SIGNAL_LOST_THRESHOLD) {
            alerts.push(
                Alert::new(
                    AlertType::SignalLost,
                    AlertPriority::High,
                    &position.device_id,
                    format!(
                        "{device_name} signal dropped to {:.0}% in {}",
                        position.signal, position.zone
                    ),
                    position.timestamp,
                )
                .at(position),
            );
        }

        if falls_below(prev.battery, position.battery, LOW_BATTERY_THRESHOLD) {
            alerts.push(
                Alert::new(
                    AlertType::LowBattery,
                    AlertPriority::Medium,
                    &position.device_id,
                    format!("{device_name} battery low ({:.0}%)", position.battery),
                    position.timestamp,
                )
                .at(position),
            );
        }

        let limit = self.speed_limit_kmh;
        if prev.speed_kmh.is_some_and(|s| s <= limit) && position.speed_kmh > limit {
            alerts.push(
                Alert::new(
                    AlertType::Speeding,
                    AlertPriority::Medium,
                    &position.device_id,
                    format!(
                        "{device_name} speeding at {:.1} km/h (limit {limit:.0})",
                        position.speed_kmh
                    ),
                    position.timestamp,
                )
                .at(position),
            );
        }

        alerts
    }
}

impl Default for EdgeDetector {
    fn default() -> Self {
        Self::new(DEFAULT_SPEED_LIMIT_KMH)
    }
}

fn falls_below(previous: Option<f64>, current: f64, threshold: f64) -> bool {
    previous.is_some_and(|p| p >= threshold) && current < threshold
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::offset_meters;
    use crate::geofence::detect_transitions;
    use crate::history::tests::fix;
    use crate::types::Geofence;

    fn alert(n: usize) -> Alert {
        Alert::new(
            AlertType::Speeding,
            AlertPriority::Low,
            "dev",
            format!("alert {n}"),
            n as f64,
        )
    }

    fn with_signal(seq: usize, signal: f64) -> Position {
        let mut p = fix("dev", seq, 0.0, 0.0);
        p.signal = signal;
        p
    }

    #[test]
    fn test_bounded_newest_first() {
        let mut m = AlertManager::new();
        for i in 0..73 {
            m.record(alert(i));
        }
        assert_eq!(m.len(), ALERT_CAPACITY);
        let messages: Vec<&str> = m.all().map(|a| a.message.as_str()).collect();
        assert_eq!(messages[0], "alert 72");
        assert_eq!(messages[ALERT_CAPACITY - 1], "alert 23");
    }

    #[test]
    fn test_dismiss_idempotent() {
        let mut m = AlertManager::new();
        let a = alert(0);
        let id = a.id.clone();
        m.record(a);
        m.record(alert(1));

        assert!(m.dismiss(&id));
        assert!(!m.dismiss(&id));
        assert_eq!(m.all().filter(|a| a.read).count(), 1);
        assert_eq!(m.unread_count(), 1);
    }

    #[test]
    fn test_dismiss_unknown_is_noop() {
        let mut m = AlertManager::new();
        m.record(alert(0));
        assert!(!m.dismiss("missing"));
        assert_eq!(m.unread_count(), 1);
    }

    #[test]
    fn test_dismiss_all() {
        let mut m = AlertManager::new();
        for i in 0..3 {
            m.record(alert(i));
        }
        assert_eq!(m.dismiss_all(), 3);
        assert_eq!(m.dismiss_all(), 0);
        assert_eq!(m.unread_count(), 0);
    }

    #[test]
    fn test_transition_priorities() {
        use AlertPriority::*;
        assert_eq!(transition_priority(Crossing::Enter, ZoneType::Hazard), Critical);
        assert_eq!(transition_priority(Crossing::Enter, ZoneType::Safe), Low);
        assert_eq!(transition_priority(Crossing::Enter, ZoneType::Restricted), Low);
        assert_eq!(transition_priority(Crossing::Exit, ZoneType::Safe), High);
        assert_eq!(transition_priority(Crossing::Exit, ZoneType::Hazard), Medium);
        assert_eq!(transition_priority(Crossing::Exit, ZoneType::EmergencyPoint), Medium);
    }

    #[test]
    fn test_exit_scenario_alert() {
        for (zone_type, expected) in [
            (ZoneType::Restricted, AlertPriority::Medium),
            (ZoneType::Safe, AlertPriority::High),
        ] {
            let fence = Geofence {
                id: "gf".into(),
                name: "Origin".into(),
                lat: 0.0,
                lng: 0.0,
                radius_m: 100.0,
                active: true,
                alert_on_enter: false,
                alert_on_exit: true,
                zone_type,
            };
            let first = fix("dev", 0, 0.0, 0.0);
            let (lat, lng) = offset_meters(0.0, 0.0, 0.0, 150.0);
            let second = fix("dev", 1, lat, lng);

            let transitions = detect_transitions(Some(&first), &second, &[fence]);
            let alerts: Vec<Alert> = transitions
                .iter()
                .map(|t| transition_alert("Loader", t, &second))
                .collect();
            assert_eq!(alerts.len(), 1);
            assert_eq!(alerts[0].alert_type, AlertType::ZoneExit);
            assert_eq!(alerts[0].priority, expected);
            assert_eq!(alerts[0].geofence_id.as_deref(), Some("gf"));
        }
    }

    #[test]
    fn test_signal_lost_falling_edge() {
        let mut d = EdgeDetector::default();
        assert!(d.check("dev", &with_signal(0, 25.0)).is_empty());
        let alerts = d.check("dev", &with_signal(1, 18.0));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::SignalLost);
        assert_eq!(alerts[0].priority, AlertPriority::High);
    }

    #[test]
    fn test_signal_lost_needs_baseline() {
        let mut d = EdgeDetector::default();
        let counts: Vec<usize> = [18.0, 25.0, 15.0]
            .iter()
            .enumerate()
            .map(|(i, s)| d.check("dev", &with_signal(i, *s)).len())
            .collect();
        assert_eq!(counts, vec![0, 0, 1]);
    }

    #[test]
    fn test_signal_stays_low_no_repeat() {
        let mut d = EdgeDetector::default();
        d.check("dev", &with_signal(0, 30.0));
        assert_eq!(d.check("dev", &with_signal(1, 10.0)).len(), 1);
        assert!(d.check("dev", &with_signal(2, 8.0)).is_empty());
    }

    #[test]
    fn test_signal_exactly_threshold_not_lost() {
        let mut d = EdgeDetector::default();
        d.check("dev", &with_signal(0, 30.0));
        assert!(d.check("dev", &with_signal(1, 20.0)).is_empty());
    }

    #[test]
    fn test_edges_are_per_device() {
        let mut d = EdgeDetector::default();
        d.check("a", &with_signal(0, 30.0));
        let mut other = with_signal(1, 10.0);
        other.device_id = "b".into();
        assert!(d.check("b", &other).is_empty());
    }

    #[test]
    fn test_low_battery_and_speeding() {
        let mut d = EdgeDetector::new(25.0);
        let mut p = fix("dev", 0, 0.0, 0.0);
        p.battery = 21.0;
        p.speed_kmh = 20.0;
        assert!(d.check("dev", &p).is_empty());

        let mut q = fix("dev", 1, 0.0, 0.0);
        q.battery = 19.5;
        q.speed_kmh = 31.0;
        let types: Vec<AlertType> = d.check("dev", &q).iter().map(|a| a.alert_type).collect();
        assert_eq!(types, vec![AlertType::LowBattery, AlertType::Speeding]);
    }

    #[test]
    fn test_emergency_and_breakdown_priorities() {
        let p = fix("dev", 0, 0.0, 0.0);
        assert_eq!(emergency_alert("dev", &p, 1.0).priority, AlertPriority::Critical);
        assert_eq!(breakdown_alert("dev", &p, 1.0).priority, AlertPriority::High);
        assert!(emergency_alert("dev", &p, 1.0).location.is_some());
    }
}

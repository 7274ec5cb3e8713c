//! Per-device tracking state and the ingestion path.
//!
//! Pure logic with no I/O and no clocks. Every call is one complete state
//! transition and returns the `TrackEvent`s the caller should persist.
//! Callers must serialize calls; per-device fix order is the order of
//! `ingest` calls.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::alerts::{self, AlertManager, EdgeDetector};
use crate::config::{Config, DEFAULT_OFFLINE_AFTER_SECS};
use crate::geofence::{default_geofences, detect_transitions};
use crate::history::HistoryStore;
use crate::playback::Playback;
use crate::source::{Fix, SourceStatus};
use crate::types::*;
use crate::zones::{generate_zones, is_known_label, resolve_zone};

// ---------------------------------------------------------------------------
// Track events (output)
// ---------------------------------------------------------------------------

/// Events emitted by the tracker for the caller to persist.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackEvent {
    /// A fix was appended to a device's history.
    PositionRecorded(Position),
    /// A new alert was generated.
    AlertRaised(Alert),
    /// A device's status, online flag or registration changed.
    DeviceChanged(Device),
    /// An unread alert was marked read.
    AlertDismissed(String),
}

// ---------------------------------------------------------------------------
// Per-device state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct TrackState {
    pub history: HistoryStore,
    pub playback: Playback,
}

impl TrackState {
    /// What consumers should show: the playback cursor's fix while replaying,
    /// otherwise the newest live fix.
    pub fn current_position(&self) -> Option<&Position> {
        match self.playback.cursor() {
            Some(cursor) => self.history.get(cursor),
            None => self.history.current(),
        }
    }

    /// Newest live fix regardless of playback.
    pub fn last_position(&self) -> Option<&Position> {
        self.history.current()
    }
}

// ---------------------------------------------------------------------------
// Snapshots (read-only views for consumers)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct DeviceView {
    #[serde(flatten)]
    pub device: Device,
    pub current_position: Option<Position>,
    pub last_position: Option<Position>,
    pub playback: Playback,
    pub cursor: i64,
    pub history_len: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackSnapshot {
    pub device_id: DeviceId,
    pub cursor: i64,
    pub playback: Playback,
    pub current_position: Option<Position>,
    pub history: Vec<Position>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub devices: Vec<DeviceView>,
    pub alerts: Vec<Alert>,
    pub unread_alerts: usize,
    pub zones: Vec<Zone>,
    pub geofences: Vec<Geofence>,
    pub source: SourceStatus,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// All tracking state: devices, their histories and playback, reference
/// geometry, alerts and edge detectors.
pub struct Tracker {
    devices: BTreeMap<DeviceId, Device>,
    tracks: HashMap<DeviceId, TrackState>,
    zones: Vec<Zone>,
    geofences: Vec<Geofence>,
    center: Option<(f64, f64)>,
    alerts: AlertManager,
    edges: EdgeDetector,
    source: SourceStatus,
    pub offline_after_secs: f64,

    // Counters
    pub positions_ingested: u64,
    pub duplicates_dropped: u64,
}

impl Tracker {
    pub fn new() -> Self {
        Tracker {
            devices: BTreeMap::new(),
            tracks: HashMap::new(),
            zones: Vec::new(),
            geofences: Vec::new(),
            center: None,
            alerts: AlertManager::new(),
            edges: EdgeDetector::default(),
            source: SourceStatus::default(),
            offline_after_secs: DEFAULT_OFFLINE_AFTER_SECS,
            positions_ingested: 0,
            duplicates_dropped: 0,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut tracker = Tracker::new();
        tracker.edges = EdgeDetector::new(config.alerts.speed_limit_kmh);
        tracker.offline_after_secs = config.alerts.offline_after_secs;
        if let Some((lat, lng)) = config.site.center() {
            tracker.ensure_layout(lat, lng);
        }
        tracker
    }

    /// Generate zones and default geofences around the reference point, once.
    /// Geofences added before this keep their place after the defaults.
    pub fn ensure_layout(&mut self, center_lat: f64, center_lng: f64) -> bool {
        if self.center.is_some() {
            return false;
        }
        self.zones = generate_zones(center_lat, center_lng);
        let mut fences = default_geofences(center_lat, center_lng);
        fences.retain(|d| !self.geofences.iter().any(|g| g.id == d.id));
        fences.append(&mut self.geofences);
        self.geofences = fences;
        self.center = Some((center_lat, center_lng));
        tracing::debug!(lat = center_lat, lng = center_lng, "mine layout generated");
        true
    }

    /// Reference point the layout was generated around, once known.
    pub fn center(&self) -> Option<(f64, f64)> {
        self.center
    }

    // -- ingestion ---------------------------------------------------------

    /// Apply one fix: zone label, geofence transitions, threshold alerts,
    /// history append, device liveness. Fixes already in the device's history
    /// (same id) are dropped.
    pub fn ingest(&mut self, mut position: Position) -> Vec<TrackEvent> {
        let mut events = Vec::new();

        self.ensure_layout(position.lat, position.lng);

        let device_id = position.device_id.clone();
        if self
            .tracks
            .get(&device_id)
            .is_some_and(|t| t.history.contains_id(&position.id))
        {
            self.duplicates_dropped += 1;
            return events;
        }

        if !is_known_label(&position.zone, &self.zones) {
            position.zone = resolve_zone(position.lat, position.lng, &self.zones);
        }

        let device = self.devices.entry(device_id.clone()).or_insert_with(|| {
            let device = Device::new(&device_id, &device_id, DeviceCategory::Vehicle);
            events.push(TrackEvent::DeviceChanged(device.clone()));
            device
        });
        let name = device.name.clone();

        let track = self.tracks.entry(device_id.clone()).or_default();

        let mut raised = Vec::new();
        for transition in detect_transitions(track.history.current(), &position, &self.geofences) {
            raised.push(alerts::transition_alert(&name, &transition, &position));
        }
        raised.extend(self.edges.check(&name, &position));

        if track.history.append(position.clone()) {
            track.playback.on_evicted();
        }
        self.positions_ingested += 1;
        events.push(TrackEvent::PositionRecorded(position.clone()));

        for alert in raised {
            tracing::debug!(device = %device_id, kind = %alert.alert_type, "alert raised");
            self.alerts.record(alert.clone());
            events.push(TrackEvent::AlertRaised(alert));
        }

        if let Some(device) = self.devices.get_mut(&device_id) {
            let was_online = device.online;
            device.last_seen = Some(position.timestamp);
            device.online = true;
            if device.status == DeviceStatus::Offline {
                device.status = DeviceStatus::Operational;
            }
            if !was_online {
                events.push(TrackEvent::DeviceChanged(device.clone()));
            }
        }

        events
    }

    /// Build a position from a raw source fix and ingest it.
    pub fn ingest_fix(&mut self, device_id: &str, fix: &Fix) -> Vec<TrackEvent> {
        self.ensure_layout(fix.lat, fix.lng);
        self.source = SourceStatus::Active;
        let position = Position {
            id: uuid::Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            lat: fix.lat,
            lng: fix.lng,
            timestamp: fix.timestamp,
            speed_kmh: fix.speed_kmh,
            heading: fix.heading.rem_euclid(360.0),
            altitude: fix.altitude,
            accuracy: fix.accuracy,
            battery: fix.battery.unwrap_or(100.0).clamp(0.0, 100.0),
            depth: fix.depth.unwrap_or(0.0).max(0.0),
            zone: resolve_zone(fix.lat, fix.lng, &self.zones),
            signal: fix.signal.unwrap_or(100.0).clamp(0.0, 100.0),
        };
        self.ingest(position)
    }

    /// Seed a device's history from persisted fixes, oldest first. No alerts
    /// are raised; edge detectors are primed with each fix so the next live
    /// reading is compared against the last stored one.
    pub fn restore_history(&mut self, device_id: &str, positions: Vec<Position>) -> usize {
        let name = match self.devices.get(device_id) {
            Some(device) => device.name.clone(),
            None => return 0,
        };
        let track = self.tracks.entry(device_id.to_string()).or_default();
        let mut restored = 0;
        for position in positions {
            if position.device_id != device_id || track.history.contains_id(&position.id) {
                continue;
            }
            self.edges.check(&name, &position);
            if track.history.append(position) {
                track.playback.on_evicted();
            }
            restored += 1;
        }
        restored
    }

    pub fn set_source_status(&mut self, status: SourceStatus) {
        self.source = status;
    }

    pub fn source_status(&self) -> SourceStatus {
        self.source
    }

    // -- devices -------------------------------------------------------------

    /// Register a device if unknown. Returns whether it was added.
    pub fn register_device(&mut self, device: Device) -> Option<TrackEvent> {
        if self.devices.contains_key(&device.id) {
            return None;
        }
        self.devices.insert(device.id.clone(), device.clone());
        Some(TrackEvent::DeviceChanged(device))
    }

    /// Apply a device record from external sync. Returns whether anything changed.
    pub fn apply_device_record(&mut self, record: Device) -> bool {
        match self.devices.get_mut(&record.id) {
            Some(device) => {
                let last_seen = match (device.last_seen, record.last_seen) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
                let updated = Device { last_seen, ..record };
                if *device == updated {
                    return false;
                }
                *device = updated;
                true
            }
            None => {
                self.devices.insert(record.id.clone(), record);
                true
            }
        }
    }

    /// Insert an alert from the change feed unless its id is already known.
    pub fn apply_alert_record(&mut self, alert: Alert) -> bool {
        if self.alerts.contains_id(&alert.id) {
            return false;
        }
        self.alerts.record(alert);
        true
    }

    pub fn device(&self, device_id: &str) -> Option<&Device> {
        self.devices.get(device_id)
    }

    pub fn track(&self, device_id: &str) -> Option<&TrackState> {
        self.tracks.get(device_id)
    }

    /// Last live fix for a device, looked up in its history.
    pub fn last_position(&self, device_id: &str) -> Option<&Position> {
        self.tracks.get(device_id).and_then(|t| t.last_position())
    }

    // -- manual triggers -----------------------------------------------------

    /// Declare an emergency. No-op without a known position.
    pub fn trigger_emergency(&mut self, device_id: &str, now: Timestamp) -> Vec<TrackEvent> {
        self.manual_alert(device_id, now, DeviceStatus::Emergency, alerts::emergency_alert)
    }

    /// Report a breakdown. No-op without a known position.
    pub fn report_breakdown(&mut self, device_id: &str, now: Timestamp) -> Vec<TrackEvent> {
        self.manual_alert(device_id, now, DeviceStatus::Breakdown, alerts::breakdown_alert)
    }

    fn manual_alert(
        &mut self,
        device_id: &str,
        now: Timestamp,
        status: DeviceStatus,
        build: fn(&str, &Position, Timestamp) -> Alert,
    ) -> Vec<TrackEvent> {
        let Some(position) = self.last_position(device_id).cloned() else {
            return Vec::new();
        };
        let Some(device) = self.devices.get_mut(device_id) else {
            return Vec::new();
        };
        device.status = status;
        let alert = build(&device.name, &position, now);
        let changed = device.clone();

        tracing::debug!(device = %device_id, kind = %alert.alert_type, "manual alert");
        self.alerts.record(alert.clone());
        vec![TrackEvent::DeviceChanged(changed), TrackEvent::AlertRaised(alert)]
    }

    /// Return a device in emergency or breakdown to operational.
    pub fn clear_emergency(&mut self, device_id: &str) -> Vec<TrackEvent> {
        match self.devices.get_mut(device_id) {
            Some(device)
                if matches!(device.status, DeviceStatus::Emergency | DeviceStatus::Breakdown) =>
            {
                device.status = DeviceStatus::Operational;
                vec![TrackEvent::DeviceChanged(device.clone())]
            }
            _ => Vec::new(),
        }
    }

    pub fn dismiss_alert(&mut self, alert_id: &str) -> Vec<TrackEvent> {
        if self.alerts.dismiss(alert_id) {
            vec![TrackEvent::AlertDismissed(alert_id.to_string())]
        } else {
            Vec::new()
        }
    }

    /// Mark every alert read, one event per alert that changed.
    pub fn dismiss_all_alerts(&mut self) -> Vec<TrackEvent> {
        let unread: Vec<String> = self
            .alerts
            .all()
            .filter(|a| !a.read)
            .map(|a| a.id.clone())
            .collect();
        self.alerts.dismiss_all();
        unread.into_iter().map(TrackEvent::AlertDismissed).collect()
    }

    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }

    /// Mark devices silent for longer than `offline_after_secs` offline,
    /// raising one offline alert per outage.
    pub fn sweep_offline(&mut self, now: Timestamp) -> Vec<TrackEvent> {
        let mut events = Vec::new();
        for device in self.devices.values_mut() {
            let Some(last_seen) = device.last_seen else {
                continue;
            };
            if !device.online || now - last_seen <= self.offline_after_secs {
                continue;
            }
            device.online = false;
            if device.status == DeviceStatus::Operational {
                device.status = DeviceStatus::Offline;
            }
            let alert = alerts::offline_alert(&device.id, &device.name, last_seen, now);
            tracing::debug!(device = %device.id, "device swept offline");
            self.alerts.record(alert.clone());
            events.push(TrackEvent::DeviceChanged(device.clone()));
            events.push(TrackEvent::AlertRaised(alert));
        }
        events
    }

    // -- playback ------------------------------------------------------------

    fn with_playback<R>(
        &mut self,
        device_id: &str,
        f: impl FnOnce(&mut Playback, usize) -> R,
    ) -> Option<R> {
        let track = self.tracks.get_mut(device_id)?;
        let len = track.history.len();
        Some(f(&mut track.playback, len))
    }

    pub fn playback_start(&mut self, device_id: &str) -> Option<Playback> {
        self.with_playback(device_id, |p, len| {
            p.start(len);
            *p
        })
    }

    pub fn playback_stop(&mut self, device_id: &str) -> Option<Playback> {
        self.with_playback(device_id, |p, len| {
            p.stop(len);
            *p
        })
    }

    pub fn playback_seek(&mut self, device_id: &str, index: i64) -> Option<Playback> {
        self.with_playback(device_id, |p, len| {
            p.seek(index, len);
            *p
        })
    }

    pub fn playback_set_speed(&mut self, device_id: &str, multiplier: f64) -> Option<Playback> {
        self.with_playback(device_id, |p, _| {
            p.set_speed(multiplier);
            *p
        })
    }

    /// Advance playback one step. Returns whether the device is still playing.
    pub fn playback_tick(&mut self, device_id: &str) -> bool {
        self.with_playback(device_id, |p, len| p.tick(len))
            .unwrap_or(false)
    }

    pub fn playback_go_live(&mut self, device_id: &str) -> Option<Playback> {
        self.with_playback(device_id, |p, _| {
            p.go_live();
            *p
        })
    }

    // -- reference geometry --------------------------------------------------

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn geofences(&self) -> &[Geofence] {
        &self.geofences
    }

    /// Add a geofence. Rejected if the id is taken.
    pub fn add_geofence(&mut self, geofence: Geofence) -> bool {
        if self.geofences.iter().any(|g| g.id == geofence.id) {
            return false;
        }
        self.geofences.push(geofence);
        true
    }

    pub fn remove_geofence(&mut self, geofence_id: &str) -> bool {
        let before = self.geofences.len();
        self.geofences.retain(|g| g.id != geofence_id);
        self.geofences.len() < before
    }

    pub fn set_geofence_active(&mut self, geofence_id: &str, active: bool) -> bool {
        match self.geofences.iter_mut().find(|g| g.id == geofence_id) {
            Some(fence) => {
                fence.active = active;
                true
            }
            None => false,
        }
    }

    // -- views ---------------------------------------------------------------

    pub fn snapshot(&self) -> Snapshot {
        let devices = self
            .devices
            .values()
            .map(|device| {
                let track = self.tracks.get(&device.id);
                let playback = track.map(|t| t.playback).unwrap_or_default();
                DeviceView {
                    device: device.clone(),
                    current_position: track.and_then(|t| t.current_position()).cloned(),
                    last_position: track.and_then(|t| t.last_position()).cloned(),
                    cursor: playback.cursor_index(),
                    playback,
                    history_len: track.map(|t| t.history.len()).unwrap_or(0),
                }
            })
            .collect();

        Snapshot {
            devices,
            alerts: self.alerts.all().cloned().collect(),
            unread_alerts: self.alerts.unread_count(),
            zones: self.zones.clone(),
            geofences: self.geofences.clone(),
            source: self.source,
        }
    }

    pub fn track_snapshot(&self, device_id: &str) -> Option<TrackSnapshot> {
        let track = self.tracks.get(device_id)?;
        Some(TrackSnapshot {
            device_id: device_id.to_string(),
            cursor: track.playback.cursor_index(),
            playback: track.playback,
            current_position: track.current_position().cloned(),
            history: track.history.to_vec(),
        })
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::offset_meters;
    use crate::history::tests::fix;
    use crate::history::HISTORY_CAPACITY;
    use crate::playback::PlaybackState;
    use crate::source::SourceError;
    use crate::zones::SURFACE;

    /// Tracker whose layout sits far away so generated fences never interfere.
    fn make_tracker() -> Tracker {
        let mut tracker = Tracker::new();
        tracker.ensure_layout(60.0, 60.0);
        tracker.geofences.clear();
        tracker
    }

    fn hazard_fence() -> Geofence {
        Geofence {
            id: "gf-hz".into(),
            name: "Blast".into(),
            lat: 0.0,
            lng: 0.0,
            radius_m: 100.0,
            active: true,
            alert_on_enter: true,
            alert_on_exit: true,
            zone_type: ZoneType::Hazard,
        }
    }

    fn north(seq: usize, meters: f64) -> Position {
        let (lat, lng) = offset_meters(0.0, 0.0, meters, 0.0);
        fix("dev", seq, lat, lng)
    }

    fn alert_types(events: &[TrackEvent]) -> Vec<AlertType> {
        events
            .iter()
            .filter_map(|e| match e {
                TrackEvent::AlertRaised(a) => Some(a.alert_type),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_first_fix_registers_device() {
        let mut tracker = make_tracker();
        let events = tracker.ingest(north(0, 0.0));
        assert!(matches!(events[0], TrackEvent::DeviceChanged(_)));
        assert!(events
            .iter()
            .any(|e| matches!(e, TrackEvent::PositionRecorded(_))));
        let device = tracker.device("dev").unwrap();
        assert!(device.online);
        assert_eq!(device.last_seen, Some(0.0));
        assert_eq!(tracker.positions_ingested, 1);
    }

    #[test]
    fn test_enter_alert_once() {
        let mut tracker = make_tracker();
        tracker.add_geofence(hazard_fence());
        tracker.ingest(north(0, 500.0));
        let e1 = tracker.ingest(north(1, 50.0));
        let e2 = tracker.ingest(north(2, 10.0));

        assert_eq!(alert_types(&e1), vec![AlertType::ZoneEnter]);
        assert!(alert_types(&e2).is_empty());
        let alert = tracker.alerts().all().next().unwrap();
        assert_eq!(alert.priority, AlertPriority::Critical);
        assert_eq!(alert.geofence_id.as_deref(), Some("gf-hz"));
    }

    #[test]
    fn test_exit_scenario_medium() {
        let mut tracker = make_tracker();
        let mut fence = hazard_fence();
        fence.zone_type = ZoneType::Restricted;
        fence.alert_on_enter = false;
        tracker.add_geofence(fence);
        tracker.ingest(fix("dev", 0, 0.0, 0.0));
        let events = tracker.ingest(north(1, 150.0));
        assert_eq!(alert_types(&events), vec![AlertType::ZoneExit]);
        assert_eq!(tracker.alerts().len(), 1);
        assert_eq!(tracker.alerts().all().next().unwrap().priority, AlertPriority::Medium);
    }

    #[test]
    fn test_deactivated_fence_silent() {
        let mut tracker = make_tracker();
        tracker.add_geofence(hazard_fence());
        assert!(tracker.set_geofence_active("gf-hz", false));
        tracker.ingest(north(0, 500.0));
        assert!(alert_types(&tracker.ingest(north(1, 0.0))).is_empty());
        assert!(!tracker.set_geofence_active("nope", true));
    }

    #[test]
    fn test_signal_lost_sequence() {
        let mut tracker = make_tracker();
        let mut lost = 0;
        for (i, s) in [18.0, 25.0, 15.0].into_iter().enumerate() {
            let mut p = north(i, 0.0);
            p.signal = s;
            lost += alert_types(&tracker.ingest(p))
                .iter()
                .filter(|t| **t == AlertType::SignalLost)
                .count();
        }
        assert_eq!(lost, 1);
    }

    #[test]
    fn test_duplicate_id_dropped() {
        let mut tracker = make_tracker();
        let p = north(0, 0.0);
        tracker.ingest(p.clone());
        assert!(tracker.ingest(p).is_empty());
        assert_eq!(tracker.duplicates_dropped, 1);
        assert_eq!(tracker.track("dev").unwrap().history.len(), 1);
    }

    #[test]
    fn test_unknown_zone_label_resolved() {
        let mut tracker = make_tracker();
        let mut p = north(0, 0.0);
        p.zone = "Narnia".into();
        tracker.ingest(p);
        assert_eq!(tracker.last_position("dev").unwrap().zone, SURFACE);
    }

    #[test]
    fn test_layout_from_first_fix() {
        let mut tracker = Tracker::new();
        assert!(tracker.zones().is_empty());
        tracker.ingest(fix("dev", 0, -26.2, 28.0));
        assert_eq!(tracker.zones().len(), 6);
        assert_eq!(tracker.geofences().len(), 4);
        assert_eq!(
            tracker.last_position("dev").unwrap().zone,
            crate::zones::ZONE_STATION
        );
        // Generated once only
        assert!(!tracker.ensure_layout(0.0, 0.0));
    }

    #[test]
    fn test_emergency_requires_position() {
        let mut tracker = make_tracker();
        tracker.register_device(Device::new("dev", "Loader", DeviceCategory::Vehicle));
        assert!(tracker.trigger_emergency("dev", 1.0).is_empty());
        assert_eq!(tracker.device("dev").unwrap().status, DeviceStatus::Operational);

        tracker.ingest(north(0, 0.0));
        let events = tracker.trigger_emergency("dev", 2.0);
        assert_eq!(alert_types(&events), vec![AlertType::Emergency]);
        assert_eq!(tracker.device("dev").unwrap().status, DeviceStatus::Emergency);
        assert_eq!(tracker.alerts().all().next().unwrap().priority, AlertPriority::Critical);

        assert_eq!(tracker.clear_emergency("dev").len(), 1);
        assert_eq!(tracker.device("dev").unwrap().status, DeviceStatus::Operational);
        assert!(tracker.clear_emergency("dev").is_empty());
    }

    #[test]
    fn test_breakdown() {
        let mut tracker = make_tracker();
        tracker.ingest(north(0, 0.0));
        let events = tracker.report_breakdown("dev", 1.0);
        assert_eq!(alert_types(&events), vec![AlertType::Breakdown]);
        assert_eq!(tracker.device("dev").unwrap().status, DeviceStatus::Breakdown);
        assert!(tracker.report_breakdown("ghost", 1.0).is_empty());
    }

    #[test]
    fn test_dismissal_emits_events() {
        let mut tracker = make_tracker();
        tracker.ingest(north(0, 0.0));
        tracker.report_breakdown("dev", 1.0);
        tracker.trigger_emergency("dev", 2.0);
        let ids: Vec<String> = tracker.alerts().all().map(|a| a.id.clone()).collect();
        assert_eq!(ids.len(), 2);

        let events = tracker.dismiss_alert(&ids[0]);
        assert!(matches!(&events[..], [TrackEvent::AlertDismissed(id)] if *id == ids[0]));
        assert!(tracker.dismiss_alert(&ids[0]).is_empty());
        assert!(tracker.dismiss_alert("ghost").is_empty());

        let events = tracker.dismiss_all_alerts();
        assert!(matches!(&events[..], [TrackEvent::AlertDismissed(id)] if *id == ids[1]));
        assert!(tracker.dismiss_all_alerts().is_empty());
        assert_eq!(tracker.alerts().unread_count(), 0);
    }

    #[test]
    fn test_offline_sweep_once_per_outage() {
        let mut tracker = make_tracker();
        tracker.ingest(north(0, 0.0));
        assert!(tracker.sweep_offline(30.0).is_empty());

        let events = tracker.sweep_offline(61.0);
        assert_eq!(alert_types(&events), vec![AlertType::Offline]);
        assert_eq!(tracker.device("dev").unwrap().status, DeviceStatus::Offline);
        assert!(tracker.sweep_offline(120.0).is_empty());

        // Back online re-arms the sweep
        tracker.ingest(north(1, 0.0));
        let device = tracker.device("dev").unwrap();
        assert!(device.online);
        assert_eq!(device.status, DeviceStatus::Operational);
    }

    #[test]
    fn test_playback_pins_current_position() {
        let mut tracker = make_tracker();
        for i in 0..5 {
            tracker.ingest(north(i, i as f64));
        }
        tracker.playback_seek("dev", 2);
        tracker.ingest(north(5, 5.0));

        let track = tracker.track("dev").unwrap();
        assert_eq!(track.current_position().unwrap().id, "dev-2");
        assert_eq!(track.last_position().unwrap().id, "dev-5");
        assert_eq!(track.history.len(), 6);

        tracker.playback_go_live("dev");
        assert_eq!(tracker.track("dev").unwrap().current_position().unwrap().id, "dev-5");
    }

    #[test]
    fn test_playback_cursor_follows_eviction() {
        let mut tracker = make_tracker();
        for i in 0..HISTORY_CAPACITY {
            tracker.ingest(north(i, 0.0));
        }
        tracker.playback_seek("dev", 10);
        tracker.ingest(north(HISTORY_CAPACITY, 0.0));
        let track = tracker.track("dev").unwrap();
        assert_eq!(track.playback.state, PlaybackState::Paused { cursor: 9 });
        assert_eq!(track.current_position().unwrap().id, "dev-10");
    }

    #[test]
    fn test_playback_run_to_end() {
        let mut tracker = make_tracker();
        for i in 0..4 {
            tracker.ingest(north(i, 0.0));
        }
        tracker.playback_start("dev");
        let mut ticks = 0;
        while tracker.playback_tick("dev") {
            ticks += 1;
        }
        assert_eq!(ticks, 3);
        let track = tracker.track("dev").unwrap();
        assert_eq!(track.playback.cursor(), Some(3));
        assert!(!track.playback.is_playing());
        assert!(tracker.playback_start("ghost").is_none());
    }

    #[test]
    fn test_apply_records() {
        let mut tracker = make_tracker();
        let mut d = Device::new("dev", "Loader", DeviceCategory::Vehicle);
        assert!(tracker.apply_device_record(d.clone()));
        assert!(!tracker.apply_device_record(d.clone()));
        d.status = DeviceStatus::Maintenance;
        assert!(tracker.apply_device_record(d));
        assert_eq!(tracker.device("dev").unwrap().status, DeviceStatus::Maintenance);

        let alert = Alert::new(AlertType::Offline, AlertPriority::High, "dev", "x".into(), 1.0);
        assert!(tracker.apply_alert_record(alert.clone()));
        assert!(!tracker.apply_alert_record(alert));
        assert_eq!(tracker.alerts().len(), 1);
    }

    #[test]
    fn test_ingest_fix_and_source_status() {
        let mut tracker = make_tracker();
        tracker.set_source_status(SourceStatus::Failed(SourceError::Timeout));
        let fix = Fix {
            lat: 0.0,
            lng: 0.0,
            accuracy: 3.0,
            heading: -90.0,
            speed_kmh: 12.0,
            altitude: -40.0,
            timestamp: 10.0,
            battery: None,
            depth: Some(40.0),
            signal: Some(70.0),
        };
        tracker.ingest_fix("dev", &fix);
        assert_eq!(tracker.source_status(), SourceStatus::Active);
        let p = tracker.last_position("dev").unwrap();
        assert_eq!(p.heading, 270.0);
        assert_eq!(p.battery, 100.0);
        assert_eq!(p.depth, 40.0);
    }

    #[test]
    fn test_snapshot() {
        let mut tracker = make_tracker();
        tracker.add_geofence(hazard_fence());
        tracker.ingest(north(0, 0.0));
        let snap = tracker.snapshot();
        assert_eq!(snap.devices.len(), 1);
        assert_eq!(snap.devices[0].cursor, -1);
        assert_eq!(snap.devices[0].history_len, 1);
        assert_eq!(snap.geofences.len(), 1);

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["devices"][0]["id"], "dev");
        assert_eq!(json["devices"][0]["playback"]["state"]["mode"], "live");
    }

    #[test]
    fn test_restore_history_is_silent() {
        let mut tracker = make_tracker();
        assert_eq!(tracker.restore_history("dev", vec![north(0, 0.0)]), 0);

        tracker.register_device(Device::new("dev", "Loader", DeviceCategory::Vehicle));
        let mut weak = north(1, 0.0);
        weak.signal = 10.0;
        let restored = tracker.restore_history("dev", vec![north(0, 0.0), weak, north(0, 0.0)]);
        assert_eq!(restored, 2);
        assert!(tracker.alerts().is_empty());

        // Already below threshold, so no falling edge on the next live fix
        let mut next = north(2, 0.0);
        next.signal = 12.0;
        assert!(alert_types(&tracker.ingest(next)).is_empty());
    }

    #[test]
    fn test_geofence_crud() {
        let mut tracker = make_tracker();
        assert!(tracker.add_geofence(hazard_fence()));
        assert!(!tracker.add_geofence(hazard_fence()));
        assert!(tracker.remove_geofence("gf-hz"));
        assert!(!tracker.remove_geofence("gf-hz"));
    }
}

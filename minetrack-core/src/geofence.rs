//! Geofence membership transitions between consecutive fixes.
//!
//! Membership is derived from the device's previous fix rather than a
//! separate latch, so an enter can only follow an outside fix and an exit
//! only an inside one. Two consecutive inside fixes never produce two enters.

use crate::geo::{distance_meters, offset_meters};
use crate::types::{Geofence, Position, ZoneType};

/// Direction of a membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crossing {
    Enter,
    Exit,
}

/// A crossing of one geofence by one device.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub crossing: Crossing,
    pub geofence: Geofence,
    pub distance_m: f64,
}

impl Geofence {
    /// Inside test; a fix exactly on the boundary counts as inside.
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        self.distance_to(lat, lng) <= self.radius_m
    }

    pub fn distance_to(&self, lat: f64, lng: f64) -> f64 {
        distance_meters(lat, lng, self.lat, self.lng)
    }
}

/// Compare `previous` and `current` against every active geofence.
///
/// With no previous fix nothing is emitted. Inactive fences are skipped.
pub fn detect_transitions(
    previous: Option<&Position>,
    current: &Position,
    fences: &[Geofence],
) -> Vec<Transition> {
    let mut out = Vec::new();

    for fence in fences.iter().filter(|f| f.active) {
        let was_inside = previous.is_some_and(|p| fence.contains(p.lat, p.lng));
        let distance_m = fence.distance_to(current.lat, current.lng);
        let is_inside = distance_m <= fence.radius_m;

        let crossing = match (previous.is_some(), was_inside, is_inside) {
            (false, _, _) => None,
            (true, true, false) if fence.alert_on_exit => Some(Crossing::Exit),
            (true, false, true) if fence.alert_on_enter => Some(Crossing::Enter),
            _ => None,
        };

        if let Some(crossing) = crossing {
            out.push(Transition {
                crossing,
                geofence: fence.clone(),
                distance_m,
            });
        }
    }

    out
}

/// Geofences laid out around the site reference point.
pub fn default_geofences(center_lat: f64, center_lng: f64) -> Vec<Geofence> {
    let layout: &[(&str, &str, ZoneType, f64, f64, f64, bool, bool)] = &[
        ("gf-refuge", "Refuge Chamber", ZoneType::Safe, 180.0, 200.0, 40.0, true, true),
        ("gf-blasting", "Blasting Area", ZoneType::Hazard, -420.0, 560.0, 60.0, true, true),
        ("gf-ore-pass", "Ore Pass", ZoneType::Restricted, -220.0, 350.0, 35.0, true, true),
        (
            "gf-assembly",
            "Assembly Point",
            ZoneType::EmergencyPoint,
            300.0,
            -250.0,
            50.0,
            true,
            false,
        ),
    ];

    layout
        .iter()
        .map(|(id, name, zone_type, north, east, radius, on_enter, on_exit)| {
            let (lat, lng) = offset_meters(center_lat, center_lng, *north, *east);
            Geofence {
                id: id.to_string(),
                name: name.to_string(),
                lat,
                lng,
                radius_m: *radius,
                active: true,
                alert_on_enter: *on_enter,
                alert_on_exit: *on_exit,
                zone_type: *zone_type,
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

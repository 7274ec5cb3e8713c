//! Zone labelling — which named area of the mine a fix belongs to.
//!
//! Zones never raise alerts; they only label positions. The layout is
//! generated once around a reference point (the site center, or the first fix
//! when no center is configured).

use crate::geo::{distance_meters, offset_meters};
use crate::types::{Zone, ZoneCategory};

/// Label for any position not near a known zone.
pub const SURFACE: &str = "Surface";

/// A fix within this many meters of a zone's primary reference belongs to it.
pub const ZONE_PROXIMITY_M: f64 = 100.0;

pub const ZONE_MAIN_SHAFT: &str = "Main Shaft";
pub const ZONE_LEVEL_1: &str = "Level 1 Tunnel";
pub const ZONE_LEVEL_2: &str = "Level 2 Tunnel";
pub const ZONE_EXTRACTION: &str = "Deep Extraction";
pub const ZONE_EMERGENCY_EXIT: &str = "Emergency Exit";
pub const ZONE_STATION: &str = "Surface Station";

/// Depth bands (exclusive lower bound, label), deepest first.
const DEPTH_BANDS: &[(f64, &str)] = &[
    (200.0, ZONE_EXTRACTION),
    (100.0, ZONE_LEVEL_2),
    (30.0, ZONE_LEVEL_1),
    (0.0, ZONE_MAIN_SHAFT),
];

/// Label of the first zone (in the given order) whose primary reference
/// coordinate lies within [`ZONE_PROXIMITY_M`], else [`SURFACE`].
///
/// Deliberately first-match rather than nearest: with overlapping zones the
/// caller's ordering decides.
pub fn resolve_zone(lat: f64, lng: f64, zones: &[Zone]) -> String {
    zones
        .iter()
        .find(|zone| match zone.primary() {
            Some((zlat, zlng)) => distance_meters(lat, lng, zlat, zlng) <= ZONE_PROXIMITY_M,
            None => false,
        })
        .map(|zone| zone.name.clone())
        .unwrap_or_else(|| SURFACE.to_string())
}

/// Zone label for a depth below surface, using fixed bands.
pub fn zone_for_depth(depth: f64) -> &'static str {
    DEPTH_BANDS
        .iter()
        .find(|(floor, _)| depth > *floor)
        .map(|(_, name)| *name)
        .unwrap_or(SURFACE)
}

/// Whether `label` is a configured zone name or [`SURFACE`].
pub fn is_known_label(label: &str, zones: &[Zone]) -> bool {
    label == SURFACE || zones.iter().any(|z| z.name == label)
}

/// Generate the mine layout around a reference point.
///
/// Offsets are (north, east) in meters from the reference; the first
/// coordinate of every zone is its primary reference.
pub fn generate_zones(center_lat: f64, center_lng: f64) -> Vec<Zone> {
    let layout: &[(&str, &str, ZoneCategory, f64, &[(f64, f64)])] = &[
        ("zone-shaft", ZONE_MAIN_SHAFT, ZoneCategory::Shaft, 15.0, &[(0.0, 150.0)]),
        (
            "zone-level-1",
            ZONE_LEVEL_1,
            ZoneCategory::Tunnel,
            50.0,
            &[(200.0, 150.0), (250.0, 250.0), (300.0, 350.0)],
        ),
        (
            "zone-level-2",
            ZONE_LEVEL_2,
            ZoneCategory::Tunnel,
            150.0,
            &[(-200.0, 300.0), (-250.0, 400.0)],
        ),
        (
            "zone-extraction",
            ZONE_EXTRACTION,
            ZoneCategory::Extraction,
            250.0,
            &[(-400.0, 500.0), (-450.0, 600.0), (-350.0, 650.0)],
        ),
        (
            "zone-emergency-exit",
            ZONE_EMERGENCY_EXIT,
            ZoneCategory::EmergencyExit,
            0.0,
            &[(300.0, -250.0)],
        ),
        ("zone-station", ZONE_STATION, ZoneCategory::Station, 0.0, &[(0.0, 0.0)]),
    ];

    layout
        .iter()
        .map(|(id, name, category, depth, offsets)| Zone {
            id: id.to_string(),
            name: name.to_string(),
            depth_level: *depth,
            coordinates: offsets
                .iter()
                .map(|(n, e)| offset_meters(center_lat, center_lng, *n, *e))
                .collect(),
            category: *category,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

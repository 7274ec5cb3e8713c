//! Shared types, error enum, and domain records for minetrack-core.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors produced by minetrack-core.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TrackError>;

/// Device identifier as issued by the fleet registry.
pub type DeviceId = String;

/// Epoch seconds.
pub type Timestamp = f64;

// ---------------------------------------------------------------------------
// Closed string enums
// ---------------------------------------------------------------------------

/// Implements `Display` and `FromStr` over the kebab-case wire names.
macro_rules! wire_enum {
    ($name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = TrackError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    _ => Err(TrackError::InvalidValue {
                        field: stringify!($name),
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceCategory {
    Vehicle,
    Personnel,
    Equipment,
    Drill,
}

wire_enum!(DeviceCategory {
    Vehicle => "vehicle",
    Personnel => "personnel",
    Equipment => "equipment",
    Drill => "drill",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceStatus {
    Operational,
    Breakdown,
    Maintenance,
    Emergency,
    Offline,
}

wire_enum!(DeviceStatus {
    Operational => "operational",
    Breakdown => "breakdown",
    Maintenance => "maintenance",
    Emergency => "emergency",
    Offline => "offline",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ZoneType {
    Safe,
    Restricted,
    Hazard,
    EmergencyPoint,
}

wire_enum!(ZoneType {
    Safe => "safe",
    Restricted => "restricted",
    Hazard => "hazard",
    EmergencyPoint => "emergency-point",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ZoneCategory {
    Tunnel,
    Shaft,
    Extraction,
    EmergencyExit,
    Station,
}

wire_enum!(ZoneCategory {
    Tunnel => "tunnel",
    Shaft => "shaft",
    Extraction => "extraction",
    EmergencyExit => "emergency-exit",
    Station => "station",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertType {
    ZoneEnter,
    ZoneExit,
    SignalLost,
    Emergency,
    Breakdown,
    LowBattery,
    Speeding,
    Offline,
}

wire_enum!(AlertType {
    ZoneEnter => "zone-enter",
    ZoneExit => "zone-exit",
    SignalLost => "signal-lost",
    Emergency => "emergency",
    Breakdown => "breakdown",
    LowBattery => "low-battery",
    Speeding => "speeding",
    Offline => "offline",
});

/// Alert priority, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

wire_enum!(AlertPriority {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A single observed or simulated fix. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub device_id: DeviceId,
    pub lat: f64,
    pub lng: f64,
    pub timestamp: Timestamp,
    pub speed_kmh: f64,
    pub heading: f64,
    pub altitude: f64,
    pub accuracy: f64,
    pub battery: f64,
    pub depth: f64,
    pub zone: String,
    pub signal: f64,
}

impl Position {
    /// Point-in-time copy of where this fix was taken.
    pub fn snapshot(&self) -> LocationSnapshot {
        LocationSnapshot {
            lat: self.lat,
            lng: self.lng,
            depth: self.depth,
        }
    }
}

/// A tracked asset. The last known position is looked up in the device's
/// history rather than stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub category: DeviceCategory,
    pub status: DeviceStatus,
    pub online: bool,
    pub last_seen: Option<Timestamp>,
}

impl Device {
    pub fn new(id: &str, name: &str, category: DeviceCategory) -> Self {
        Device {
            id: id.to_string(),
            name: name.to_string(),
            category,
            status: DeviceStatus::Operational,
            online: false,
            last_seen: None,
        }
    }
}

/// Circular region with enter/exit alerting policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub radius_m: f64,
    pub active: bool,
    pub alert_on_enter: bool,
    pub alert_on_exit: bool,
    pub zone_type: ZoneType,
}

/// Named, non-alerting reference area used to label where a device is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    pub depth_level: f64,
    /// Reference coordinates as `(lat, lng)`; the first entry is the primary.
    pub coordinates: Vec<(f64, f64)>,
    pub category: ZoneCategory,
}

impl Zone {
    pub fn primary(&self) -> Option<(f64, f64)> {
        self.coordinates.first().copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSnapshot {
    pub lat: f64,
    pub lng: f64,
    pub depth: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub alert_type: AlertType,
    pub message: String,
    pub timestamp: Timestamp,
    pub read: bool,
    pub device_id: DeviceId,
    pub geofence_id: Option<String>,
    pub priority: AlertPriority,
    pub location: Option<LocationSnapshot>,
}

impl Alert {
    /// Build an unread alert with a fresh identifier.
    pub fn new(
        alert_type: AlertType,
        priority: AlertPriority,
        device_id: &str,
        message: String,
        timestamp: Timestamp,
    ) -> Self {
        Alert {
            id: uuid::Uuid::new_v4().to_string(),
            alert_type,
            message,
            timestamp,
            read: false,
            device_id: device_id.to_string(),
            geofence_id: None,
            priority,
            location: None,
        }
    }

    pub fn with_geofence(mut self, geofence_id: &str) -> Self {
        self.geofence_id = Some(geofence_id.to_string());
        self
    }

    pub fn at(mut self, position: &Position) -> Self {
        self.location = Some(position.snapshot());
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

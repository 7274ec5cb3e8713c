//! Interfaces to the external producers: the live position source and the
//! realtime change feed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Alert, Device, Position, Timestamp};

/// A raw fix from a device's location sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub accuracy: f64,
    #[serde(default)]
    pub heading: f64,
    #[serde(default)]
    pub speed_kmh: f64,
    #[serde(default)]
    pub altitude: f64,
    pub timestamp: Timestamp,
    pub battery: Option<f64>,
    pub depth: Option<f64>,
    pub signal: Option<f64>,
}

/// Why the position source could not deliver a fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("position unavailable")]
    Unavailable,
    #[error("timed out waiting for a fix")]
    Timeout,
    #[error("unknown position source error")]
    Unknown,
}

impl SourceError {
    /// Classify a free-form error code reported by a source.
    pub fn classify(code: &str) -> SourceError {
        match code.to_ascii_lowercase().replace('_', "-").as_str() {
            "permission-denied" | "denied" | "1" => SourceError::PermissionDenied,
            "unavailable" | "position-unavailable" | "2" => SourceError::Unavailable,
            "timeout" | "3" => SourceError::Timeout,
            _ => SourceError::Unknown,
        }
    }
}

/// Source health as shown to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "lowercase")]
pub enum SourceStatus {
    #[default]
    Idle,
    Active,
    Failed(SourceError),
}

/// A record inserted into the persisted store, as delivered by the change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "record", rename_all = "lowercase")]
pub enum ChangeRecord {
    Position(Position),
    Alert(Alert),
    Device(Device),
}

impl ChangeRecord {
    pub fn device_id(&self) -> &str {
        match self {
            ChangeRecord::Position(p) => &p.device_id,
            ChangeRecord::Alert(a) => &a.device_id,
            ChangeRecord::Device(d) => &d.id,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(SourceError::classify("PERMISSION_DENIED"), SourceError::PermissionDenied);
        assert_eq!(SourceError::classify("2"), SourceError::Unavailable);
        assert_eq!(SourceError::classify("timeout"), SourceError::Timeout);
        assert_eq!(SourceError::classify("kaboom"), SourceError::Unknown);
    }

    #[test]
    fn test_fix_defaults() {
        let fix: Fix = serde_json::from_str(r#"{"lat": 1.0, "lng": 2.0, "timestamp": 3.0}"#).unwrap();
        assert_eq!(fix.speed_kmh, 0.0);
        assert!(fix.battery.is_none());
    }

    #[test]
    fn test_change_record_shape() {
        let json = r#"{"table":"device","record":{"id":"d1","name":"D1","category":"drill",
            "status":"breakdown","online":true,"last_seen":12.0}}"#;
        let rec: ChangeRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.device_id(), "d1");
        assert!(matches!(rec, ChangeRecord::Device(ref d) if d.status == crate::types::DeviceStatus::Breakdown));
    }

    #[test]
    fn test_status_serialization() {
        let s = serde_json::to_value(SourceStatus::Failed(SourceError::Timeout)).unwrap();
        assert_eq!(s["state"], "failed");
        assert_eq!(s["error"], "timeout");
    }
}

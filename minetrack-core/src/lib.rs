//! minetrack-core: Pure tracking library for an underground mine fleet.
//!
//! No async, no I/O beyond the config file: just geometry, history,
//! geofencing, alert rules, playback and simulation. The server crate wraps
//! this in an event loop with persistence and an HTTP API.

pub mod alerts;
pub mod config;
pub mod geo;
pub mod geofence;
pub mod history;
pub mod playback;
pub mod simulator;
pub mod source;
pub mod tracker;
pub mod types;
pub mod zones;

// Re-export commonly used types at crate root
pub use alerts::{AlertManager, EdgeDetector};
pub use history::HistoryStore;
pub use playback::{Playback, PlaybackState};
pub use simulator::{SimulatedDevice, Simulator};
pub use source::{ChangeRecord, Fix, SourceError, SourceStatus};
pub use tracker::{Snapshot, TrackEvent, TrackState, Tracker};
pub use types::*;

//! Configuration file management for minetrack.
//!
//! Reads/writes `~/.minetrack/config.yaml` with the site reference point,
//! database path, dashboard address, simulation and alert settings, plus the
//! optional webhook and change-feed URLs.

use std::path::PathBuf;

use crate::alerts::DEFAULT_SPEED_LIMIT_KMH;
use crate::simulator::{DEFAULT_SPEED_KMH, DEFAULT_TICK_SECS, MAX_TICK_SECS, MIN_TICK_SECS};
use crate::types::TrackError;

/// Seconds without a fix before a device is swept offline.
pub const DEFAULT_OFFLINE_AFTER_SECS: f64 = 60.0;

/// Reference point used when neither the config nor a live fix provides one.
pub const DEFAULT_SITE_CENTER: (f64, f64) = (-26.2041, 28.0473);

/// Full configuration structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub site: SiteConfig,
    pub database: DatabaseConfig,
    pub dashboard: DashboardConfig,
    pub simulation: SimulationConfig,
    pub alerts: AlertConfig,
    pub webhook: Option<String>,
    pub feed: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SiteConfig {
    pub name: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

impl SiteConfig {
    pub fn center(&self) -> Option<(f64, f64)> {
        self.lat.zip(self.lng)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub tick_secs: f64,
    pub speed_kmh: f64,
    pub seed: u64,
    pub autostart: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertConfig {
    pub speed_limit_kmh: f64,
    pub offline_after_secs: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            site: SiteConfig {
                name: "default".into(),
                lat: None,
                lng: None,
            },
            database: DatabaseConfig {
                path: "data/minetrack.db".into(),
            },
            dashboard: DashboardConfig {
                host: "127.0.0.1".into(),
                port: 8080,
            },
            simulation: SimulationConfig {
                tick_secs: DEFAULT_TICK_SECS,
                speed_kmh: DEFAULT_SPEED_KMH,
                seed: 42,
                autostart: false,
            },
            alerts: AlertConfig {
                speed_limit_kmh: DEFAULT_SPEED_LIMIT_KMH,
                offline_after_secs: DEFAULT_OFFLINE_AFTER_SECS,
            },
            webhook: None,
            feed: None,
        }
    }
}

/// Get the config directory path (`~/.minetrack/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".minetrack")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.minetrack/config.yaml`.
///
/// Returns default config if file doesn't exist.
pub fn load_config() -> Config {
    let path = config_file();
    if !path.exists() {
        return Config::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(text) => parse_config(&text),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unreadable config, using defaults");
            Config::default()
        }
    }
}

/// Save config to `~/.minetrack/config.yaml`.
pub fn save_config(config: &Config) -> Result<PathBuf, TrackError> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir).map_err(|e| TrackError::Config(e.to_string()))?;

    let path = config_file();
    let text = serialize_config(config);
    std::fs::write(&path, text).map_err(|e| TrackError::Config(e.to_string()))?;

    Ok(path)
}

/// Parse simple YAML-like config text. Unknown keys and unparsable values
/// keep their defaults.
pub fn parse_config(text: &str) -> Config {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for line in text.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');

        let Some((key, val)) = stripped.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let val = val.trim();

        if !is_indented {
            if val.is_empty() {
                current_section = Some(key.to_string());
            } else {
                current_section = None;
                match key {
                    "webhook" => config.webhook = parse_string_value(val),
                    "feed" => config.feed = parse_string_value(val),
                    _ => {}
                }
            }
            continue;
        }

        let Some(section) = current_section.as_deref() else {
            continue;
        };
        match (section, key) {
            ("site", "name") => {
                if let Some(v) = parse_string_value(val) {
                    config.site.name = v;
                }
            }
            ("site", "lat") => config.site.lat = parse_float_value(val),
            ("site", "lng") => config.site.lng = parse_float_value(val),
            ("database", "path") => {
                if let Some(v) = parse_string_value(val) {
                    config.database.path = v;
                }
            }
            ("dashboard", "host") => {
                if let Some(v) = parse_string_value(val) {
                    config.dashboard.host = v;
                }
            }
            ("dashboard", "port") => {
                if let Ok(v) = val.parse::<u16>() {
                    config.dashboard.port = v;
                }
            }
            ("simulation", "tick_secs") => {
                if let Some(v) = parse_float_value(val).filter(|v| (MIN_TICK_SECS..=MAX_TICK_SECS).contains(v)) {
                    config.simulation.tick_secs = v;
                }
            }
            ("simulation", "speed_kmh") => {
                if let Some(v) = parse_float_value(val).filter(|v| *v > 0.0) {
                    config.simulation.speed_kmh = v;
                }
            }
            ("simulation", "seed") => {
                if let Ok(v) = val.parse::<u64>() {
                    config.simulation.seed = v;
                }
            }
            ("simulation", "autostart") => {
                if let Ok(v) = val.parse::<bool>() {
                    config.simulation.autostart = v;
                }
            }
            ("alerts", "speed_limit_kmh") => {
                if let Some(v) = parse_float_value(val) {
                    config.alerts.speed_limit_kmh = v;
                }
            }
            ("alerts", "offline_after_secs") => {
                if let Some(v) = parse_float_value(val).filter(|v| *v > 0.0) {
                    config.alerts.offline_after_secs = v;
                }
            }
            _ => {}
        }
    }

    config
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    // Strip quotes
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

fn parse_float_value(val: &str) -> Option<f64> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    val.parse().ok().filter(|v: &f64| v.is_finite())
}

fn optional_float(v: Option<f64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| "null".into())
}

fn optional_string(v: &Option<String>) -> String {
    v.as_ref()
        .map(|s| format!("\"{s}\""))
        .unwrap_or_else(|| "null".into())
}

/// Serialize config to YAML-like text.
pub fn serialize_config(config: &Config) -> String {
    let lines = [
        "# minetrack configuration".to_string(),
        String::new(),
        "site:".into(),
        format!("  name: \"{}\"", config.site.name),
        format!("  lat: {}", optional_float(config.site.lat)),
        format!("  lng: {}", optional_float(config.site.lng)),
        String::new(),
        "database:".into(),
        format!("  path: \"{}\"", config.database.path),
        String::new(),
        "dashboard:".into(),
        format!("  host: \"{}\"", config.dashboard.host),
        format!("  port: {}", config.dashboard.port),
        String::new(),
        "simulation:".into(),
        format!("  tick_secs: {}", config.simulation.tick_secs),
        format!("  speed_kmh: {}", config.simulation.speed_kmh),
        format!("  seed: {}", config.simulation.seed),
        format!("  autostart: {}", config.simulation.autostart),
        String::new(),
        "alerts:".into(),
        format!("  speed_limit_kmh: {}", config.alerts.speed_limit_kmh),
        format!("  offline_after_secs: {}", config.alerts.offline_after_secs),
        String::new(),
        format!("webhook: {}", optional_string(&config.webhook)),
        format!("feed: {}", optional_string(&config.feed)),
    ];

    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

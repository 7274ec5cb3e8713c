//! SQLite persistence — WAL mode, three tables keyed by record id.
//!
//! Schema: devices, positions, alerts. Inserts are idempotent so change-feed
//! echoes and retries never duplicate rows. The engine talks to the store
//! through the async `Store` trait; `SqliteStore` runs the blocking
//! rusqlite calls on the blocking pool.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use thiserror::Error;

use minetrack_core::tracker::TrackEvent;
use minetrack_core::types::{Alert, Device, LocationSnapshot, Position};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS devices (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    category TEXT NOT NULL,
    status TEXT NOT NULL,
    online INTEGER NOT NULL DEFAULT 0,
    last_seen REAL
);

CREATE TABLE IF NOT EXISTS positions (
    id TEXT PRIMARY KEY,
    device_id TEXT NOT NULL,
    lat REAL NOT NULL,
    lng REAL NOT NULL,
    timestamp REAL NOT NULL,
    speed_kmh REAL NOT NULL,
    heading REAL NOT NULL,
    altitude REAL NOT NULL,
    accuracy REAL NOT NULL,
    battery REAL NOT NULL,
    depth REAL NOT NULL,
    zone TEXT NOT NULL,
    signal REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY,
    alert_type TEXT NOT NULL,
    message TEXT NOT NULL,
    timestamp REAL NOT NULL,
    read INTEGER NOT NULL DEFAULT 0,
    device_id TEXT NOT NULL,
    geofence_id TEXT,
    priority TEXT NOT NULL,
    lat REAL,
    lng REAL,
    depth REAL
);

CREATE INDEX IF NOT EXISTS idx_positions_device_ts ON positions(device_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_alerts_timestamp ON alerts(timestamp);
"#;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("store connection poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub devices: i64,
    pub positions: i64,
    pub alerts: i64,
}

// ---------------------------------------------------------------------------
// Async interface
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_position(&self, position: &Position) -> Result<(), StoreError>;
    async fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError>;
    async fn update_device(&self, device: &Device) -> Result<(), StoreError>;
    async fn mark_alert_read(&self, alert_id: &str) -> Result<(), StoreError>;
    /// Newest `limit` fixes for a device, oldest first.
    async fn load_history(&self, device_id: &str, limit: usize) -> Result<Vec<Position>, StoreError>;
    async fn load_devices(&self) -> Result<Vec<Device>, StoreError>;
    /// Newest `limit` alerts, newest first.
    async fn load_alerts(&self, limit: usize) -> Result<Vec<Alert>, StoreError>;
    async fn stats(&self) -> Result<StoreStats, StoreError>;
}

/// Persist a batch of tracker events. Failures are logged and skipped so a
/// broken store never stalls tracking.
pub async fn apply_events(store: &dyn Store, events: &[TrackEvent]) -> usize {
    let mut failed = 0;
    for event in events {
        let result = match event {
            TrackEvent::PositionRecorded(p) => store.insert_position(p).await,
            TrackEvent::AlertRaised(a) => store.insert_alert(a).await,
            TrackEvent::DeviceChanged(d) => store.update_device(d).await,
            TrackEvent::AlertDismissed(id) => store.mark_alert_read(id).await,
        };
        if let Err(e) = result {
            failed += 1;
            tracing::warn!(error = %e, "store write failed");
        }
    }
    failed
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

/// Synchronous SQLite handle.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: &str) -> rusqlite::Result<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    tracing::warn!(path, error = %e, "could not create database directory");
                }
            }
            Connection::open(path)?
        };

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Database { conn })
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> rusqlite::Result<Self> {
        Self::open(":memory:")
    }

    pub fn insert_position(&self, p: &Position) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO positions
             (id, device_id, lat, lng, timestamp, speed_kmh, heading, altitude,
              accuracy, battery, depth, zone, signal)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                p.id,
                p.device_id,
                p.lat,
                p.lng,
                p.timestamp,
                p.speed_kmh,
                p.heading,
                p.altitude,
                p.accuracy,
                p.battery,
                p.depth,
                p.zone,
                p.signal
            ],
        )?;
        self.conn.execute(
            "UPDATE devices SET last_seen = MAX(COALESCE(last_seen, ?2), ?2) WHERE id = ?1",
            params![p.device_id, p.timestamp],
        )?;
        Ok(())
    }

    /// Insert or refresh an alert; the read flag is the only field that changes.
    pub fn insert_alert(&self, a: &Alert) -> rusqlite::Result<()> {
        let (lat, lng, depth) = match a.location {
            Some(l) => (Some(l.lat), Some(l.lng), Some(l.depth)),
            None => (None, None, None),
        };
        self.conn.execute(
            "INSERT INTO alerts
             (id, alert_type, message, timestamp, read, device_id, geofence_id,
              priority, lat, lng, depth)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET read = excluded.read",
            params![
                a.id,
                a.alert_type.as_str(),
                a.message,
                a.timestamp,
                a.read,
                a.device_id,
                a.geofence_id,
                a.priority.as_str(),
                lat,
                lng,
                depth
            ],
        )?;
        Ok(())
    }

    pub fn update_device(&self, d: &Device) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO devices (id, name, category, status, online, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                category = excluded.category,
                status = excluded.status,
                online = excluded.online,
                last_seen = CASE
                    WHEN excluded.last_seen IS NULL THEN last_seen
                    WHEN last_seen IS NULL THEN excluded.last_seen
                    ELSE MAX(last_seen, excluded.last_seen)
                END",
            params![
                d.id,
                d.name,
                d.category.as_str(),
                d.status.as_str(),
                d.online,
                d.last_seen
            ],
        )?;
        Ok(())
    }

    pub fn mark_alert_read(&self, alert_id: &str) -> rusqlite::Result<()> {
        self.conn
            .execute("UPDATE alerts SET read = 1 WHERE id = ?1", params![alert_id])?;
        Ok(())
    }

    pub fn load_history(&self, device_id: &str, limit: usize) -> rusqlite::Result<Vec<Position>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, device_id, lat, lng, timestamp, speed_kmh, heading, altitude,
                    accuracy, battery, depth, zone, signal
             FROM positions WHERE device_id = ?1
             ORDER BY timestamp DESC, rowid DESC LIMIT ?2",
        )?;
        let mut rows = stmt
            .query_map(params![device_id, limit as i64], position_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.reverse();
        Ok(rows)
    }

    pub fn load_devices(&self) -> rusqlite::Result<Vec<Device>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, category, status, online, last_seen FROM devices ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Device {
                id: row.get(0)?,
                name: row.get(1)?,
                category: parse_column(row, 2)?,
                status: parse_column(row, 3)?,
                online: row.get(4)?,
                last_seen: row.get(5)?,
            })
        })?;
        rows.collect()
    }

    pub fn load_alerts(&self, limit: usize) -> rusqlite::Result<Vec<Alert>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, alert_type, message, timestamp, read, device_id, geofence_id,
                    priority, lat, lng, depth
             FROM alerts ORDER BY timestamp DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let lat: Option<f64> = row.get(8)?;
            let lng: Option<f64> = row.get(9)?;
            let depth: Option<f64> = row.get(10)?;
            Ok(Alert {
                id: row.get(0)?,
                alert_type: parse_column(row, 1)?,
                message: row.get(2)?,
                timestamp: row.get(3)?,
                read: row.get(4)?,
                device_id: row.get(5)?,
                geofence_id: row.get(6)?,
                priority: parse_column(row, 7)?,
                location: match (lat, lng) {
                    (Some(lat), Some(lng)) => Some(LocationSnapshot {
                        lat,
                        lng,
                        depth: depth.unwrap_or(0.0),
                    }),
                    _ => None,
                },
            })
        })?;
        rows.collect()
    }

    pub fn stats(&self) -> rusqlite::Result<StoreStats> {
        let count = |table: &str| -> rusqlite::Result<i64> {
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
        };
        Ok(StoreStats {
            devices: count("devices")?,
            positions: count("positions")?,
            alerts: count("alerts")?,
        })
    }
}

fn position_from_row(row: &Row<'_>) -> rusqlite::Result<Position> {
    Ok(Position {
        id: row.get(0)?,
        device_id: row.get(1)?,
        lat: row.get(2)?,
        lng: row.get(3)?,
        timestamp: row.get(4)?,
        speed_kmh: row.get(5)?,
        heading: row.get(6)?,
        altitude: row.get(7)?,
        accuracy: row.get(8)?,
        battery: row.get(9)?,
        depth: row.get(10)?,
        zone: row.get(11)?,
        signal: row.get(12)?,
    })
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = minetrack_core::TrackError>,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// `Store` over a single SQLite connection, driven from the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        Ok(SqliteStore {
            db: Arc::new(Mutex::new(Database::open(path)?)),
        })
    }

    async fn with_db<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> rusqlite::Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let db = db.lock().map_err(|_| StoreError::Poisoned)?;
            f(&db).map_err(StoreError::from)
        })
        .await?
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_position(&self, position: &Position) -> Result<(), StoreError> {
        let position = position.clone();
        self.with_db(move |db| db.insert_position(&position)).await
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        let alert = alert.clone();
        self.with_db(move |db| db.insert_alert(&alert)).await
    }

    async fn update_device(&self, device: &Device) -> Result<(), StoreError> {
        let device = device.clone();
        self.with_db(move |db| db.update_device(&device)).await
    }

    async fn mark_alert_read(&self, alert_id: &str) -> Result<(), StoreError> {
        let alert_id = alert_id.to_string();
        self.with_db(move |db| db.mark_alert_read(&alert_id)).await
    }

    async fn load_history(&self, device_id: &str, limit: usize) -> Result<Vec<Position>, StoreError> {
        let device_id = device_id.to_string();
        self.with_db(move |db| db.load_history(&device_id, limit)).await
    }

    async fn load_devices(&self) -> Result<Vec<Device>, StoreError> {
        self.with_db(|db| db.load_devices()).await
    }

    async fn load_alerts(&self, limit: usize) -> Result<Vec<Alert>, StoreError> {
        self.with_db(move |db| db.load_alerts(limit)).await
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.with_db(|db| db.stats()).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

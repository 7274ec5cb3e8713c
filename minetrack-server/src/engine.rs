//! Event-processing loop.
//!
//! One task owns the `Tracker` and the `Simulator`. HTTP handlers, the change
//! feed and the tickers send `Command`s over a bounded channel and the loop
//! applies them strictly one at a time, so every fix is a single
//! previous→current transition per device. After each command a fresh
//! snapshot is published on a `watch` channel for readers.
//!
//! Tickers (simulation, playback, offline sweep) are spawned tasks that only
//! send commands. Each carries a generation number; a tick whose generation no
//! longer matches the live ticker is dropped, so a stop/start never replays
//! stale progress.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use minetrack_core::config::{Config, DEFAULT_SITE_CENTER};
use minetrack_core::simulator::{default_fleet, Simulator, DEFAULT_TICK_SECS};
use minetrack_core::source::{ChangeRecord, Fix, SourceStatus};
use minetrack_core::tracker::{Snapshot, TrackEvent, TrackSnapshot, Tracker};
use minetrack_core::types::{Alert, Device, DeviceId, Geofence, Position, Timestamp};

use crate::notification::WebhookDispatcher;
use crate::store::{self, Store};

/// Interval of the offline sweep.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Shortest period a ticker may run at.
const MIN_TICKER_PERIOD: Duration = Duration::from_millis(1);

const COMMAND_BUFFER: usize = 1024;

fn now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// State changes producers may request.
#[derive(Debug, Clone)]
pub enum Action {
    IngestFix { device_id: DeviceId, fix: Fix },
    IngestPosition(Position),
    Record(ChangeRecord),
    SourceStatus(SourceStatus),
    Emergency(DeviceId),
    Breakdown(DeviceId),
    ClearEmergency(DeviceId),
    DismissAlert(String),
    DismissAllAlerts,
    Playback { device_id: DeviceId, action: PlaybackAction },
    SimulationStart,
    SimulationStop,
    AddGeofence(Geofence),
    RemoveGeofence(String),
    SetGeofenceActive { geofence_id: String, active: bool },
    RegisterDevice(Device),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackAction {
    Play,
    Stop,
    Seek(i64),
    Speed(f64),
    Live,
}

enum Command {
    Act {
        action: Action,
        reply: Option<oneshot::Sender<bool>>,
    },
    Track {
        device_id: DeviceId,
        reply: oneshot::Sender<Option<TrackSnapshot>>,
    },
    SimulationTick {
        generation: u64,
    },
    PlaybackTick {
        device_id: DeviceId,
        generation: u64,
    },
    SweepOffline,
}

// ---------------------------------------------------------------------------
// Published view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationView {
    pub running: bool,
    pub tick_secs: f64,
    pub devices: Vec<DeviceId>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineSnapshot {
    #[serde(flatten)]
    pub tracking: Snapshot,
    pub simulation: SimulationView,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
#[error("engine stopped")]
pub struct EngineClosed;

/// Cheap, cloneable entry point into the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
    snapshot: watch::Receiver<Arc<EngineSnapshot>>,
}

impl EngineHandle {
    /// Apply an action and wait for the outcome. `false` means the action was
    /// a no-op (unknown device, alert or geofence) or the engine is gone.
    pub async fn act(&self, action: Action) -> bool {
        let (reply, rx) = oneshot::channel();
        let command = Command::Act {
            action,
            reply: Some(reply),
        };
        if self.tx.send(command).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Queue an action without waiting for it to be applied.
    pub async fn send(&self, action: Action) -> Result<(), EngineClosed> {
        self.tx
            .send(Command::Act {
                action,
                reply: None,
            })
            .await
            .map_err(|_| EngineClosed)
    }

    /// Full history and playback view for one device.
    pub async fn track(&self, device_id: &str) -> Option<TrackSnapshot> {
        let (reply, rx) = oneshot::channel();
        let command = Command::Track {
            device_id: device_id.to_string(),
            reply,
        };
        self.tx.send(command).await.ok()?;
        rx.await.ok().flatten()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<EngineSnapshot> {
        self.snapshot.borrow().clone()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// A running ticker; dropping it cancels the task.
struct Ticker {
    generation: u64,
    token: CancellationToken,
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

pub struct Engine {
    tracker: Tracker,
    simulator: Simulator,
    vehicle_speed_kmh: f64,
    tx: mpsc::Sender<Command>,
    rx: mpsc::Receiver<Command>,
    snapshot_tx: watch::Sender<Arc<EngineSnapshot>>,
    persist: Option<mpsc::UnboundedSender<TrackEvent>>,
    webhook: Option<WebhookDispatcher>,
    sim_ticker: Option<Ticker>,
    playback_tickers: HashMap<DeviceId, Ticker>,
    next_generation: u64,
    shutdown: CancellationToken,
}

impl Engine {
    pub fn new(config: &Config, shutdown: CancellationToken) -> (Engine, EngineHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(EngineSnapshot::default()));

        let engine = Engine {
            tracker: Tracker::from_config(config),
            simulator: Simulator::new(config.simulation.tick_secs, config.simulation.seed),
            vehicle_speed_kmh: config.simulation.speed_kmh,
            tx: tx.clone(),
            rx,
            snapshot_tx,
            persist: None,
            webhook: None,
            sim_ticker: None,
            playback_tickers: HashMap::new(),
            next_generation: 0,
            shutdown,
        };
        engine.publish();

        let handle = EngineHandle {
            tx,
            snapshot: snapshot_rx,
        };
        (engine, handle)
    }

    /// Forward every track event to a background writer. Must be called
    /// inside a tokio runtime.
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<TrackEvent>();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                store::apply_events(store.as_ref(), std::slice::from_ref(&event)).await;
            }
        });
        self.persist = Some(tx);
        self
    }

    pub fn with_webhook(mut self, webhook: WebhookDispatcher) -> Self {
        self.webhook = Some(webhook);
        self
    }

    /// Seed state from the persisted store before the loop starts.
    pub fn restore(&mut self, devices: Vec<Device>, histories: Vec<(DeviceId, Vec<Position>)>, alerts: Vec<Alert>) {
        for mut device in devices {
            device.online = false;
            self.tracker.apply_device_record(device);
        }
        let mut restored = 0;
        for (device_id, positions) in histories {
            restored += self.tracker.restore_history(&device_id, positions);
        }
        // Stored newest first; the alert list prepends.
        for alert in alerts.into_iter().rev() {
            self.tracker.apply_alert_record(alert);
        }
        tracing::info!(positions = restored, "restored persisted state");
        self.publish();
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until the shutdown token fires.
    pub async fn run(mut self) {
        let _sweep = self.spawn_ticker(SWEEP_INTERVAL, |_| Command::SweepOffline);
        self.publish();
        tracing::info!("engine started");

        loop {
            let command = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                command = self.rx.recv() => match command {
                    Some(c) => c,
                    None => break,
                },
            };
            self.handle(command);
        }

        self.sim_ticker = None;
        self.playback_tickers.clear();
        tracing::info!("engine stopped");
    }

    fn handle(&mut self, command: Command) {
        let reply = match command {
            Command::Act { action, reply } => {
                let applied = self.apply(action);
                reply.map(|reply| (reply, applied))
            }
            Command::Track { device_id, reply } => {
                let _ = reply.send(self.tracker.track_snapshot(&device_id));
                return;
            }
            Command::SimulationTick { generation } => {
                self.on_simulation_tick(generation);
                None
            }
            Command::PlaybackTick {
                device_id,
                generation,
            } => {
                self.on_playback_tick(&device_id, generation);
                None
            }
            Command::SweepOffline => {
                let events = self.tracker.sweep_offline(now());
                self.emit(events);
                None
            }
        };
        // Publish first so a caller awaiting the reply reads the new state.
        self.publish();
        if let Some((reply, applied)) = reply {
            let _ = reply.send(applied);
        }
    }

    fn apply(&mut self, action: Action) -> bool {
        match action {
            Action::IngestFix { device_id, fix } => {
                let events = self.tracker.ingest_fix(&device_id, &fix);
                self.emit_nonempty(events)
            }
            Action::IngestPosition(position) => {
                let events = self.tracker.ingest(position);
                self.emit_nonempty(events)
            }
            Action::Record(ChangeRecord::Position(position)) => {
                // Already persisted upstream; only the alerts it raises are new.
                let before = self.tracker.positions_ingested;
                let events: Vec<_> = self
                    .tracker
                    .ingest(position)
                    .into_iter()
                    .filter(|e| !matches!(e, TrackEvent::PositionRecorded(_)))
                    .collect();
                let applied = self.tracker.positions_ingested > before;
                self.emit(events);
                applied
            }
            Action::Record(ChangeRecord::Alert(alert)) => self.tracker.apply_alert_record(alert),
            Action::Record(ChangeRecord::Device(device)) => self.tracker.apply_device_record(device),
            Action::SourceStatus(status) => {
                if let SourceStatus::Failed(error) = status {
                    tracing::warn!(%error, "position source failed");
                }
                self.tracker.set_source_status(status);
                true
            }
            Action::Emergency(device_id) => {
                let events = self.tracker.trigger_emergency(&device_id, now());
                self.emit_nonempty(events)
            }
            Action::Breakdown(device_id) => {
                let events = self.tracker.report_breakdown(&device_id, now());
                self.emit_nonempty(events)
            }
            Action::ClearEmergency(device_id) => {
                let events = self.tracker.clear_emergency(&device_id);
                self.emit_nonempty(events)
            }
            Action::DismissAlert(alert_id) => {
                let events = self.tracker.dismiss_alert(&alert_id);
                self.emit_nonempty(events)
            }
            Action::DismissAllAlerts => {
                let events = self.tracker.dismiss_all_alerts();
                self.emit_nonempty(events)
            }
            Action::Playback { device_id, action } => self.apply_playback(&device_id, action),
            Action::SimulationStart => self.start_simulation(),
            Action::SimulationStop => self.stop_simulation(),
            Action::AddGeofence(geofence) => self.tracker.add_geofence(geofence),
            Action::RemoveGeofence(geofence_id) => self.tracker.remove_geofence(&geofence_id),
            Action::SetGeofenceActive {
                geofence_id,
                active,
            } => self.tracker.set_geofence_active(&geofence_id, active),
            Action::RegisterDevice(device) => match self.tracker.register_device(device) {
                Some(event) => {
                    self.emit(vec![event]);
                    true
                }
                None => false,
            },
        }
    }

    // -- simulation ----------------------------------------------------------

    fn start_simulation(&mut self) -> bool {
        let (lat, lng) = self.tracker.center().unwrap_or(DEFAULT_SITE_CENTER);
        self.tracker.ensure_layout(lat, lng);

        let fleet = default_fleet(lat, lng, self.vehicle_speed_kmh);
        let registered: Vec<_> = fleet
            .iter()
            .filter_map(|d| {
                self.tracker
                    .register_device(Device::new(&d.device_id, &d.name, d.category))
            })
            .collect();
        self.emit(registered);

        let started = self.simulator.start(&fleet);
        if self.sim_ticker.is_none() {
            let period = Duration::try_from_secs_f64(self.simulator.tick_secs)
                .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_TICK_SECS));
            self.sim_ticker = Some(self.spawn_ticker(period, |generation| Command::SimulationTick { generation }));
        }
        tracing::info!(started, running = self.simulator.running_devices().len(), "simulation started");
        true
    }

    fn stop_simulation(&mut self) -> bool {
        let was_running = self.simulator.is_running();
        self.simulator.stop();
        self.sim_ticker = None;
        if was_running {
            tracing::info!("simulation stopped");
        }
        was_running
    }

    fn on_simulation_tick(&mut self, generation: u64) {
        if self.sim_ticker.as_ref().map(|t| t.generation) != Some(generation) {
            tracing::debug!(generation, "stale simulation tick ignored");
            return;
        }
        let mut events = Vec::new();
        for position in self.simulator.step(now()) {
            events.extend(self.tracker.ingest(position));
        }
        self.emit(events);
    }

    // -- playback ------------------------------------------------------------

    fn apply_playback(&mut self, device_id: &str, action: PlaybackAction) -> bool {
        let result = match action {
            PlaybackAction::Play => self.tracker.playback_start(device_id),
            PlaybackAction::Stop => self.tracker.playback_stop(device_id),
            PlaybackAction::Seek(index) => self.tracker.playback_seek(device_id, index),
            PlaybackAction::Speed(multiplier) => self.tracker.playback_set_speed(device_id, multiplier),
            PlaybackAction::Live => self.tracker.playback_go_live(device_id),
        };
        let Some(playback) = result else {
            return false;
        };

        let restart = matches!(action, PlaybackAction::Play | PlaybackAction::Speed(_))
            || !self.playback_tickers.contains_key(device_id);
        if !playback.is_playing() {
            self.playback_tickers.remove(device_id);
        } else if restart {
            let id = device_id.to_string();
            let ticker = self.spawn_ticker(playback.tick_interval(), move |generation| Command::PlaybackTick {
                device_id: id.clone(),
                generation,
            });
            self.playback_tickers.insert(device_id.to_string(), ticker);
        }
        true
    }

    fn on_playback_tick(&mut self, device_id: &str, generation: u64) {
        if self.playback_tickers.get(device_id).map(|t| t.generation) != Some(generation) {
            return;
        }
        if !self.tracker.playback_tick(device_id) {
            self.playback_tickers.remove(device_id);
        }
    }

    // -- plumbing ------------------------------------------------------------

    fn spawn_ticker<F>(&mut self, period: Duration, make: F) -> Ticker
    where
        F: Fn(u64) -> Command + Send + 'static,
    {
        let period = period.max(MIN_TICKER_PERIOD);
        self.next_generation += 1;
        let generation = self.next_generation;
        let token = self.shutdown.child_token();
        let cancel = token.clone();
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if tx.send(make(generation)).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ticker { generation, token }
    }

    fn emit_nonempty(&self, events: Vec<TrackEvent>) -> bool {
        let applied = !events.is_empty();
        self.emit(events);
        applied
    }

    fn emit(&self, events: Vec<TrackEvent>) {
        for event in events {
            if let TrackEvent::AlertRaised(alert) = &event {
                tracing::info!(
                    device = %alert.device_id,
                    kind = %alert.alert_type,
                    priority = %alert.priority,
                    "{}",
                    alert.message
                );
                if let Some(webhook) = &self.webhook {
                    let name = self
                        .tracker
                        .device(&alert.device_id)
                        .map(|d| d.name.as_str())
                        .unwrap_or(alert.device_id.as_str());
                    webhook.notify(alert, name);
                }
            }
            if let Some(persist) = &self.persist {
                if persist.send(event).is_err() {
                    tracing::warn!("store writer gone, dropping event");
                }
            }
        }
    }

    fn publish(&self) {
        let snapshot = EngineSnapshot {
            tracking: self.tracker.snapshot(),
            simulation: SimulationView {
                running: self.simulator.is_running(),
                tick_secs: self.simulator.tick_secs,
                devices: self.simulator.running_devices(),
            },
        };
        self.snapshot_tx.send_replace(Arc::new(snapshot));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use minetrack_core::playback::PlaybackState;
    use minetrack_core::types::{AlertType, DeviceStatus};

    use crate::store::SqliteStore;

    fn test_engine() -> (Engine, EngineHandle) {
        Engine::new(&Config::default(), CancellationToken::new())
    }

    fn position(device: &str, seq: usize) -> Position {
        let (lat, lng) = DEFAULT_SITE_CENTER;
        Position {
            id: format!("{device}-{seq}"),
            device_id: device.into(),
            lat,
            lng,
            timestamp: now() + seq as f64,
            speed_kmh: 5.0,
            heading: 0.0,
            altitude: 0.0,
            accuracy: 3.0,
            battery: 90.0,
            depth: 0.0,
            zone: "Surface".into(),
            signal: 80.0,
        }
    }

    fn sim_generation(engine: &Engine) -> u64 {
        engine.sim_ticker.as_ref().map(|t| t.generation).unwrap()
    }

    #[tokio::test]
    async fn test_simulation_tick_ingests_fleet() {
        let (mut engine, handle) = test_engine();
        assert!(engine.apply(Action::SimulationStart));
        let generation = sim_generation(&engine);

        engine.handle(Command::SimulationTick { generation });
        assert_eq!(engine.tracker.positions_ingested, 4);

        let snap = handle.snapshot();
        assert!(snap.simulation.running);
        assert_eq!(snap.tracking.devices.len(), 4);
        assert!(snap.tracking.devices.iter().all(|d| d.device.online));
    }

    #[tokio::test]
    async fn test_simulation_start_is_idempotent() {
        let (mut engine, _handle) = test_engine();
        engine.apply(Action::SimulationStart);
        let generation = sim_generation(&engine);
        engine.apply(Action::SimulationStart);
        assert_eq!(sim_generation(&engine), generation);
        assert_eq!(engine.simulator.running_devices().len(), 4);
    }

    #[tokio::test]
    async fn test_stale_simulation_tick_ignored() {
        let (mut engine, _handle) = test_engine();
        engine.apply(Action::SimulationStart);
        let old = sim_generation(&engine);
        assert!(engine.apply(Action::SimulationStop));
        assert!(!engine.apply(Action::SimulationStop));

        engine.handle(Command::SimulationTick { generation: old });
        assert_eq!(engine.tracker.positions_ingested, 0);

        engine.apply(Action::SimulationStart);
        engine.handle(Command::SimulationTick { generation: old });
        assert_eq!(engine.tracker.positions_ingested, 0);
        let current = sim_generation(&engine);
        engine.handle(Command::SimulationTick { generation: current });
        assert_eq!(engine.tracker.positions_ingested, 4);
    }

    #[tokio::test]
    async fn test_playback_ticker_runs_to_end() {
        let (mut engine, _handle) = test_engine();
        for i in 0..3 {
            engine.apply(Action::IngestPosition(position("haul-07", i)));
        }
        let play = Action::Playback {
            device_id: "haul-07".into(),
            action: PlaybackAction::Play,
        };
        assert!(engine.apply(play));
        let generation = engine.playback_tickers["haul-07"].generation;

        for _ in 0..5 {
            engine.handle(Command::PlaybackTick {
                device_id: "haul-07".into(),
                generation,
            });
        }
        assert!(!engine.playback_tickers.contains_key("haul-07"));
        let track = engine.tracker.track("haul-07").unwrap();
        assert_eq!(track.playback.state, PlaybackState::Paused { cursor: 2 });
    }

    #[tokio::test]
    async fn test_playback_speed_restarts_ticker() {
        let (mut engine, _handle) = test_engine();
        engine.apply(Action::IngestPosition(position("haul-07", 0)));
        engine.apply(Action::IngestPosition(position("haul-07", 1)));
        engine.apply(Action::Playback {
            device_id: "haul-07".into(),
            action: PlaybackAction::Play,
        });
        let first = engine.playback_tickers["haul-07"].generation;
        engine.apply(Action::Playback {
            device_id: "haul-07".into(),
            action: PlaybackAction::Speed(4.0),
        });
        let second = engine.playback_tickers["haul-07"].generation;
        assert_ne!(first, second);

        // Old ticker's ticks are dropped
        engine.handle(Command::PlaybackTick {
            device_id: "haul-07".into(),
            generation: first,
        });
        assert_eq!(engine.tracker.track("haul-07").unwrap().playback.cursor(), Some(0));

        assert!(!engine.apply(Action::Playback {
            device_id: "ghost".into(),
            action: PlaybackAction::Play,
        }));
    }

    #[tokio::test]
    async fn test_extreme_playback_speed_keeps_ticker() {
        use minetrack_core::playback::{MAX_SPEED, MIN_SPEED};

        let (mut engine, _handle) = test_engine();
        for seq in 0..3 {
            engine.apply(Action::IngestPosition(position("haul-07", seq)));
        }
        engine.apply(Action::Playback {
            device_id: "haul-07".into(),
            action: PlaybackAction::Play,
        });

        assert!(engine.apply(Action::Playback {
            device_id: "haul-07".into(),
            action: PlaybackAction::Speed(1e-300),
        }));
        assert_eq!(engine.tracker.track("haul-07").unwrap().playback.speed, MIN_SPEED);
        assert!(engine.playback_tickers.contains_key("haul-07"));

        assert!(engine.apply(Action::Playback {
            device_id: "haul-07".into(),
            action: PlaybackAction::Speed(1e12),
        }));
        assert_eq!(engine.tracker.track("haul-07").unwrap().playback.speed, MAX_SPEED);
        assert!(engine.playback_tickers.contains_key("haul-07"));

        // Non-positive multipliers leave the speed alone
        engine.apply(Action::Playback {
            device_id: "haul-07".into(),
            action: PlaybackAction::Speed(0.0),
        });
        assert_eq!(engine.tracker.track("haul-07").unwrap().playback.speed, MAX_SPEED);
    }

    #[tokio::test]
    async fn test_unusable_tick_secs_still_simulates() {
        use minetrack_core::simulator::MIN_TICK_SECS;

        for (tick_secs, expected) in [(f64::INFINITY, DEFAULT_TICK_SECS), (1e-12, MIN_TICK_SECS)] {
            let mut config = Config::default();
            config.simulation.tick_secs = tick_secs;
            let (mut engine, _handle) = Engine::new(&config, CancellationToken::new());
            assert_eq!(engine.simulator.tick_secs, expected);
            assert!(engine.apply(Action::SimulationStart));
            assert!(engine.sim_ticker.is_some());
        }
    }

    #[tokio::test]
    async fn test_change_feed_echo_dropped() {
        let (mut engine, _handle) = test_engine();
        let p = position("lhd-02", 0);
        engine.apply(Action::IngestPosition(p.clone()));
        engine.apply(Action::Record(ChangeRecord::Position(p)));
        assert_eq!(engine.tracker.positions_ingested, 1);
        assert_eq!(engine.tracker.duplicates_dropped, 1);
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let shutdown = CancellationToken::new();
        let (engine, handle) = Engine::new(&Config::default(), shutdown.clone());
        let task = engine.spawn();

        assert!(!handle.act(Action::Emergency("boss-01".into())).await);
        assert!(handle.act(Action::IngestPosition(position("boss-01", 0))).await);
        assert!(handle.act(Action::Emergency("boss-01".into())).await);

        let snap = handle.snapshot();
        assert_eq!(snap.tracking.devices[0].device.status, DeviceStatus::Emergency);
        assert_eq!(snap.tracking.alerts[0].alert_type, AlertType::Emergency);

        let track = handle.track("boss-01").await.unwrap();
        assert_eq!(track.history.len(), 1);
        assert!(handle.track("ghost").await.is_none());

        shutdown.cancel();
        task.await.unwrap();
        assert!(!handle.act(Action::DismissAllAlerts).await);
    }

    #[tokio::test]
    async fn test_events_reach_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.db");
        let store = Arc::new(SqliteStore::open(path.to_str().unwrap()).unwrap());

        let (engine, _handle) = test_engine();
        let mut engine = engine.with_store(store.clone());
        engine.apply(Action::IngestPosition(position("drill-03", 0)));

        let mut stats = store.stats().await.unwrap();
        for _ in 0..100 {
            if stats.positions == 1 && stats.devices == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            stats = store.stats().await.unwrap();
        }
        assert_eq!(stats.positions, 1);
        assert_eq!(stats.devices, 1);
    }

    #[tokio::test]
    async fn test_dismissal_and_last_seen_reach_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.db");
        let store = Arc::new(SqliteStore::open(path.to_str().unwrap()).unwrap());

        let (engine, _handle) = test_engine();
        let mut engine = engine.with_store(store.clone());
        engine.apply(Action::IngestPosition(position("drill-03", 0)));
        let latest = position("drill-03", 1);
        let latest_ts = latest.timestamp;
        engine.apply(Action::IngestPosition(latest));
        assert!(engine.apply(Action::Breakdown("drill-03".into())));
        assert!(engine.apply(Action::DismissAllAlerts));
        assert!(!engine.apply(Action::DismissAllAlerts));

        async fn persisted(store: &SqliteStore, latest_ts: Timestamp) -> bool {
            let alerts = store.load_alerts(10).await.unwrap();
            let devices = store.load_devices().await.unwrap();
            let read = alerts.len() == 1 && alerts[0].read;
            let seen = devices.first().and_then(|d| d.last_seen) == Some(latest_ts);
            read && seen
        }

        let mut done = persisted(&store, latest_ts).await;
        for _ in 0..100 {
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            done = persisted(&store, latest_ts).await;
        }
        assert!(done);
    }

    #[tokio::test]
    async fn test_restore_from_store_rows() {
        let (mut engine, _handle) = test_engine();
        let mut device = Device::new("haul-07", "Haul Truck 07", minetrack_core::DeviceCategory::Vehicle);
        device.online = true;
        let history = vec![position("haul-07", 0), position("haul-07", 1)];
        let older = Alert::new(AlertType::Offline, minetrack_core::AlertPriority::High, "haul-07", "a".into(), 1.0);
        let newer = Alert::new(AlertType::Speeding, minetrack_core::AlertPriority::Medium, "haul-07", "b".into(), 2.0);

        engine.restore(vec![device], vec![("haul-07".into(), history)], vec![newer.clone(), older]);

        let snap = engine.snapshot_tx.borrow().clone();
        assert!(!snap.tracking.devices[0].device.online);
        assert_eq!(snap.tracking.devices[0].history_len, 2);
        assert_eq!(snap.tracking.alerts[0].id, newer.id);
    }
}

//! minetrack: CLI + tracking server for an underground mine fleet.

use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use comfy_table::{Cell, Table};
use tokio_util::sync::CancellationToken;

use minetrack_core::alerts::ALERT_CAPACITY;
use minetrack_core::config::{self, Config, DEFAULT_SITE_CENTER};
use minetrack_core::history::HISTORY_CAPACITY;
use minetrack_core::simulator::{default_fleet, Simulator};
use minetrack_core::tracker::Tracker;
use minetrack_core::types::*;

mod engine;
mod feed;
mod notification;
mod store;
mod web;

use engine::{Action, Engine};
use notification::WebhookDispatcher;
use store::{SqliteStore, Store};

#[derive(Parser)]
#[command(name = "minetrack", version, about = "Mine fleet position tracking and alerting")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tracking engine and REST API
    Serve(ServeArgs),

    /// Run the simulated fleet headless and print where it ended up
    Simulate {
        /// Number of simulation ticks to run
        #[arg(short, long, default_value = "60")]
        ticks: u32,

        /// Seed for the simulator's jitter
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Print a device's stored track
    Replay {
        /// Device id
        device: String,

        /// SQLite database path
        #[arg(long, env = "MINETRACK_DB")]
        db_path: Option<String>,

        /// Maximum number of fixes to print (most recent)
        #[arg(long, default_value_t = HISTORY_CAPACITY)]
        limit: usize,
    },

    /// Write the effective config to ~/.minetrack/config.yaml
    Init {
        /// Site reference latitude
        #[arg(long, allow_hyphen_values = true)]
        lat: Option<f64>,

        /// Site reference longitude
        #[arg(long, allow_hyphen_values = true)]
        lng: Option<f64>,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Show database statistics
    Stats {
        /// SQLite database path
        #[arg(long, env = "MINETRACK_DB")]
        db_path: Option<String>,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// Listen address
    #[arg(long, env = "MINETRACK_HOST")]
    host: Option<String>,

    /// Listen port
    #[arg(short, long, env = "MINETRACK_PORT")]
    port: Option<u16>,

    /// SQLite database path
    #[arg(long, env = "MINETRACK_DB")]
    db_path: Option<String>,

    /// Run without persistence
    #[arg(long)]
    no_db: bool,

    /// POST alerts to this URL
    #[arg(long, env = "MINETRACK_WEBHOOK")]
    webhook: Option<String>,

    /// Only notify alerts at or above this priority
    #[arg(long, default_value = "high")]
    webhook_priority: String,

    /// Change-feed WebSocket URL
    #[arg(long, env = "MINETRACK_FEED")]
    feed: Option<String>,

    /// Start the simulated fleet on launch
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "minetrack=info,minetrack_core=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load_config();

    match cli.command {
        Commands::Serve(args) => cmd_serve(config, args).await,
        Commands::Simulate { ticks, seed } => cmd_simulate(&config, ticks, seed),
        Commands::Replay {
            device,
            db_path,
            limit,
        } => cmd_replay(&db_path.unwrap_or(config.database.path), &device, limit),
        Commands::Init { lat, lng, force } => cmd_init(config, lat, lng, force),
        Commands::Stats { db_path } => cmd_stats(&db_path.unwrap_or(config.database.path)),
    }
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

fn cmd_init(mut config: Config, lat: Option<f64>, lng: Option<f64>, force: bool) {
    let path = config::config_file();
    if path.exists() && !force {
        eprintln!("{} already exists (use --force to overwrite)", path.display());
        std::process::exit(1);
    }

    if lat.is_some() {
        config.site.lat = lat;
    }
    if lng.is_some() {
        config.site.lng = lng;
    }

    match config::save_config(&config) {
        Ok(path) => println!("Wrote {}", path.display()),
        Err(e) => {
            eprintln!("Error writing config: {e}");
            std::process::exit(1);
        }
    }
}

// ---------------------------------------------------------------------------
// serve
// ---------------------------------------------------------------------------

async fn cmd_serve(mut config: Config, args: ServeArgs) {
    if let Some(host) = args.host {
        config.dashboard.host = host;
    }
    if let Some(port) = args.port {
        config.dashboard.port = port;
    }
    if let Some(path) = args.db_path {
        config.database.path = path;
    }
    if args.webhook.is_some() {
        config.webhook = args.webhook;
    }
    if args.feed.is_some() {
        config.feed = args.feed;
    }
    if args.simulate {
        config.simulation.autostart = true;
    }

    let shutdown = CancellationToken::new();

    // Persistence is best-effort: a store that will not open leaves the
    // server running in memory.
    let store: Option<Arc<dyn Store>> = if args.no_db {
        None
    } else {
        match SqliteStore::open(&config.database.path) {
            Ok(s) => {
                tracing::info!(path = %config.database.path, "database opened");
                Some(Arc::new(s))
            }
            Err(e) => {
                tracing::warn!(path = %config.database.path, error = %e, "database unavailable, running in memory");
                None
            }
        }
    };

    let (mut engine, handle) = Engine::new(&config, shutdown.clone());
    if let Some(store) = &store {
        restore(&mut engine, store.as_ref()).await;
        engine = engine.with_store(store.clone());
    }
    if let Some(url) = &config.webhook {
        let min_priority = args.webhook_priority.parse::<AlertPriority>().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "bad webhook priority, using high");
            AlertPriority::High
        });
        engine = engine.with_webhook(WebhookDispatcher::new(url).with_min_priority(min_priority));
        tracing::info!(url = %url, "webhook notifications enabled");
    }
    let engine_task = engine.spawn();

    if config.simulation.autostart && handle.send(Action::SimulationStart).await.is_err() {
        tracing::error!("engine stopped before the simulation could start");
    }

    if let Some(url) = config.feed.clone() {
        let (engine, cancel) = (handle.clone(), shutdown.clone());
        tokio::spawn(async move {
            match feed::run(&url, engine, cancel).await {
                Ok(stats) => tracing::info!(records = stats.records, malformed = stats.malformed, "change feed ended"),
                Err(e) => tracing::error!(error = %e, "change feed failed"),
            }
        });
    }

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down");
        }
        ctrl_c.cancel();
    });

    let state = Arc::new(web::AppState {
        engine: handle,
        store,
    });
    if let Err(e) = web::serve(state, &config.dashboard.host, config.dashboard.port, shutdown.clone()).await {
        eprintln!(
            "Error serving on {}:{}: {e}",
            config.dashboard.host, config.dashboard.port
        );
        shutdown.cancel();
        let _ = engine_task.await;
        std::process::exit(1);
    }

    shutdown.cancel();
    let _ = engine_task.await;
}

/// Load devices, their recent history and the alert list from the store.
async fn restore(engine: &mut Engine, store: &dyn Store) {
    let devices = match store.load_devices().await {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(error = %e, "could not load devices");
            return;
        }
    };

    let mut histories = Vec::with_capacity(devices.len());
    for device in &devices {
        match store.load_history(&device.id, HISTORY_CAPACITY).await {
            Ok(positions) => histories.push((device.id.clone(), positions)),
            Err(e) => tracing::warn!(device = %device.id, error = %e, "could not load history"),
        }
    }

    let alerts = store.load_alerts(ALERT_CAPACITY).await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "could not load alerts");
        Vec::new()
    });

    engine.restore(devices, histories, alerts);
}

// ---------------------------------------------------------------------------
// simulate
// ---------------------------------------------------------------------------

fn cmd_simulate(config: &Config, ticks: u32, seed: Option<u64>) {
    let (lat, lng) = config.site.center().unwrap_or(DEFAULT_SITE_CENTER);
    let mut tracker = Tracker::from_config(config);
    tracker.ensure_layout(lat, lng);
    let mut simulator = Simulator::new(
        config.simulation.tick_secs,
        seed.unwrap_or(config.simulation.seed),
    );
    let tick_secs = simulator.tick_secs;

    let fleet = default_fleet(lat, lng, config.simulation.speed_kmh);
    for d in &fleet {
        tracker.register_device(Device::new(&d.device_id, &d.name, d.category));
    }
    simulator.start(&fleet);

    let mut ingested = 0usize;
    for tick in 1..=ticks {
        let now = f64::from(tick) * tick_secs;
        for position in simulator.step(now) {
            tracker.ingest(position);
            ingested += 1;
        }
    }

    let snapshot = tracker.snapshot();
    println!();
    println!(
        "Simulated {ticks} ticks ({:.0}s): {ingested} fixes, {} devices, {} alerts",
        f64::from(ticks) * tick_secs,
        snapshot.devices.len(),
        snapshot.alerts.len()
    );
    println!();

    let mut table = Table::new();
    table.set_header(vec![
        "Device", "Name", "Status", "Zone", "Lat", "Lng", "Depth (m)", "Speed", "Battery", "Signal",
    ]);
    for view in &snapshot.devices {
        let d = &view.device;
        let p = view.last_position.as_ref();
        table.add_row(vec![
            Cell::new(&d.id),
            Cell::new(&d.name),
            Cell::new(d.status.as_str()),
            Cell::new(p.map(|p| p.zone.as_str()).unwrap_or("-")),
            Cell::new(p.map(|p| format!("{:.5}", p.lat)).unwrap_or("-".into())),
            Cell::new(p.map(|p| format!("{:.5}", p.lng)).unwrap_or("-".into())),
            Cell::new(p.map(|p| format!("{:.0}", p.depth)).unwrap_or("-".into())),
            Cell::new(p.map(|p| format!("{:.1}", p.speed_kmh)).unwrap_or("-".into())),
            Cell::new(p.map(|p| format!("{:.0}%", p.battery)).unwrap_or("-".into())),
            Cell::new(p.map(|p| format!("{:.0}%", p.signal)).unwrap_or("-".into())),
        ]);
    }
    println!("{table}");

    if !snapshot.alerts.is_empty() {
        println!();
        let mut table = Table::new();
        table.set_header(vec!["Time (s)", "Priority", "Type", "Device", "Message"]);
        for alert in snapshot.alerts.iter().take(20) {
            table.add_row(vec![
                Cell::new(format!("{:.0}", alert.timestamp)),
                Cell::new(alert.priority.as_str()),
                Cell::new(alert.alert_type.as_str()),
                Cell::new(&alert.device_id),
                Cell::new(&alert.message),
            ]);
        }
        println!("{table}");
    }
}

// ---------------------------------------------------------------------------
// replay / stats
// ---------------------------------------------------------------------------

fn cmd_replay(db_path: &str, device_id: &str, limit: usize) {
    let database = store::Database::open(db_path).unwrap_or_else(|e| {
        eprintln!("Error opening database {db_path}: {e}");
        std::process::exit(1);
    });

    let history = database.load_history(device_id, limit).unwrap_or_else(|e| {
        eprintln!("Error reading history for {device_id}: {e}");
        std::process::exit(1);
    });

    println!();
    if history.is_empty() {
        println!("No stored fixes for {device_id}");
        return;
    }

    let start = history[0].timestamp;
    let mut table = Table::new();
    table.set_header(vec!["#", "T+ (s)", "Lat", "Lng", "Depth (m)", "Zone", "Speed", "Hdg", "Battery", "Signal"]);
    for (i, p) in history.iter().enumerate() {
        table.add_row(vec![
            Cell::new(i),
            Cell::new(format!("{:.1}", p.timestamp - start)),
            Cell::new(format!("{:.5}", p.lat)),
            Cell::new(format!("{:.5}", p.lng)),
            Cell::new(format!("{:.0}", p.depth)),
            Cell::new(&p.zone),
            Cell::new(format!("{:.1}", p.speed_kmh)),
            Cell::new(format!("{:.0}", p.heading)),
            Cell::new(format!("{:.0}%", p.battery)),
            Cell::new(format!("{:.0}%", p.signal)),
        ]);
    }

    println!("Track for {device_id}: {} fixes", history.len());
    println!();
    println!("{table}");
}

fn cmd_stats(db_path: &str) {
    let database = store::Database::open(db_path).unwrap_or_else(|e| {
        eprintln!("Error opening database {db_path}: {e}");
        std::process::exit(1);
    });

    let stats = database.stats().unwrap_or_else(|e| {
        eprintln!("Error reading database {db_path}: {e}");
        std::process::exit(1);
    });

    println!();
    println!("Database: {db_path}");
    println!();
    println!("  Devices:    {}", stats.devices);
    println!("  Positions:  {}", stats.positions);
    println!("  Alerts:     {}", stats.alerts);
    println!();
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use snoozer_core::config::{SnoozerConfig, KEY_UNDO_STACK};
use snoozer_scheduler::idle::watch_suspend;
use snoozer_scheduler::{
    AlarmDriver, IdleMonitor, Signal, TabHost, TokioAlarm, WakeupEngine, WAKEUP_ALARM_NAME,
};
use snoozer_store::{KeyValueStore, PersistentQueue, SqliteStore};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

mod commands;
mod host;

use host::{CommandTabHost, LogNotifier};

/// How often the suspend detector compares wall and monotonic time.
const SUSPEND_TICK: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "snoozer", version, about = "Snooze browser tabs and wake them up later")]
struct Cli {
    /// Config file (default: $SNOOZER_CONFIG, then ~/.snoozer/snoozer.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the wakeup daemon
    Run,
    /// Snooze a URL until a time or on a schedule
    Snooze(commands::SnoozeArgs),
    /// Show pending snoozes
    List {
        /// Show recently woken tabs instead
        #[arg(long)]
        undo: bool,
    },
    /// Put the most recently woken tab back to sleep
    Undo,
    /// Remove every pending snooze for a URL
    Delete { url: String },
    /// Run one wakeup pass now
    Wake,
}

/// Both stores plus the queue over them.
pub struct Stores {
    pub durable: Arc<SqliteStore>,
    pub session: Arc<SqliteStore>,
    pub queue: Arc<PersistentQueue>,
}

impl Stores {
    fn open(config: &SnoozerConfig) -> anyhow::Result<Self> {
        let storage = &config.storage;
        let durable = Arc::new(
            SqliteStore::open("durable", &storage.path, storage.max_item_bytes)
                .with_context(|| format!("opening {}", storage.path))?,
        );
        let session = Arc::new(
            SqliteStore::open("session", &storage.session_path, storage.max_item_bytes)
                .with_context(|| format!("opening {}", storage.session_path))?,
        );
        let queue = Arc::new(PersistentQueue::new(durable.clone(), session.clone()));
        Ok(Self {
            durable,
            session,
            queue,
        })
    }
}

pub fn build_engine(
    config: &SnoozerConfig,
    stores: &Stores,
    alarm: Arc<dyn AlarmDriver>,
    tabs: Arc<dyn TabHost>,
) -> WakeupEngine {
    WakeupEngine::new(
        stores.queue.clone(),
        stores.session.clone(),
        alarm,
        tabs,
        Arc::new(LogNotifier),
    )
    .with_debounce(Duration::from_millis(config.wakeup.debounce_ms))
    .with_notifications(config.notifications.enabled)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "snoozer_daemon=info,snoozer_scheduler=info,snoozer_store=info".into()
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // load config: --config > SNOOZER_CONFIG env > ~/.snoozer/snoozer.toml
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("SNOOZER_CONFIG").ok());
    let config = SnoozerConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        SnoozerConfig::default()
    });

    let stores = Stores::open(&config)?;

    match cli.command {
        Commands::Run => run_daemon(config, stores).await,
        Commands::Snooze(args) => commands::snooze(&config, &stores, args).await,
        Commands::List { undo } => commands::list(&stores, undo).await,
        Commands::Undo => commands::undo(&config, &stores).await,
        Commands::Delete { url } => commands::delete(&config, &stores, &url).await,
        Commands::Wake => commands::wake(&config, &stores).await,
    }
}

async fn run_daemon(config: SnoozerConfig, stores: Stores) -> anyhow::Result<()> {
    // Signal channel: TokioAlarm / suspend detector / resync timer → engine
    let (signal_tx, signal_rx) = mpsc::channel::<Signal>(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let alarm = Arc::new(TokioAlarm::new(WAKEUP_ALARM_NAME, signal_tx.clone()));
    let tabs = Arc::new(CommandTabHost::new(&config.browser));
    let engine = Arc::new(build_engine(&config, &stores, alarm, tabs));
    let idle = IdleMonitor::new(Duration::from_secs(config.wakeup.resume_delay_secs));

    let pending = stores.queue.list_pending().await?;
    info!(pending = pending.len(), browser = %config.browser.command, "snoozer daemon starting");

    tokio::spawn(watch_suspend(
        signal_tx.clone(),
        SUSPEND_TICK,
        Duration::from_secs(config.wakeup.suspend_gap_secs),
        shutdown_rx.clone(),
    ));

    // CLI invocations write the same files from other processes.
    let resync_tx = signal_tx.clone();
    let mut resync_shutdown = shutdown_rx.clone();
    let resync_every = Duration::from_secs(config.wakeup.resync_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(resync_every);
        interval.tick().await; // the first tick completes immediately
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if resync_tx.send(Signal::Resync).await.is_err() {
                        break;
                    }
                }
                _ = resync_shutdown.changed() => {
                    if *resync_shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });

    log_changes(stores.durable.clone());
    log_changes(stores.session.clone());

    let engine_task = tokio::spawn(Arc::clone(&engine).run(signal_rx, idle, shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("listening for Ctrl-C")?;
    info!("shutdown requested");

    // signal background tasks to stop
    let _ = shutdown_tx.send(true);
    engine_task.await?;
    Ok(())
}

/// Log writes to `store` at debug level until it is dropped.
fn log_changes(store: Arc<dyn KeyValueStore>) {
    let mut changes = store.subscribe();
    drop(store);
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) if change.key == KEY_UNDO_STACK => {
                    debug!(store = %change.store, "undo stack changed")
                }
                Ok(change) => debug!(store = %change.store, key = %change.key, "stored value changed"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "store change listener lagged")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

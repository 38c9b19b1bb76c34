// Two engines on separate connections to the same database files, the way
// the daemon and a one-shot CLI command share storage.

mod support;

use std::path::Path;
use std::sync::Arc;

use snoozer_core::config::DEFAULT_MAX_ITEM_BYTES;
use snoozer_scheduler::{PeriodCalculator, WakeupEngine, WakeupOutcome};
use snoozer_store::{PersistentQueue, SqliteStore};
use support::{entry, t0, ChannelNotifier, FakeTabs, ManualClock, RecordingAlarm};
use tokio::sync::mpsc;

fn engine_on(dir: &Path, clock: Arc<ManualClock>, tabs: Arc<FakeTabs>) -> Arc<WakeupEngine> {
    let open = |name: &str, file: &str| {
        let path = dir.join(file);
        Arc::new(SqliteStore::open(name, path.to_str().unwrap(), DEFAULT_MAX_ITEM_BYTES).unwrap())
    };
    let durable = open("durable", "snoozer.db");
    let session = open("session", "session.db");
    let (notes, _) = mpsc::unbounded_channel();

    let engine = WakeupEngine::new(
        Arc::new(PersistentQueue::new(durable, session.clone())),
        session,
        Arc::new(RecordingAlarm::default()),
        tabs,
        Arc::new(ChannelNotifier(notes)),
    )
    .with_clock(clock)
    .with_calculator(PeriodCalculator::utc());
    Arc::new(engine)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn only_one_process_claims_a_window() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::at(t0()));
    let tabs = Arc::new(FakeTabs::default());
    let daemon = engine_on(dir.path(), clock.clone(), tabs.clone());
    let cli = engine_on(dir.path(), clock, tabs.clone());
    daemon
        .queue()
        .save_all(&[entry("https://x/a", t0())])
        .await
        .unwrap();

    let pass = |engine: Arc<WakeupEngine>| {
        tokio::spawn(async move { engine.handle_scheduled_wakeup().await.unwrap() })
    };
    let (a, b) = tokio::join!(pass(daemon), pass(cli.clone()));
    let outcomes = [a.unwrap(), b.unwrap()];

    let claimed = outcomes
        .iter()
        .filter(|o| matches!(o, WakeupOutcome::Woke(_)))
        .count();
    assert_eq!(claimed, 1, "exactly one pass owns the window");
    assert_eq!(tabs.created_entries().len(), 1);
    assert!(cli.queue().list_pending().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn snoozes_from_another_process_survive_a_wakeup_pass() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::at(t0()));
    let tabs = Arc::new(FakeTabs::default());
    let daemon = engine_on(dir.path(), clock.clone(), tabs.clone());
    let cli = engine_on(dir.path(), clock, tabs.clone());
    daemon
        .queue()
        .save_all(&[entry("https://x/due", t0())])
        .await
        .unwrap();

    let later = t0() + chrono::TimeDelta::days(1);
    let snoozes = tokio::spawn({
        let cli = cli.clone();
        async move {
            for i in 0..50 {
                cli.queue()
                    .push_pending(entry(&format!("https://x/later/{i}"), later))
                    .await
                    .unwrap();
            }
        }
    });
    let pass = tokio::spawn({
        let daemon = daemon.clone();
        async move { daemon.handle_scheduled_wakeup().await.unwrap() }
    });
    snoozes.await.unwrap();
    pass.await.unwrap();

    let pending = daemon.queue().list_pending().await.unwrap();
    assert_eq!(pending.len(), 50);
    assert!(pending.iter().all(|e| e.when == later));
    assert_eq!(tabs.created_entries().len(), 1);
}

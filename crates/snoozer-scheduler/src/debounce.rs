use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
enum Gate {
    Open,
    Busy,
    CoolingUntil(Instant),
}

/// Leading-edge debounce: the first call runs immediately; calls arriving
/// while it runs, or within `cooldown` after it finished, are dropped.
pub struct Debouncer {
    cooldown: Duration,
    gate: Mutex<Gate>,
}

impl Debouncer {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            gate: Mutex::new(Gate::Open),
        }
    }

    /// Run `f` unless a previous run is in progress or cooling down.
    ///
    /// Returns `None` when the call was dropped.
    pub async fn run<F, Fut, T>(&self, f: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !self.try_enter() {
            debug!("debounce: ignoring duplicate signal during cooldown");
            return None;
        }
        let _cooldown = CooldownOnDrop(self);
        Some(f().await)
    }

    fn try_enter(&self) -> bool {
        let mut gate = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        let open = match *gate {
            Gate::Open => true,
            Gate::Busy => false,
            Gate::CoolingUntil(until) => Instant::now() >= until,
        };
        if open {
            *gate = Gate::Busy;
        }
        open
    }

    fn start_cooldown(&self) {
        let mut gate = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        *gate = Gate::CoolingUntil(Instant::now() + self.cooldown);
    }
}

/// Starts the cooldown even if the wrapped future panics or is dropped.
struct CooldownOnDrop<'a>(&'a Debouncer);

impl Drop for CooldownOnDrop<'_> {
    fn drop(&mut self) {
        self.0.start_cooldown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn overlapping_calls_run_once() {
        let debouncer = Arc::new(Debouncer::new(Duration::from_millis(200)));
        let runs = Arc::new(AtomicUsize::new(0));

        let slow = {
            let (d, runs) = (debouncer.clone(), runs.clone());
            tokio::spawn(async move {
                d.run(|| async {
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = debouncer
            .run(|| async {
                runs.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        assert!(slow.await.unwrap().is_some());
        assert!(second.is_none());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cooldown_expires() {
        let debouncer = Debouncer::new(Duration::from_millis(30));
        assert_eq!(debouncer.run(|| async { 1 }).await, Some(1));
        assert_eq!(debouncer.run(|| async { 2 }).await, None);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(debouncer.run(|| async { 3 }).await, Some(3));
    }
}

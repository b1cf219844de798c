//! Watchdog supervisor.
//!
//! Each long-running task writes a heartbeat at the end of every
//! completed work cycle; the supervisor polls those heartbeats on a
//! coarse period and forcibly recreates any task that has gone stale.
//! There is no graceful-shutdown request — a stale task is assumed
//! unresponsive, aborted, and respawned from its factory with the same
//! parameters. This is the system's sole self-healing mechanism: an
//! infinite wait, crash loop, or livelock is bounded in outage duration
//! by the task timeout plus one supervisor period, never longer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Factory that (re)creates a supervised task. Called once at startup
/// and again after every forced restart.
pub type RespawnFn = Box<dyn Fn() -> JoinHandle<()> + Send>;

/// Liveness timestamp written only by the owning task, read only by the
/// supervisor. Clones share the underlying timestamp.
#[derive(Clone, Debug)]
pub struct Heartbeat {
    epoch: Instant,
    last_beat_ms: Arc<AtomicU64>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_beat_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Marks the current cycle as completed.
    pub fn beat(&self) {
        self.last_beat_ms
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    /// Time since the last completed cycle.
    pub fn since_last_beat(&self) -> Duration {
        let last = Duration::from_millis(self.last_beat_ms.load(Ordering::Relaxed));
        self.epoch.elapsed().saturating_sub(last)
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// One supervised unit: its liveness signal, its stale timeout, the live
/// handle, and the factory to rebuild it.
pub struct SupervisedTask {
    name: &'static str,
    heartbeat: Heartbeat,
    timeout: Duration,
    respawn: RespawnFn,
    handle: JoinHandle<()>,
    restarts: u32,
}

impl SupervisedTask {
    /// Spawns the initial instance through the factory. The heartbeat is
    /// armed at spawn so the stale check measures from task birth.
    pub fn spawn(
        name: &'static str,
        heartbeat: Heartbeat,
        timeout: Duration,
        respawn: RespawnFn,
    ) -> Self {
        heartbeat.beat();
        let handle = (respawn)();
        info!(task = name, ?timeout, "supervised task started");
        Self {
            name,
            heartbeat,
            timeout,
            respawn,
            handle,
            restarts: 0,
        }
    }

    /// Restarts the task iff its heartbeat is older than the timeout.
    fn check(&mut self) {
        let stale_for = self.heartbeat.since_last_beat();
        if stale_for <= self.timeout {
            return;
        }
        self.restarts += 1;
        warn!(
            task = self.name,
            ?stale_for,
            restarts = self.restarts,
            "heartbeat stale, recreating task"
        );
        self.handle.abort();
        // Re-arm before respawning so the next check measures the new
        // instance, not the corpse.
        self.heartbeat.beat();
        self.handle = (self.respawn)();
    }

    #[cfg(test)]
    fn restarts(&self) -> u32 {
        self.restarts
    }
}

pub struct Supervisor {
    tasks: Vec<SupervisedTask>,
    period: Duration,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn new(period: Duration) -> Self {
        Self {
            tasks: Vec::new(),
            period,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the supervision loop and tears down every
    /// supervised task when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn supervise(&mut self, task: SupervisedTask) {
        self.tasks.push(task);
    }

    /// Runs the watchdog loop until the shutdown token fires.
    pub async fn run(mut self) {
        info!(
            period = ?self.period,
            tasks = self.tasks.len(),
            "watchdog supervisor running"
        );
        let shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("supervisor stopping, aborting supervised tasks");
                    for task in &self.tasks {
                        debug!(task = task.name, "aborting");
                        task.handle.abort();
                    }
                    return;
                }
                _ = tokio::time::sleep(self.period) => {
                    for task in &mut self.tasks {
                        task.check();
                    }
                }
            }
        }
    }
}

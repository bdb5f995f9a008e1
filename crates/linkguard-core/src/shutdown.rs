//! Shutdown coordination.
//!
//! `ShutdownFlag` is the process-wide "stop now" bit. It is set at most once
//! (compare-and-swap) and never cleared. The monitor loop and the restart
//! procedure observe it at every wait checkpoint.
//!
//! `ShutdownCoordinator::shutdown` may be called from a signal task, the
//! normal exit path, or explicitly, in any combination and concurrently.
//! Exactly one caller runs the teardown body; the others wait for it to
//! finish and return.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::time::Instant;

use crate::config_switch::{ConfigSwitcher, ConfigVariant};
use crate::runtime::ContainerOrchestrator;

// ── Flag ────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ShutdownFlag {
    inner: Arc<FlagInner>,
}

struct FlagInner {
    set: AtomicBool,
    tx: watch::Sender<bool>,
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownFlag {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        ShutdownFlag {
            inner: Arc::new(FlagInner {
                set: AtomicBool::new(false),
                tx,
            }),
        }
    }

    /// Set the flag. Returns `true` only for the caller that flipped it.
    pub fn trigger(&self) -> bool {
        let won = self
            .inner
            .set
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.inner.tx.send_replace(true);
        }
        won
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.set.load(Ordering::Acquire)
    }

    /// Wait for `total`, waking at least every `tick` to re-check the flag.
    ///
    /// Returns `true` if the full duration elapsed, `false` as soon as the
    /// flag is observed set. A `total` past the clock's range never elapses.
    pub async fn pause(&self, total: Duration, tick: Duration) -> bool {
        let deadline = Instant::now().checked_add(total);
        let mut rx = self.inner.tx.subscribe();
        loop {
            if self.is_triggered() {
                return false;
            }
            let step = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return true;
                    }
                    tick.min(deadline - now)
                }
                None => tick,
            };
            tokio::select! {
                _ = tokio::time::sleep(step) => {}
                _ = rx.changed() => {}
            }
        }
    }
}

// ── Coordinator ─────────────────────────────────────────────────────

/// Timeouts used by the teardown body.
#[derive(Debug, Clone, Copy)]
pub struct ShutdownTimings {
    pub stop_deadline: Duration,
    pub unit_grace: Duration,
}

impl Default for ShutdownTimings {
    fn default() -> Self {
        Self {
            stop_deadline: Duration::from_secs(30),
            unit_grace: Duration::from_secs(10),
        }
    }
}

pub struct ShutdownCoordinator {
    flag: ShutdownFlag,
    switcher: Arc<ConfigSwitcher>,
    orchestrator: ContainerOrchestrator,
    lifecycle: Arc<Mutex<()>>,
    timings: ShutdownTimings,
    done: watch::Sender<bool>,
}

impl ShutdownCoordinator {
    /// `lifecycle` must be the same lock the restart procedure holds, so the
    /// teardown never interleaves with an in-flight remediation.
    pub fn new(
        flag: ShutdownFlag,
        switcher: Arc<ConfigSwitcher>,
        orchestrator: ContainerOrchestrator,
        lifecycle: Arc<Mutex<()>>,
        timings: ShutdownTimings,
    ) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            flag,
            switcher,
            orchestrator,
            lifecycle,
            timings,
            done,
        }
    }

    pub fn flag(&self) -> &ShutdownFlag {
        &self.flag
    }

    /// Run the teardown sequence once. Never fails.
    pub async fn shutdown(&self) {
        if !self.flag.trigger() {
            tracing::debug!("shutdown already in progress, waiting for it to finish");
            let mut rx = self.done.subscribe();
            let _ = rx.wait_for(|done| *done).await;
            return;
        }

        // Waiters are released however the body ends, including when this
        // future is dropped or panics.
        let _done = DoneOnDrop(&self.done);

        tracing::info!("graceful shutdown initiated");
        let _guard = self.lifecycle.lock().await;

        tracing::info!(step = "1/3", "restoring original process config");
        match self.switcher.switch(ConfigVariant::Original) {
            Ok(_) => tracing::info!(step = "1/3", "original process config restored"),
            Err(e) => {
                tracing::warn!(step = "1/3", error = %e, "could not restore original process config")
            }
        }

        tracing::info!(step = "2/3", "stopping managed units");
        self.orchestrator.stop_all(self.timings.stop_deadline).await;
        let remaining = self.orchestrator.list_active().await;
        if !remaining.is_empty() {
            tracing::info!(
                step = "2/3",
                count = remaining.len(),
                "units still running, force stopping"
            );
            self.orchestrator
                .force_stop(&remaining, self.timings.unit_grace)
                .await;
        }

        tracing::info!(step = "3/3", "final cleanup");
        self.orchestrator.prune_stopped().await;

        tracing::info!("graceful shutdown completed");
    }
}

struct DoneOnDrop<'a>(&'a watch::Sender<bool>);

impl Drop for DoneOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

//! # Monitor Loop
//!
//! The single control thread. Polls the metric feed at a fixed cadence,
//! feeds samples to the link tracker and runs the restart procedure on a
//! degraded verdict.
//!
//! ```text
//!   Polling ──Remediate──▶ Remediating ──▶ Cooldown ──▶ Polling
//!      │                                      │
//!      └──────────── shutdown flag ───────────┴──▶ Terminated
//! ```
//!
//! Every wait is split into `tick`-sized steps that re-check the shutdown
//! flag, so the loop exits within one tick of a shutdown request.

use std::sync::Arc;

use crate::error::{FeedError, RestartError};
use crate::link::{LinkStateTracker, Verdict};
use crate::metric::{MetricFeed, MetricQuery, MetricSample};
use crate::restart::RestartProcedure;
use crate::settings::MonitorTimings;
use crate::shutdown::ShutdownFlag;

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorPhase {
    Polling,
    Remediating { reason: String },
    Cooldown,
    Terminated,
}

/// Counters reported when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub polls: u64,
    pub absent: u64,
    pub feed_errors: u64,
    pub remediations: u64,
    pub failed_remediations: u64,
}

pub struct MonitorLoop {
    feed: Arc<dyn MetricFeed>,
    query: MetricQuery,
    tracker: LinkStateTracker,
    restart: RestartProcedure,
    flag: ShutdownFlag,
    timings: MonitorTimings,
    use_nuclear: bool,
    stats: MonitorStats,
}

impl MonitorLoop {
    pub fn new(
        feed: Arc<dyn MetricFeed>,
        query: MetricQuery,
        tracker: LinkStateTracker,
        restart: RestartProcedure,
        flag: ShutdownFlag,
        timings: MonitorTimings,
        use_nuclear: bool,
    ) -> Self {
        Self {
            feed,
            query,
            tracker,
            restart,
            flag,
            timings,
            use_nuclear,
            stats: MonitorStats::default(),
        }
    }

    pub fn tracker(&self) -> &LinkStateTracker {
        &self.tracker
    }

    /// Run until the shutdown flag is observed.
    pub async fn run(mut self) -> MonitorStats {
        tracing::info!(
            source = %self.query.source,
            measurement = %self.query.measurement,
            field = %self.query.field,
            window_s = self.query.window.as_secs(),
            "monitoring link quality"
        );

        let mut phase = MonitorPhase::Polling;
        loop {
            if self.flag.is_triggered() {
                phase = MonitorPhase::Terminated;
            }
            phase = match phase {
                MonitorPhase::Polling => self.poll().await,
                MonitorPhase::Remediating { reason } => self.remediate(&reason).await,
                MonitorPhase::Cooldown => self.cooldown().await,
                MonitorPhase::Terminated => break,
            };
        }

        tracing::info!(
            polls = self.stats.polls,
            absent = self.stats.absent,
            feed_errors = self.stats.feed_errors,
            remediations = self.stats.remediations,
            failed_remediations = self.stats.failed_remediations,
            "monitor stopped"
        );
        self.stats
    }

    async fn poll(&mut self) -> MonitorPhase {
        self.stats.polls += 1;
        match self.feed.latest(&self.query).await {
            Ok(sample) if !sample.present => {
                self.stats.absent += 1;
                tracing::warn!(
                    field = %self.query.field,
                    window_s = self.query.window.as_secs(),
                    "metric not found in the recency window"
                );
                self.wait(self.timings.poll_interval).await
            }
            Ok(sample) => {
                if let Some(reason) = self.assess(&sample) {
                    return MonitorPhase::Remediating { reason };
                }
                self.wait(self.timings.poll_interval).await
            }
            Err(e) => {
                self.stats.feed_errors += 1;
                if !self.flag.is_triggered() {
                    self.report_feed_error(&e);
                }
                self.wait(self.timings.error_backoff).await
            }
        }
    }

    /// Evaluate a present sample; returns the restart reason on a degraded
    /// verdict.
    fn assess(&mut self, sample: &MetricSample) -> Option<String> {
        let field = &self.query.field;
        tracing::info!(field = %field, value = %format!("{:.2}", sample.value), "current link quality");

        match self.tracker.evaluate(sample) {
            Verdict::BecameReady => {
                tracing::info!(
                    value = %format!("{:.2}", sample.value),
                    state = %self.tracker.state(),
                    "link connected and ready"
                );
                None
            }
            Verdict::Remediate => {
                let threshold = self.tracker.thresholds().remediate;
                tracing::warn!(
                    value = %format!("{:.2}", sample.value),
                    threshold,
                    state = %self.tracker.state(),
                    "link quality at or below threshold"
                );
                Some(format!("{} of {:.2} dB is too low.", field.to_uppercase(), sample.value))
            }
            Verdict::Ignore => None,
        }
    }

    async fn remediate(&mut self, reason: &str) -> MonitorPhase {
        match self.restart.execute(reason, self.use_nuclear).await {
            Ok(()) => {
                self.stats.remediations += 1;
                tracing::info!("restart initiated");
                MonitorPhase::Cooldown
            }
            Err(RestartError::Interrupted) => MonitorPhase::Terminated,
            Err(e) => {
                self.stats.failed_remediations += 1;
                tracing::error!(error = %e, "restart failed");
                MonitorPhase::Cooldown
            }
        }
    }

    async fn cooldown(&mut self) -> MonitorPhase {
        tracing::info!(
            cooldown_s = self.timings.cooldown.as_secs(),
            "waiting before resuming monitoring"
        );
        if !self.flag.pause(self.timings.cooldown, self.timings.tick).await {
            return MonitorPhase::Terminated;
        }
        self.tracker.recover();
        tracing::info!(state = %self.tracker.state(), "resuming monitoring");
        MonitorPhase::Polling
    }

    async fn wait(&self, duration: std::time::Duration) -> MonitorPhase {
        if self.flag.pause(duration, self.timings.tick).await {
            MonitorPhase::Polling
        } else {
            MonitorPhase::Terminated
        }
    }

    fn report_feed_error(&self, e: &FeedError) {
        match e {
            FeedError::Api { status, message } => {
                tracing::error!(status, message = %message, "metric feed API error");
                tracing::error!("check the feed URL, token, org and bucket");
            }
            other => tracing::error!(error = %other, "metric feed query failed"),
        }
    }
}

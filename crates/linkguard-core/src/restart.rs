//! Remediation: stop the managed group, switch the UE entry to the alternate
//! config, let the runtime settle, relaunch.
//!
//! Cleanup steps (1a-1d) are advisory and never abort the sequence. The
//! config switch and the launch are hard steps: a failed switch aborts
//! before anything is launched, and a failed launch reverts the config to
//! the original variant before the error is returned.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::config_switch::{ConfigSwitcher, ConfigVariant};
use crate::error::RestartError;
use crate::runtime::ContainerOrchestrator;
use crate::shutdown::ShutdownFlag;

/// Timeouts and pauses used by the restart sequence.
#[derive(Debug, Clone, Copy)]
pub struct RestartTimings {
    /// Deadline for the graceful group stop.
    pub stop_deadline: Duration,
    /// Per-unit grace before the two-phase force stop kills it.
    pub unit_grace: Duration,
    /// Quiet period between the full stop and the relaunch.
    pub settle: Duration,
    /// Shutdown-flag check granularity during the settle pause.
    pub tick: Duration,
}

impl Default for RestartTimings {
    fn default() -> Self {
        Self {
            stop_deadline: Duration::from_secs(30),
            unit_grace: Duration::from_secs(5),
            settle: Duration::from_secs(15),
            tick: Duration::from_secs(1),
        }
    }
}

pub struct RestartProcedure {
    switcher: Arc<ConfigSwitcher>,
    orchestrator: ContainerOrchestrator,
    flag: ShutdownFlag,
    lifecycle: Arc<Mutex<()>>,
    timings: RestartTimings,
}

impl RestartProcedure {
    pub fn new(
        switcher: Arc<ConfigSwitcher>,
        orchestrator: ContainerOrchestrator,
        flag: ShutdownFlag,
        lifecycle: Arc<Mutex<()>>,
        timings: RestartTimings,
    ) -> Self {
        Self {
            switcher,
            orchestrator,
            flag,
            lifecycle,
            timings,
        }
    }

    /// Run the full remediation sequence.
    ///
    /// `use_nuclear` allows the runtime-wide cleanup when managed units
    /// survive the scoped stop.
    pub async fn execute(&self, reason: &str, use_nuclear: bool) -> Result<(), RestartError> {
        let _guard = self.lifecycle.lock().await;
        if self.flag.is_triggered() {
            return Err(RestartError::Interrupted);
        }

        tracing::warn!(reason, "restarting managed units with alternate config");

        tracing::info!(step = "1a", "attempting graceful stop");
        self.orchestrator.stop_all(self.timings.stop_deadline).await;

        tracing::info!(step = "1b", "force stopping remaining units");
        let active = self.orchestrator.list_active().await;
        if active.is_empty() {
            tracing::info!(step = "1b", "no running units found");
        } else {
            tracing::info!(step = "1b", count = active.len(), "found running units");
            self.orchestrator
                .force_stop(&active, self.timings.unit_grace)
                .await;
        }

        tracing::info!(step = "1c", "pruning stopped units and networks");
        self.orchestrator.prune_stopped().await;

        let survivors = self.orchestrator.list_active().await;
        if survivors.is_empty() {
            tracing::info!(step = "1d", "all units stopped and cleaned up");
        } else if use_nuclear {
            tracing::warn!(
                step = "1d",
                count = survivors.len(),
                "units still running, using nuclear cleanup"
            );
            self.orchestrator.nuclear_cleanup().await;
        } else {
            tracing::warn!(
                step = "1d",
                count = survivors.len(),
                "some units may still be running"
            );
        }

        if self.flag.is_triggered() {
            return Err(RestartError::Interrupted);
        }

        tracing::info!(step = "2", "switching process config to alternate");
        if let Err(e) = self.switcher.switch(ConfigVariant::Alternate) {
            tracing::error!(step = "2", error = %e, "config switch failed, aborting restart");
            return Err(RestartError::ConfigSwitchFailed(e));
        }

        tracing::info!(
            step = "3",
            settle_s = self.timings.settle.as_secs(),
            "waiting for runtime to settle"
        );
        if !self.flag.pause(self.timings.settle, self.timings.tick).await {
            tracing::info!(step = "3", "shutdown requested during settle, not relaunching");
            return Err(RestartError::Interrupted);
        }

        tracing::info!(step = "4", "launching managed units");
        if let Err(e) = self.orchestrator.launch_async().await {
            tracing::error!(step = "4", error = %e, "launch failed, reverting to original config");
            if let Err(revert) = self.switcher.switch(ConfigVariant::Original) {
                tracing::error!(error = %revert, "could not revert to original config");
            }
            return Err(RestartError::LaunchFailed(e));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{
        FakeRuntime, RuntimeCall, SAMPLE_PROCESS_CONFIG, switcher_for, write_process_config,
    };

    struct Harness {
        _dir: tempfile::TempDir,
        fake: Arc<FakeRuntime>,
        switcher: Arc<ConfigSwitcher>,
        flag: ShutdownFlag,
        procedure: RestartProcedure,
    }

    fn harness(with_document: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let path = if with_document {
            write_process_config(dir.path(), SAMPLE_PROCESS_CONFIG)
        } else {
            dir.path().join("default.yaml")
        };
        let fake = Arc::new(FakeRuntime::new());
        let switcher = Arc::new(switcher_for(&path));
        let flag = ShutdownFlag::new();
        let procedure = RestartProcedure::new(
            switcher.clone(),
            ContainerOrchestrator::new(fake.clone()),
            flag.clone(),
            Arc::new(Mutex::new(())),
            RestartTimings::default(),
        );
        Harness {
            _dir: dir,
            fake,
            switcher,
            flag,
            procedure,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn full_sequence_switches_and_launches() {
        let h = harness(true);
        h.fake.set_active(&["ue1"]);

        h.procedure.execute("SINR of -2.00 dB is too low.", false).await.unwrap();

        assert_eq!(
            h.switcher.active_variant().unwrap(),
            Some(ConfigVariant::Alternate)
        );
        let calls = h.fake.calls();
        assert_eq!(calls[0], RuntimeCall::StopGroup(Duration::from_secs(30)));
        assert_eq!(calls[1], RuntimeCall::ListActive);
        assert_eq!(
            calls[2],
            RuntimeCall::StopUnit("ue1".into(), Duration::from_secs(5))
        );
        assert_eq!(calls[3], RuntimeCall::KillUnit("ue1".into()));
        assert_eq!(calls.last(), Some(&RuntimeCall::LaunchGroup));
        assert_eq!(h.fake.count(|c| *c == RuntimeCall::NuclearCleanup), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn settles_before_launch() {
        let h = harness(true);
        let start = tokio::time::Instant::now();
        h.procedure.execute("test", false).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn survivors_trigger_nuclear_only_when_enabled() {
        let h = harness(true);
        h.fake.set_sticky_active(&["stuck"]);
        h.procedure.execute("test", false).await.unwrap();
        assert_eq!(h.fake.count(|c| *c == RuntimeCall::NuclearCleanup), 0);
        assert_eq!(h.fake.count(|c| *c == RuntimeCall::LaunchGroup), 1);

        let h = harness(true);
        h.fake.set_sticky_active(&["stuck"]);
        h.procedure.execute("test", true).await.unwrap();
        assert_eq!(h.fake.count(|c| *c == RuntimeCall::NuclearCleanup), 1);
        assert_eq!(h.fake.count(|c| *c == RuntimeCall::LaunchGroup), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_failures_do_not_abort() {
        let h = harness(true);
        h.fake.time_out_group_stop();
        h.fake.fail_listing();
        h.fake.fail_prune();
        h.procedure.execute("test", true).await.unwrap();
        assert_eq!(h.fake.count(|c| *c == RuntimeCall::LaunchGroup), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_document_aborts_before_launch() {
        let h = harness(false);
        let err = h.procedure.execute("test", false).await.unwrap_err();
        assert!(matches!(err, RestartError::ConfigSwitchFailed(_)));
        assert_eq!(h.fake.count(|c| *c == RuntimeCall::LaunchGroup), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn launch_failure_reverts_config() {
        let h = harness(true);
        h.fake.fail_launch();
        let err = h.procedure.execute("test", false).await.unwrap_err();
        assert!(matches!(err, RestartError::LaunchFailed(_)));
        assert_eq!(
            h.switcher.active_variant().unwrap(),
            Some(ConfigVariant::Original)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_before_start_is_interrupted() {
        let h = harness(true);
        h.flag.trigger();
        let err = h.procedure.execute("test", false).await.unwrap_err();
        assert!(matches!(err, RestartError::Interrupted));
        assert!(h.fake.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_cleanup_skips_switch_and_launch() {
        let h = harness(true);
        h.fake.set_active(&["ue1"]);
        h.fake.trigger_on_group_stop(h.flag.clone());

        let err = h.procedure.execute("test", true).await.unwrap_err();
        assert!(matches!(err, RestartError::Interrupted));
        assert_eq!(
            h.switcher.active_variant().unwrap(),
            Some(ConfigVariant::Original)
        );
        assert_eq!(h.fake.count(|c| *c == RuntimeCall::LaunchGroup), 0);
        // Cleanup already under way is finished before the checkpoint.
        assert_eq!(h.fake.count(|c| *c == RuntimeCall::PruneUnits), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_settle_skips_launch() {
        let h = harness(true);
        let flag = h.flag.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            flag.trigger();
        });

        let err = h.procedure.execute("test", false).await.unwrap_err();
        assert!(matches!(err, RestartError::Interrupted));
        assert_eq!(h.fake.count(|c| *c == RuntimeCall::LaunchGroup), 0);
    }
}

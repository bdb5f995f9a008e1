//! Link supervision core for a software-radio UE stack.
//!
//! This crate contains:
//! - **Link tracking**: readiness/degradation state machine over SINR samples
//! - **Config switching**: atomic toggle of the UE process entry between two config files
//! - **Orchestration**: best-effort stop/prune/launch policy over a container runtime
//! - **Remediation**: the stop, switch, settle, relaunch sequence
//! - **Shutdown**: once-only teardown that restores the original config
//! - **Monitor loop**: the polling state machine tying it together
//!
//! Concrete I/O (the metric database client, the container CLI) lives behind
//! the `MetricFeed` and `ContainerRuntime` traits.

pub mod config_switch;
pub mod error;
pub mod link;
pub mod metric;
pub mod monitor;
pub mod restart;
pub mod runtime;
pub mod settings;
pub mod shutdown;
mod yaml_patch;

#[cfg(test)]
mod test_util;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config_switch::ConfigSwitcher;
use crate::link::LinkStateTracker;
use crate::metric::MetricFeed;
use crate::monitor::MonitorLoop;
use crate::restart::{RestartProcedure, RestartTimings};
use crate::runtime::{ContainerOrchestrator, ContainerRuntime};
use crate::settings::Settings;
use crate::shutdown::{ShutdownCoordinator, ShutdownFlag, ShutdownTimings};

/// Wires the components from settings. The monitor loop and the shutdown
/// coordinator share one shutdown flag and one lifecycle lock.
pub struct Supervisor {
    pub monitor: MonitorLoop,
    pub coordinator: Arc<ShutdownCoordinator>,
}

impl Supervisor {
    pub fn new(
        settings: &Settings,
        feed: Arc<dyn MetricFeed>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        let flag = ShutdownFlag::new();
        let lifecycle = Arc::new(Mutex::new(()));
        let switcher = Arc::new(ConfigSwitcher::new(settings.process_config.clone()));
        let orchestrator = ContainerOrchestrator::new(runtime);

        let restart = RestartProcedure::new(
            switcher.clone(),
            orchestrator.clone(),
            flag.clone(),
            lifecycle.clone(),
            RestartTimings {
                stop_deadline: settings.runtime.stop_timeout,
                unit_grace: settings.runtime.unit_stop_grace,
                settle: settings.runtime.settle,
                tick: settings.monitor.tick,
            },
        );

        let coordinator = Arc::new(ShutdownCoordinator::new(
            flag.clone(),
            switcher,
            orchestrator,
            lifecycle,
            ShutdownTimings {
                stop_deadline: settings.runtime.stop_timeout,
                unit_grace: settings.runtime.shutdown_unit_grace,
            },
        ));

        let monitor = MonitorLoop::new(
            feed,
            settings.influx.query(),
            LinkStateTracker::new(settings.link),
            restart,
            flag,
            settings.monitor,
            settings.runtime.nuclear,
        );

        Supervisor {
            monitor,
            coordinator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_switch::ConfigVariant;
    use crate::test_util::{
        FakeRuntime, RuntimeCall, SAMPLE_PROCESS_CONFIG, ScriptedFeed, Step, switcher_for,
        write_process_config,
    };

    #[tokio::test(start_paused = true)]
    async fn supervisor_shares_flag_between_loop_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_process_config(dir.path(), SAMPLE_PROCESS_CONFIG);
        let mut settings = Settings::default();
        settings.process_config.path = path.clone();

        // The feed's own flag is unrelated; the loop must stop because the
        // coordinator ran, not because the script ended.
        let script = (0..100).map(|_| Step::Value(8.0)).collect();
        let feed = Arc::new(ScriptedFeed::new(script, ShutdownFlag::new()));
        let fake = Arc::new(FakeRuntime::new());
        let supervisor = Supervisor::new(&settings, feed.clone(), fake.clone());

        let coordinator = supervisor.coordinator.clone();
        let handle = tokio::spawn(supervisor.monitor.run());
        tokio::time::sleep(std::time::Duration::from_secs(12)).await;
        coordinator.shutdown().await;
        let stats = handle.await.unwrap();

        assert_eq!(stats.polls, 3);
        assert!(feed.calls() < 100);
        assert_eq!(fake.count(|c| matches!(c, RuntimeCall::StopGroup(_))), 1);
        assert_eq!(
            switcher_for(&path).active_variant().unwrap(),
            Some(ConfigVariant::Original)
        );
    }
}

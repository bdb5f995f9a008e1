//! Container orchestration.
//!
//! `ContainerRuntime` is the raw command surface of the runtime (Docker
//! Compose in production, a recording fake in tests). `ContainerOrchestrator`
//! layers the cleanup policy on top: everything except launching is
//! best-effort, failures are logged and swallowed so one stuck unit never
//! blocks the rest of a stop sequence.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::RuntimeCommandError;

/// Runtime identifier of a managed unit (a container id).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitId(pub String);

impl UnitId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitId {
    fn from(s: &str) -> Self {
        UnitId(s.to_string())
    }
}

/// Commands the supervisor needs from the process/container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Currently running units of the managed group.
    async fn list_active(&self) -> Result<Vec<UnitId>, RuntimeCommandError>;

    /// Gracefully stop the whole managed group within `deadline`.
    async fn stop_group(&self, deadline: Duration) -> Result<(), RuntimeCommandError>;

    /// Gracefully stop one unit, giving it `grace` before the runtime kills it.
    async fn stop_unit(&self, id: &UnitId, grace: Duration) -> Result<(), RuntimeCommandError>;

    /// Hard-kill one unit.
    async fn kill_unit(&self, id: &UnitId) -> Result<(), RuntimeCommandError>;

    /// Remove stopped unit remnants.
    async fn prune_units(&self) -> Result<(), RuntimeCommandError>;

    /// Remove networks left behind by stopped units.
    async fn prune_networks(&self) -> Result<(), RuntimeCommandError>;

    /// Start the managed group detached. Returns once the launch has been
    /// initiated, not once the units are healthy.
    async fn launch_group(&self) -> Result<(), RuntimeCommandError>;

    /// Kill and remove every unit known to the runtime, managed or not, and
    /// prune unused networks and volumes.
    async fn nuclear_cleanup(&self) -> Result<(), RuntimeCommandError>;
}

/// Cleanup policy over a `ContainerRuntime`.
#[derive(Clone)]
pub struct ContainerOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ContainerOrchestrator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Running managed units. A failed listing is logged and reported as
    /// empty.
    pub async fn list_active(&self) -> Vec<UnitId> {
        match self.runtime.list_active().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list active units");
                Vec::new()
            }
        }
    }

    /// Graceful group stop. A timeout means "go on to force-stop".
    pub async fn stop_all(&self, deadline: Duration) {
        match self.runtime.stop_group(deadline).await {
            Ok(()) => tracing::debug!("managed group stopped"),
            Err(e) if e.is_timeout() => {
                tracing::warn!(
                    deadline_s = deadline.as_secs(),
                    "graceful stop timed out, proceeding with force stop"
                );
            }
            Err(e) => tracing::warn!(error = %e, "graceful stop failed"),
        }
    }

    /// Two-phase stop per unit: graceful stop with `grace`, then hard kill.
    ///
    /// The kill is issued even after a successful stop; a "not running"
    /// failure at that point is expected and only logged at debug.
    pub async fn force_stop(&self, ids: &[UnitId], grace: Duration) {
        for id in ids {
            tracing::info!(unit = %id, "force stopping unit");
            if let Err(e) = self.runtime.stop_unit(id, grace).await {
                tracing::warn!(unit = %id, error = %e, "unit stop failed");
            }
            if let Err(e) = self.runtime.kill_unit(id).await {
                tracing::debug!(unit = %id, error = %e, "unit kill failed");
            }
        }
    }

    /// Remove stopped units and their networks.
    pub async fn prune_stopped(&self) {
        if let Err(e) = self.runtime.prune_units().await {
            tracing::warn!(error = %e, "unit prune failed");
        }
        if let Err(e) = self.runtime.prune_networks().await {
            tracing::warn!(error = %e, "network prune failed");
        }
    }

    /// Launch the managed group. The only orchestration step whose failure
    /// is surfaced.
    pub async fn launch_async(&self) -> Result<(), RuntimeCommandError> {
        self.runtime.launch_group().await?;
        tracing::info!("managed group launch initiated");
        Ok(())
    }

    /// Runtime-wide destructive cleanup. Callers gate this behind an
    /// explicit opt-in.
    pub async fn nuclear_cleanup(&self) {
        tracing::warn!("performing nuclear cleanup of all runtime units");
        match self.runtime.nuclear_cleanup().await {
            Ok(()) => tracing::info!("nuclear cleanup finished"),
            Err(e) => tracing::warn!(error = %e, "nuclear cleanup incomplete"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{FakeRuntime, RuntimeCall};

    #[tokio::test]
    async fn list_failure_reads_as_empty() {
        let fake = Arc::new(FakeRuntime::new());
        fake.fail_listing();
        let orch = ContainerOrchestrator::new(fake.clone());
        assert!(orch.list_active().await.is_empty());
    }

    #[tokio::test]
    async fn stop_all_swallows_timeout() {
        let fake = Arc::new(FakeRuntime::new());
        fake.time_out_group_stop();
        let orch = ContainerOrchestrator::new(fake.clone());
        orch.stop_all(Duration::from_secs(30)).await;
        assert_eq!(
            fake.calls(),
            vec![RuntimeCall::StopGroup(Duration::from_secs(30))]
        );
    }

    #[tokio::test]
    async fn force_stop_continues_past_failures() {
        let fake = Arc::new(FakeRuntime::new());
        fake.fail_unit_stop("b");
        let orch = ContainerOrchestrator::new(fake.clone());
        let ids: Vec<UnitId> = ["a", "b", "c"].into_iter().map(UnitId::from).collect();

        orch.force_stop(&ids, Duration::from_secs(5)).await;

        let grace = Duration::from_secs(5);
        assert_eq!(
            fake.calls(),
            vec![
                RuntimeCall::StopUnit("a".into(), grace),
                RuntimeCall::KillUnit("a".into()),
                RuntimeCall::StopUnit("b".into(), grace),
                RuntimeCall::KillUnit("b".into()),
                RuntimeCall::StopUnit("c".into(), grace),
                RuntimeCall::KillUnit("c".into()),
            ]
        );
    }

    #[tokio::test]
    async fn prune_covers_units_and_networks() {
        let fake = Arc::new(FakeRuntime::new());
        let orch = ContainerOrchestrator::new(fake.clone());
        orch.prune_stopped().await;
        assert_eq!(
            fake.calls(),
            vec![RuntimeCall::PruneUnits, RuntimeCall::PruneNetworks]
        );
    }

    #[tokio::test]
    async fn launch_failure_is_surfaced() {
        let fake = Arc::new(FakeRuntime::new());
        fake.fail_launch();
        let orch = ContainerOrchestrator::new(fake.clone());
        assert!(orch.launch_async().await.is_err());
    }
}

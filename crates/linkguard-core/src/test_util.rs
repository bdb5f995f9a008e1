//! Fakes shared by the unit tests: a scripted metric feed and a recording
//! container runtime with injectable failures.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::config_switch::ConfigSwitcher;
use crate::error::{FeedError, RuntimeCommandError};
use crate::metric::{MetricFeed, MetricQuery, MetricSample};
use crate::runtime::{ContainerRuntime, UnitId};
use crate::settings::ProcessConfigSettings;
use crate::shutdown::ShutdownFlag;

pub const SAMPLE_PROCESS_CONFIG: &str = "\
version: 2
processes:
  - type: gnb
    id: gnb_1
    config_file: configs/gnb.conf
  - type: rtue
    id: rtue_uhd_1
    config_file: configs/uhd/ue_uhd.conf
    args:
      - --verbose
  - type: rtue
    id: rtue_uhd_2
    config_file: configs/uhd/ue_uhd.conf
metrics:
  enabled: true
";

pub fn write_process_config(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join("default.yaml");
    std::fs::write(&path, contents).unwrap();
    path
}

pub fn switcher_for(path: &Path) -> ConfigSwitcher {
    ConfigSwitcher::new(ProcessConfigSettings {
        path: path.to_path_buf(),
        ..ProcessConfigSettings::default()
    })
}

// ── Metric feed ─────────────────────────────────────────────────────

pub enum Step {
    Value(f64),
    Absent,
    Error,
}

/// Replays a fixed script. Once the script is exhausted it triggers the
/// shutdown flag and answers with transport errors, which ends the monitor
/// loop at its next checkpoint.
pub struct ScriptedFeed {
    script: Mutex<VecDeque<Step>>,
    flag: ShutdownFlag,
    calls: AtomicUsize,
}

impl ScriptedFeed {
    pub fn new(script: Vec<Step>, flag: ShutdownFlag) -> Self {
        Self {
            script: Mutex::new(script.into()),
            flag,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricFeed for ScriptedFeed {
    async fn latest(&self, _query: &MetricQuery) -> Result<MetricSample, FeedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Step::Value(v)) => Ok(MetricSample::observed(v, Utc::now())),
            Some(Step::Absent) => Ok(MetricSample::absent(Utc::now())),
            Some(Step::Error) => Err(FeedError::Api {
                status: 401,
                message: "unauthorized access".into(),
            }),
            None => {
                self.flag.trigger();
                Err(FeedError::Transport("script exhausted".into()))
            }
        }
    }
}

// ── Container runtime ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    ListActive,
    StopGroup(Duration),
    StopUnit(UnitId, Duration),
    KillUnit(UnitId),
    PruneUnits,
    PruneNetworks,
    LaunchGroup,
    NuclearCleanup,
}

/// Records every call. Units listed as active stay active until killed
/// (or until a nuclear cleanup, for sticky ones).
#[derive(Default)]
pub struct FakeRuntime {
    calls: Mutex<Vec<RuntimeCall>>,
    active: Mutex<Vec<UnitId>>,
    sticky: AtomicBool,
    group_stop_times_out: AtomicBool,
    listing_fails: AtomicBool,
    prune_fails: AtomicBool,
    launch_fails: AtomicBool,
    failing_unit: Mutex<Option<UnitId>>,
    shutdown_on_group_stop: Mutex<Option<ShutdownFlag>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active(&self, ids: &[&str]) {
        *self.active.lock().unwrap() = ids.iter().map(|s| UnitId::from(*s)).collect();
    }

    /// Units that survive kills; only the nuclear cleanup removes them.
    pub fn set_sticky_active(&self, ids: &[&str]) {
        self.set_active(ids);
        self.sticky.store(true, Ordering::SeqCst);
    }

    pub fn time_out_group_stop(&self) {
        self.group_stop_times_out.store(true, Ordering::SeqCst);
    }

    pub fn fail_listing(&self) {
        self.listing_fails.store(true, Ordering::SeqCst);
    }

    pub fn fail_prune(&self) {
        self.prune_fails.store(true, Ordering::SeqCst);
    }

    pub fn fail_launch(&self) {
        self.launch_fails.store(true, Ordering::SeqCst);
    }

    pub fn fail_unit_stop(&self, id: &str) {
        *self.failing_unit.lock().unwrap() = Some(UnitId::from(id));
    }

    /// Request shutdown from inside the graceful group stop.
    pub fn trigger_on_group_stop(&self, flag: ShutdownFlag) {
        *self.shutdown_on_group_stop.lock().unwrap() = Some(flag);
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&RuntimeCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: RuntimeCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn failed(command: &str) -> RuntimeCommandError {
        RuntimeCommandError::Failed {
            command: command.into(),
            code: Some(1),
            stderr: "injected failure".into(),
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_active(&self) -> Result<Vec<UnitId>, RuntimeCommandError> {
        self.record(RuntimeCall::ListActive);
        if self.listing_fails.load(Ordering::SeqCst) {
            return Err(Self::failed("ps"));
        }
        Ok(self.active.lock().unwrap().clone())
    }

    async fn stop_group(&self, deadline: Duration) -> Result<(), RuntimeCommandError> {
        self.record(RuntimeCall::StopGroup(deadline));
        if let Some(flag) = self.shutdown_on_group_stop.lock().unwrap().as_ref() {
            flag.trigger();
        }
        if self.group_stop_times_out.load(Ordering::SeqCst) {
            return Err(RuntimeCommandError::Timeout {
                command: "compose down".into(),
                timeout: deadline,
            });
        }
        Ok(())
    }

    async fn stop_unit(&self, id: &UnitId, grace: Duration) -> Result<(), RuntimeCommandError> {
        self.record(RuntimeCall::StopUnit(id.clone(), grace));
        if self.failing_unit.lock().unwrap().as_ref() == Some(id) {
            return Err(Self::failed("stop"));
        }
        Ok(())
    }

    async fn kill_unit(&self, id: &UnitId) -> Result<(), RuntimeCommandError> {
        self.record(RuntimeCall::KillUnit(id.clone()));
        if !self.sticky.load(Ordering::SeqCst) {
            self.active.lock().unwrap().retain(|u| u != id);
        }
        Ok(())
    }

    async fn prune_units(&self) -> Result<(), RuntimeCommandError> {
        self.record(RuntimeCall::PruneUnits);
        if self.prune_fails.load(Ordering::SeqCst) {
            return Err(Self::failed("container prune"));
        }
        Ok(())
    }

    async fn prune_networks(&self) -> Result<(), RuntimeCommandError> {
        self.record(RuntimeCall::PruneNetworks);
        if self.prune_fails.load(Ordering::SeqCst) {
            return Err(Self::failed("network prune"));
        }
        Ok(())
    }

    async fn launch_group(&self) -> Result<(), RuntimeCommandError> {
        self.record(RuntimeCall::LaunchGroup);
        if self.launch_fails.load(Ordering::SeqCst) {
            return Err(RuntimeCommandError::Spawn {
                command: "compose up".into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "docker not found"),
            });
        }
        Ok(())
    }

    async fn nuclear_cleanup(&self) -> Result<(), RuntimeCommandError> {
        self.record(RuntimeCall::NuclearCleanup);
        self.active.lock().unwrap().clear();
        Ok(())
    }
}

//! Supervisor settings, loaded from TOML.
//!
//! Every field is optional in the file; `SettingsInput::resolve` fills in
//! defaults and validates the combination.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::link::LinkThresholds;
use crate::metric::MetricQuery;

/// Upper bound for every configured wait and timeout.
const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

// ── Raw input ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SettingsInput {
    pub influx: InfluxInput,
    pub link: LinkInput,
    pub monitor: MonitorInput,
    pub process_config: ProcessConfigInput,
    pub runtime: RuntimeInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InfluxInput {
    pub url: Option<String>,
    pub org: Option<String>,
    pub bucket: Option<String>,
    pub measurement: Option<String>,
    pub field: Option<String>,
    pub recency_window_s: Option<u64>,
    pub request_timeout_s: Option<u64>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LinkInput {
    pub ready_threshold: Option<f64>,
    pub remediation_threshold: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MonitorInput {
    pub poll_interval_s: Option<u64>,
    pub error_backoff_s: Option<u64>,
    pub cooldown_s: Option<u64>,
    pub tick_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProcessConfigInput {
    pub path: Option<PathBuf>,
    pub process_type: Option<String>,
    pub process_id: Option<String>,
    pub field: Option<String>,
    pub original: Option<String>,
    pub alternate: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeInput {
    pub project_dir: Option<PathBuf>,
    pub profile: Option<String>,
    pub sudo: Option<bool>,
    pub stop_timeout_s: Option<u64>,
    pub unit_stop_grace_s: Option<u64>,
    pub shutdown_unit_grace_s: Option<u64>,
    pub settle_s: Option<u64>,
    pub nuclear: Option<bool>,
    pub launch_log: Option<PathBuf>,
}

// ── Resolved settings ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct InfluxSettings {
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub measurement: String,
    pub field: String,
    pub recency_window: Duration,
    pub request_timeout: Duration,
    pub token: Option<String>,
}

impl Default for InfluxSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".into(),
            org: "rtu".into(),
            bucket: "rtusystem".into(),
            measurement: "rtue_carrier_metric".into(),
            field: "sinr".into(),
            recency_window: Duration::from_secs(60),
            request_timeout: Duration::from_secs(10),
            token: None,
        }
    }
}

impl InfluxSettings {
    /// The query the monitor issues on every poll.
    pub fn query(&self) -> MetricQuery {
        MetricQuery {
            source: self.bucket.clone(),
            measurement: self.measurement.clone(),
            field: self.field.clone(),
            window: self.recency_window,
        }
    }
}

/// Polling cadence and waits of the monitor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorTimings {
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    pub cooldown: Duration,
    /// Granularity at which every wait re-checks the shutdown flag.
    pub tick: Duration,
}

impl Default for MonitorTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            error_backoff: Duration::from_secs(10),
            cooldown: Duration::from_secs(60),
            tick: Duration::from_secs(1),
        }
    }
}

/// Location of the managed process entry and its two config variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessConfigSettings {
    pub path: PathBuf,
    pub process_type: String,
    pub process_id: String,
    pub field: String,
    pub original: String,
    pub alternate: String,
}

impl Default for ProcessConfigSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("configs/default.yaml"),
            process_type: "rtue".into(),
            process_id: "rtue_uhd_1".into(),
            field: "config_file".into(),
            original: "configs/uhd/ue_uhd.conf".into(),
            alternate: "configs/uhd/ue_uhd_alt.conf".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub project_dir: PathBuf,
    /// Compose profile selecting the managed unit group.
    pub profile: Option<String>,
    pub sudo: bool,
    pub stop_timeout: Duration,
    pub unit_stop_grace: Duration,
    pub shutdown_unit_grace: Duration,
    pub settle: Duration,
    pub nuclear: bool,
    pub launch_log: Option<PathBuf>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            profile: Some("system".into()),
            sudo: true,
            stop_timeout: Duration::from_secs(30),
            unit_stop_grace: Duration::from_secs(5),
            shutdown_unit_grace: Duration::from_secs(10),
            settle: Duration::from_secs(15),
            nuclear: false,
            launch_log: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub influx: InfluxSettings,
    pub link: LinkThresholds,
    pub monitor: MonitorTimings,
    pub process_config: ProcessConfigSettings,
    pub runtime: RuntimeSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            influx: InfluxSettings::default(),
            link: LinkThresholds::default(),
            monitor: MonitorTimings::default(),
            process_config: ProcessConfigSettings::default(),
            runtime: RuntimeSettings::default(),
        }
    }
}

fn non_empty(value: Option<String>, default: &str) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl SettingsInput {
    pub fn resolve(self) -> Result<Settings, String> {
        let defaults = InfluxSettings::default();
        let influx = InfluxSettings {
            url: non_empty(self.influx.url, &defaults.url),
            org: non_empty(self.influx.org, &defaults.org),
            bucket: non_empty(self.influx.bucket, &defaults.bucket),
            measurement: non_empty(self.influx.measurement, &defaults.measurement),
            field: non_empty(self.influx.field, &defaults.field),
            recency_window: self
                .influx
                .recency_window_s
                .map(|s| Duration::from_secs(s.max(1)))
                .unwrap_or(defaults.recency_window),
            request_timeout: self
                .influx
                .request_timeout_s
                .map(|s| Duration::from_secs(s.max(1)))
                .unwrap_or(defaults.request_timeout),
            token: self
                .influx
                .token
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
        };

        let default_link = LinkThresholds::default();
        let link = LinkThresholds {
            ready: self.link.ready_threshold.unwrap_or(default_link.ready),
            remediate: self
                .link
                .remediation_threshold
                .unwrap_or(default_link.remediate),
        };
        if !link.ready.is_finite() || !link.remediate.is_finite() {
            return Err("link thresholds must be finite".into());
        }
        if link.remediate >= link.ready {
            return Err(format!(
                "remediation_threshold ({}) must be below ready_threshold ({})",
                link.remediate, link.ready
            ));
        }

        let poll_s = self.monitor.poll_interval_s.unwrap_or(5);
        if poll_s == 0 {
            return Err("poll_interval_s must be at least 1".into());
        }
        let tick_ms = self.monitor.tick_ms.unwrap_or(1000);
        if tick_ms == 0 {
            return Err("tick_ms must be at least 1".into());
        }
        let monitor = MonitorTimings {
            poll_interval: Duration::from_secs(poll_s),
            error_backoff: Duration::from_secs(
                self.monitor
                    .error_backoff_s
                    .unwrap_or(poll_s.saturating_mul(2)),
            ),
            cooldown: Duration::from_secs(self.monitor.cooldown_s.unwrap_or(60)),
            tick: Duration::from_millis(tick_ms),
        };

        let defaults = ProcessConfigSettings::default();
        let process_config = ProcessConfigSettings {
            path: self.process_config.path.unwrap_or(defaults.path),
            process_type: non_empty(self.process_config.process_type, &defaults.process_type),
            process_id: non_empty(self.process_config.process_id, &defaults.process_id),
            field: non_empty(self.process_config.field, &defaults.field),
            original: non_empty(self.process_config.original, &defaults.original),
            alternate: non_empty(self.process_config.alternate, &defaults.alternate),
        };
        if process_config.original == process_config.alternate {
            return Err("process_config.original and process_config.alternate must differ".into());
        }

        let defaults = RuntimeSettings::default();
        let runtime = RuntimeSettings {
            project_dir: self.runtime.project_dir.unwrap_or(defaults.project_dir),
            profile: match self.runtime.profile {
                Some(p) if p.trim().is_empty() => None,
                Some(p) => Some(p.trim().to_string()),
                None => defaults.profile,
            },
            sudo: self.runtime.sudo.unwrap_or(defaults.sudo),
            stop_timeout: self
                .runtime
                .stop_timeout_s
                .map(Duration::from_secs)
                .unwrap_or(defaults.stop_timeout),
            unit_stop_grace: self
                .runtime
                .unit_stop_grace_s
                .map(Duration::from_secs)
                .unwrap_or(defaults.unit_stop_grace),
            shutdown_unit_grace: self
                .runtime
                .shutdown_unit_grace_s
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_unit_grace),
            settle: self
                .runtime
                .settle_s
                .map(Duration::from_secs)
                .unwrap_or(defaults.settle),
            nuclear: self.runtime.nuclear.unwrap_or(defaults.nuclear),
            launch_log: self.runtime.launch_log,
        };

        let waits = [
            ("influx.recency_window_s", influx.recency_window),
            ("influx.request_timeout_s", influx.request_timeout),
            ("monitor.poll_interval_s", monitor.poll_interval),
            ("monitor.error_backoff_s", monitor.error_backoff),
            ("monitor.cooldown_s", monitor.cooldown),
            ("monitor.tick_ms", monitor.tick),
            ("runtime.stop_timeout_s", runtime.stop_timeout),
            ("runtime.unit_stop_grace_s", runtime.unit_stop_grace),
            ("runtime.shutdown_unit_grace_s", runtime.shutdown_unit_grace),
            ("runtime.settle_s", runtime.settle),
        ];
        if let Some((name, _)) = waits.iter().find(|(_, d)| *d > MAX_WAIT) {
            return Err(format!(
                "{name} must not exceed {} seconds",
                MAX_WAIT.as_secs()
            ));
        }

        Ok(Settings {
            influx,
            link,
            monitor,
            process_config,
            runtime,
        })
    }
}

impl Settings {
    pub fn from_toml_str(input: &str) -> Result<Self, String> {
        if input.trim().is_empty() {
            return SettingsInput::default().resolve();
        }
        let parsed: SettingsInput =
            toml::from_str(input).map_err(|e| format!("Invalid settings TOML: {}", e))?;
        parsed.resolve()
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
        Self::from_toml_str(&raw)
    }
}

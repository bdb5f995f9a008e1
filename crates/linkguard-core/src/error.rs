//! Error taxonomy for the supervisor.
//!
//! Severity is part of the type: feed and runtime errors are swallowed by
//! the control loop, config and launch errors abort a remediation attempt.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

// ── Process config document ─────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("process config {} not found", path.display())]
    NotFound { path: PathBuf },
    #[error("process config {} is malformed: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },
    #[error("no process entry with type={process_type} id={process_id} in {}", path.display())]
    EntryMissing {
        path: PathBuf,
        process_type: String,
        process_id: String,
    },
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ── Metric feed ─────────────────────────────────────────────────────

/// Query-layer failure. Always transient from the loop's point of view.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("metric feed rejected the query (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("metric feed unreachable: {0}")]
    Transport(String),
    #[error("unreadable metric feed response: {0}")]
    Decode(String),
}

// ── Container runtime ───────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RuntimeCommandError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    #[error("`{command}` exited with {code:?}: {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

impl RuntimeCommandError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RuntimeCommandError::Timeout { .. })
    }
}

// ── Remediation ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RestartError {
    #[error("config switch failed, restart aborted: {0}")]
    ConfigSwitchFailed(#[source] ConfigError),
    #[error("launching the unit group failed: {0}")]
    LaunchFailed(#[source] RuntimeCommandError),
    #[error("restart interrupted by shutdown")]
    Interrupted,
}

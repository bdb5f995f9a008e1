//! # Link State Tracking
//!
//! Turns the stream of signal-quality samples into a readiness belief and a
//! per-sample verdict. A link that was never observed ready is treated as
//! absent, not degraded: remediation is only considered once a sample has
//! crossed the first-connection threshold.
//!
//! ```text
//!   Unknown ──(value > ready)──▶ Ready ──(value <= remediate)──▶ Degraded
//!                                  ▲                                │
//!                                  └────────── recover() ───────────┘
//! ```

use crate::metric::MetricSample;

/// Belief about whether the monitored radio link is usably connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unknown,
    Ready,
    Degraded,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Unknown => write!(f, "unknown"),
            LinkState::Ready => write!(f, "ready"),
            LinkState::Degraded => write!(f, "degraded"),
        }
    }
}

/// Outcome of evaluating one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Ignore,
    BecameReady,
    Remediate,
}

/// Thresholds in the metric's unit (dB for SINR).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkThresholds {
    /// A sample strictly above this marks the first connection.
    pub ready: f64,
    /// A sample at or below this, while ready, triggers remediation.
    pub remediate: f64,
}

impl Default for LinkThresholds {
    fn default() -> Self {
        LinkThresholds {
            ready: 5.0,
            remediate: 0.0,
        }
    }
}

/// Single-writer link state machine. Owned by the monitor loop.
#[derive(Debug)]
pub struct LinkStateTracker {
    state: LinkState,
    thresholds: LinkThresholds,
}

impl LinkStateTracker {
    pub fn new(thresholds: LinkThresholds) -> Self {
        LinkStateTracker {
            state: LinkState::Unknown,
            thresholds,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn thresholds(&self) -> LinkThresholds {
        self.thresholds
    }

    /// Evaluate a sample against the current state.
    ///
    /// The readiness transition takes precedence: the sample that flips
    /// `Unknown` to `Ready` is never also checked against the remediation
    /// threshold. Absent samples are always ignored.
    pub fn evaluate(&mut self, sample: &MetricSample) -> Verdict {
        if !sample.present {
            return Verdict::Ignore;
        }

        if self.state == LinkState::Unknown && sample.value > self.thresholds.ready {
            self.state = LinkState::Ready;
            return Verdict::BecameReady;
        }

        if self.state != LinkState::Ready {
            return Verdict::Ignore;
        }

        if sample.value <= self.thresholds.remediate {
            self.state = LinkState::Degraded;
            return Verdict::Remediate;
        }

        Verdict::Ignore
    }

    /// Clear a degraded verdict after the post-remediation cooldown.
    pub fn recover(&mut self) {
        if self.state == LinkState::Degraded {
            self.state = LinkState::Ready;
        }
    }
}

//! Metric samples and the feed they come from.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::FeedError;

/// One poll result. `present == false` means nothing was recorded within the
/// query's recency window; `value` is meaningless in that case.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricSample {
    pub value: f64,
    pub present: bool,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    pub fn observed(value: f64, timestamp: DateTime<Utc>) -> Self {
        MetricSample {
            value,
            present: true,
            timestamp,
        }
    }

    pub fn absent(at: DateTime<Utc>) -> Self {
        MetricSample {
            value: 0.0,
            present: false,
            timestamp: at,
        }
    }
}

/// Which series to read and how far back a sample may be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricQuery {
    /// Source set (the InfluxDB bucket).
    pub source: String,
    pub measurement: String,
    pub field: String,
    pub window: Duration,
}

/// Time-series source the monitor polls.
#[async_trait]
pub trait MetricFeed: Send + Sync {
    /// Most recent sample of `query.field` within `query.window`, or an
    /// absent sample if there is none.
    async fn latest(&self, query: &MetricQuery) -> Result<MetricSample, FeedError>;
}

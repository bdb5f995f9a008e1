//! InfluxDB v2 metric feed.
//!
//! Issues one Flux query per poll against `/api/v2/query` and reads the
//! newest point out of the CSV response.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;

use linkguard_core::error::FeedError;
use linkguard_core::metric::{MetricFeed, MetricQuery, MetricSample};
use linkguard_core::settings::InfluxSettings;

#[derive(Debug, Clone)]
pub struct InfluxFeed {
    client: Client,
    endpoint: String,
    org: String,
    token: String,
}

impl InfluxFeed {
    pub fn new(settings: &InfluxSettings, token: String) -> Result<Self, FeedError> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| FeedError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: settings.url.trim_end_matches('/').to_string(),
            org: settings.org.clone(),
            token,
        })
    }
}

#[async_trait]
impl MetricFeed for InfluxFeed {
    async fn latest(&self, query: &MetricQuery) -> Result<MetricSample, FeedError> {
        let url = format!("{}/api/v2/query", self.endpoint);
        let response = self
            .client
            .post(&url)
            .query(&[("org", self.org.as_str())])
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(CONTENT_TYPE, "application/vnd.flux")
            .header(ACCEPT, "application/csv")
            .body(render_flux(query))
            .send()
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(FeedError::Api {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        parse_latest(&body, status.as_u16(), Utc::now())
    }
}

/// Flux query selecting the newest point of one field in the window.
pub fn render_flux(query: &MetricQuery) -> String {
    format!(
        "from(bucket: \"{bucket}\")\n  \
         |> range(start: -{window}s)\n  \
         |> filter(fn: (r) => r._measurement == \"{measurement}\")\n  \
         |> filter(fn: (r) => r._field == \"{field}\")\n  \
         |> last()",
        bucket = escape(&query.source),
        window = window_secs(query.window),
        measurement = escape(&query.measurement),
        field = escape(&query.field),
    )
}

fn window_secs(window: Duration) -> u64 {
    window.as_secs().max(1)
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
}

/// Extract the server's message from an error body, falling back to the
/// raw body text.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ApiError>(body) {
        Ok(ApiError {
            message: Some(message),
        }) => message,
        _ => {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                "empty response body".to_string()
            } else {
                trimmed.to_string()
            }
        }
    }
}

// ── CSV response ────────────────────────────────────────────────────

/// Read the first data row of a (possibly annotated) CSV response.
///
/// `now` stamps absent samples and rows without a parseable `_time`.
pub fn parse_latest(body: &str, status: u16, now: DateTime<Utc>) -> Result<MetricSample, FeedError> {
    let mut header: Option<Vec<String>> = None;

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            if header.is_some() {
                break;
            }
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        let cells = split_row(line);

        let Some(columns) = &header else {
            header = Some(cells);
            continue;
        };

        if let Some(idx) = column(columns, "error") {
            let message = cells.get(idx).cloned().unwrap_or_default();
            return Err(FeedError::Api { status, message });
        }

        let value_idx = column(columns, "_value")
            .ok_or_else(|| FeedError::Decode("response has no _value column".into()))?;
        let raw = cells
            .get(value_idx)
            .ok_or_else(|| FeedError::Decode("row is shorter than header".into()))?;
        let value: f64 = raw
            .trim()
            .parse()
            .map_err(|_| FeedError::Decode(format!("_value {raw:?} is not a number")))?;

        let timestamp = column(columns, "_time")
            .and_then(|i| cells.get(i))
            .and_then(|t| DateTime::parse_from_rfc3339(t.trim()).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(now);

        return Ok(MetricSample::observed(value, timestamp));
    }

    Ok(MetricSample::absent(now))
}

fn column(header: &[String], name: &str) -> Option<usize> {
    header.iter().position(|c| c == name)
}

/// Split one CSV row, honouring double-quoted cells.
fn split_row(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                cell.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => cells.push(std::mem::take(&mut cell)),
            _ => cell.push(c),
        }
    }
    cells.push(cell);
    cells
}

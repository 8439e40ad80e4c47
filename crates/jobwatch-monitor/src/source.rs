//! HWA (HCL Workload Automation) REST client — the production job source.
//!
//! Only the plan query the poller needs lives here:
//! `POST {base}/plan/current/jobstream/query` with basic auth and a
//! `How-Many` page-size header.

use std::time::Duration;

use async_trait::async_trait;
use jobwatch_core::config::SourceConfig;
use jobwatch_core::error::{JobWatchError, Result};
use jobwatch_core::traits::JobSource;
use jobwatch_core::types::JobSnapshot;
use reqwest::StatusCode;
use serde_json::{Value, json};

const JOBSTREAM_QUERY_PATH: &str = "/plan/current/jobstream/query";

/// Delay before the first connect retry; doubles each attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Columns requested from the plan query.
const JOBSTREAM_COLUMNS: &[&str] = &[
    "jobStreamName",
    "workstationName",
    "status",
    "startTime",
    "endTime",
    "jobInPlanOnCriticalPathFilter",
];

pub struct HwaClient {
    base_url: String,
    username: String,
    password: String,
    page_size: u32,
    connect_retries: u32,
    client: reqwest::Client,
}

impl HwaClient {
    /// Build a client from configuration.
    pub fn new(config: &SourceConfig) -> Result<Self> {
        Self::with_base_url(config.base_url(), config)
    }

    /// Build a client against an explicit base URL (plain-HTTP stubs in tests).
    pub fn with_base_url(base_url: impl Into<String>, config: &SourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!config.verify_ssl)
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| JobWatchError::SourceConnection(format!("HTTP client build failed: {e}")))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        tracing::info!(
            "HWA client for {} (SSL verification {})",
            base_url,
            if config.verify_ssl { "enabled" } else { "disabled" }
        );
        Ok(Self {
            base_url,
            username: config.username.clone(),
            password: config.password.clone(),
            page_size: config.page_size,
            connect_retries: config.connect_retries,
            client,
        })
    }
}

/// Map a non-success HTTP status onto the error taxonomy.
fn classify_status(status: StatusCode, body: &str) -> JobWatchError {
    let body: String = body.chars().take(200).collect();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            JobWatchError::SourceAuth(format!("HTTP {status}: {body}"))
        }
        _ => JobWatchError::SourceApi(format!("HTTP {status}: {body}")),
    }
}

/// Decode a plan query response. Accepts a bare array or an object wrapping
/// the rows in `items`/`data`; rows without a job stream name are dropped.
fn parse_job_streams(body: Value) -> Result<Vec<JobSnapshot>> {
    let rows = match body {
        Value::Array(rows) => rows,
        Value::Object(mut obj) => match obj.remove("items").or_else(|| obj.remove("data")) {
            Some(Value::Array(rows)) => rows,
            _ => return Err(JobWatchError::SourceApi("Response has no job stream list".into())),
        },
        Value::Null => Vec::new(),
        other => {
            return Err(JobWatchError::SourceApi(format!(
                "Unexpected response type: {}",
                other
            )));
        }
    };

    let mut snapshots = Vec::with_capacity(rows.len());
    for row in rows {
        match serde_json::from_value::<JobSnapshot>(row) {
            Ok(snap) if !snap.name.is_empty() => snapshots.push(snap),
            Ok(_) => tracing::debug!("Skipping job stream row without a name"),
            Err(e) => tracing::warn!("Skipping undecodable job stream row: {e}"),
        }
    }
    Ok(snapshots)
}

#[async_trait]
impl JobSource for HwaClient {
    fn name(&self) -> &str {
        "hwa"
    }

    async fn list_job_streams(&self) -> Result<Vec<JobSnapshot>> {
        let url = format!("{}{}", self.base_url, JOBSTREAM_QUERY_PATH);
        tracing::debug!("Request: POST {url}");

        let body = json!({ "columns": JOBSTREAM_COLUMNS });
        let mut attempt = 0;
        let resp = loop {
            let sent = self
                .client
                .post(&url)
                .basic_auth(&self.username, Some(&self.password))
                .header("How-Many", self.page_size.to_string())
                .json(&body)
                .send()
                .await;
            match sent {
                Ok(resp) => break resp,
                // Only retry when nothing reached the server.
                Err(e) if e.is_connect() && attempt < self.connect_retries => {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt.min(6));
                    attempt += 1;
                    tracing::debug!(
                        "Connect to {url} failed ({e}), retry {attempt}/{} in {delay:?}",
                        self.connect_retries
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(JobWatchError::SourceConnection(format!(
                        "POST {url} after {} attempt(s): {e}",
                        attempt + 1
                    )));
                }
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| JobWatchError::SourceConnection(format!("Reading response: {e}")))?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let body: Value = serde_json::from_str(&text)
            .map_err(|e| JobWatchError::SourceApi(format!("Invalid JSON from source: {e}")))?;
        parse_job_streams(body)
    }
}

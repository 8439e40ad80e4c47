//! Core data model — snapshots, statuses, events and the bus envelope.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Result;

/// Channel carrying `job_status_update` envelopes.
pub const JOB_UPDATES_CHANNEL: &str = "job_updates";
/// Channel carrying `alert_notification` envelopes.
pub const ALERT_CHANNEL: &str = "alert_notifications";

/// Snapshot cache contents: job name → last observed snapshot.
pub type SnapshotMap = HashMap<String, JobSnapshot>;

// ─── Status ──────────────────────────────────────────────────

/// Normalized status family.
///
/// | raw (case-insensitive)                     | code      |
/// |--------------------------------------------|-----------|
/// | `NEW`                                      | `New`     |
/// | `EXEC`, `RUNNING`                          | `Exec`    |
/// | `ABEND`, `ABENDP`                          | `Abend`   |
/// | `ERROR`                                    | `Error`   |
/// | `FAIL`, `FAILED`                           | `Fail`    |
/// | `SUCC`, `SUCCP`, `SUCCESS`, `SUCCESSFUL`   | `Success` |
/// | `HOLD`, `HELD`                             | `Hold`    |
/// | `READY`                                    | `Ready`   |
/// | `WAIT`, `WAITING`                          | `Wait`    |
/// | `CANCEL`, `CANCELLED`                      | `Cancel`  |
/// | `PEND`, `PENDING`                          | `Pend`    |
/// | `REMOVED`                                  | `Removed` |
/// | anything else                              | `Unknown` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    New,
    Exec,
    Abend,
    Error,
    Fail,
    Success,
    Hold,
    Ready,
    Wait,
    Cancel,
    Pend,
    Removed,
    Unknown,
}

impl StatusCode {
    /// Map a raw source string onto a status family.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "NEW" => Self::New,
            "EXEC" | "RUNNING" => Self::Exec,
            "ABEND" | "ABENDP" => Self::Abend,
            "ERROR" => Self::Error,
            "FAIL" | "FAILED" => Self::Fail,
            "SUCC" | "SUCCP" | "SUCCESS" | "SUCCESSFUL" => Self::Success,
            "HOLD" | "HELD" => Self::Hold,
            "READY" => Self::Ready,
            "WAIT" | "WAITING" => Self::Wait,
            "CANCEL" | "CANCELLED" => Self::Cancel,
            "PEND" | "PENDING" => Self::Pend,
            "REMOVED" => Self::Removed,
            _ => Self::Unknown,
        }
    }

    /// Canonical name, `None` for `Unknown`.
    pub fn name(&self) -> Option<&'static str> {
        match self {
            Self::New => Some("NEW"),
            Self::Exec => Some("EXEC"),
            Self::Abend => Some("ABEND"),
            Self::Error => Some("ERROR"),
            Self::Fail => Some("FAIL"),
            Self::Success => Some("SUCCESS"),
            Self::Hold => Some("HOLD"),
            Self::Ready => Some("READY"),
            Self::Wait => Some("WAIT"),
            Self::Cancel => Some("CANCEL"),
            Self::Pend => Some("PEND"),
            Self::Removed => Some("REMOVED"),
            Self::Unknown => None,
        }
    }
}

/// A job status as reported by the source, plus its normalized family.
/// Serializes as the raw string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct JobStatus {
    code: StatusCode,
    raw: String,
}

impl JobStatus {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        Self {
            code: StatusCode::parse(&raw),
            raw,
        }
    }

    /// The `NEW` sentinel used as `old_status` for first sightings.
    pub fn new_sentinel() -> Self {
        Self::new("NEW")
    }

    pub fn unknown() -> Self {
        Self::new("UNKNOWN")
    }

    pub fn removed() -> Self {
        Self::new("REMOVED")
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Canonical upper-case name; unknown statuses keep their own spelling.
    pub fn canonical(&self) -> String {
        match self.code.name() {
            Some(name) => name.to_string(),
            None => self.raw.trim().to_ascii_uppercase(),
        }
    }

    /// Case-insensitive comparison of the raw strings.
    pub fn same_as(&self, other: &JobStatus) -> bool {
        self.raw.trim().eq_ignore_ascii_case(other.raw.trim())
    }

    pub fn is_new(&self) -> bool {
        self.code == StatusCode::New
    }
}

impl From<String> for JobStatus {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for JobStatus {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.raw
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

// ─── Snapshot ────────────────────────────────────────────────

/// One job stream row as reported by the workload source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    #[serde(rename = "jobStreamName", default, deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::opt_string", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default = "JobStatus::unknown", deserialize_with = "lenient::status")]
    pub status: JobStatus,
    #[serde(rename = "workstationName", default, deserialize_with = "lenient::string")]
    pub workstation: String,
    #[serde(rename = "startTime", default, deserialize_with = "lenient::opt_string", skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(rename = "endTime", default, deserialize_with = "lenient::opt_string", skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    /// Every other field the source returned, passed through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl JobSnapshot {
    pub fn new(name: &str, status: &str, workstation: &str) -> Self {
        Self {
            name: name.to_string(),
            id: None,
            status: JobStatus::new(status),
            workstation: workstation.to_string(),
            start_time: None,
            end_time: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Source id, falling back to the job name.
    pub fn job_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }

    /// Run time in seconds, when both timestamps are RFC 3339 and ordered.
    pub fn duration_secs(&self) -> Option<f64> {
        let start = DateTime::parse_from_rfc3339(self.start_time.as_deref()?).ok()?;
        let end = DateTime::parse_from_rfc3339(self.end_time.as_deref()?).ok()?;
        let millis = (end - start).num_milliseconds();
        (millis >= 0).then(|| millis as f64 / 1000.0)
    }

    /// `errorMessage` passthrough field, if the source sent one.
    pub fn error_message(&self) -> Option<String> {
        self.extra
            .get("errorMessage")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

/// Tolerant field decoders: the source sometimes sends numbers or nulls
/// where strings are expected.
mod lenient {
    use super::*;
    use serde_json::Value;

    fn to_string(value: Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }
    }

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
        Ok(to_string(Value::deserialize(d)?).unwrap_or_default())
    }

    pub fn opt_string<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<Option<String>, D::Error> {
        Ok(to_string(Value::deserialize(d)?))
    }

    pub fn status<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<JobStatus, D::Error> {
        Ok(to_string(Value::deserialize(d)?)
            .filter(|s| !s.trim().is_empty())
            .map(JobStatus::new)
            .unwrap_or_else(JobStatus::unknown))
    }
}

// ─── Events ──────────────────────────────────────────────────

/// A detected status transition. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChangeEvent {
    pub job_id: String,
    pub job_name: String,
    pub old_status: JobStatus,
    pub new_status: JobStatus,
    pub workstation: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl StatusChangeEvent {
    /// Transition from `old` (or the `NEW` sentinel) to the state in `current`.
    pub fn transition(old: Option<&JobSnapshot>, current: &JobSnapshot, timestamp: DateTime<Utc>) -> Self {
        Self {
            job_id: current.job_id().to_string(),
            job_name: current.name.clone(),
            old_status: old
                .map(|o| o.status.clone())
                .unwrap_or_else(JobStatus::new_sentinel),
            new_status: current.status.clone(),
            workstation: current.workstation.clone(),
            timestamp,
            duration: current.duration_secs(),
            error_message: current.error_message(),
        }
    }

    /// Synthetic transition for a job that vanished from the source.
    pub fn removed(last: &JobSnapshot, timestamp: DateTime<Utc>) -> Self {
        Self {
            job_id: last.job_id().to_string(),
            job_name: last.name.clone(),
            old_status: last.status.clone(),
            new_status: JobStatus::removed(),
            workstation: last.workstation.clone(),
            timestamp,
            duration: None,
            error_message: None,
        }
    }
}

/// Alert severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertSeverity {
    #[serde(alias = "low")]
    Low,
    #[serde(alias = "medium")]
    Medium,
    #[default]
    #[serde(alias = "high")]
    High,
    #[serde(alias = "critical")]
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// An alert raised when a job crosses into a critical status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub severity: AlertSeverity,
    pub title: String,
    pub job_name: String,
    pub status: JobStatus,
    pub workstation: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    /// Name of the rule that fired.
    #[serde(default)]
    pub rule: String,
}

// ─── Envelope ────────────────────────────────────────────────

/// Wire envelope on the bus and on viewer sockets:
/// `{"type": "job_status_update" | "alert_notification", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum BusMessage {
    JobStatusUpdate(StatusChangeEvent),
    AlertNotification(AlertEvent),
}

impl BusMessage {
    /// Channel this message is published on.
    pub fn channel(&self) -> &'static str {
        match self {
            Self::JobStatusUpdate(_) => JOB_UPDATES_CHANNEL,
            Self::AlertNotification(_) => ALERT_CHANNEL,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::JobStatusUpdate(_) => "job_status_update",
            Self::AlertNotification(_) => "alert_notification",
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

/// Status reported by the job service for a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Warning,
    Error,
    /// Any other terminal status the service reports (e.g. `failed`, `stopped`).
    #[strum(default)]
    Other(String),
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Warning => "warning",
            JobStatus::Error => "error",
            JobStatus::Other(status) => status,
        }
    }

    /// A job is terminal once it has left `queued`/`running`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for JobStatus {
    fn from(status: String) -> Self {
        JobStatus::from_str(&status).unwrap_or(JobStatus::Other(status))
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.as_str().to_string()
    }
}

/// Job state as returned by `GET /v1/api/job/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    #[serde(rename = "_id")]
    pub id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub node_uuid: String,
    #[serde(default)]
    pub qname: String,
    #[serde(default)]
    pub container_image: String,
    #[serde(default)]
    pub submitted: String,
    #[serde(default)]
    pub started: String,
    #[serde(default)]
    pub ended: String,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub return_code: i32,
}

impl JobState {
    /// Wall time between `started` and `ended`, when both are RFC 3339.
    pub fn run_duration(&self) -> Option<chrono::Duration> {
        let started = chrono::DateTime::parse_from_rfc3339(&self.started).ok()?;
        let ended = chrono::DateTime::parse_from_rfc3339(&self.ended).ok()?;
        Some(ended - started)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Queue: {}, ID: {}, Status: {}, ReturnCode: {}",
            self.qname, self.id, self.status, self.return_code
        )
    }
}

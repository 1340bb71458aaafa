use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Query engines the job service can run a statement on.
///
/// Closed set; the only fallible conversion is `FromStr` at the configuration
/// boundary, so an unsupported engine is a configuration error and never a
/// runtime branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Presto,
    Hive,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Presto => "presto",
            Engine::Hive => "hive",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "presto" => Ok(Engine::Presto),
            "hive" => Ok(Engine::Hive),
            other => Err(format!(
                "Unknown 'engine:' option (available options are: hive and presto): {}",
                other
            )),
        }
    }
}

/// A job submission. Immutable once constructed; the same request may be
/// submitted repeatedly and the service deduplicates on `domain_key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub engine: Engine,
    pub database: String,
    pub query: String,
    /// Result output destination URL, if the job forwards its result set.
    pub result_url: Option<String>,
    pub priority: i32,
    pub retry_limit: u32,
    pub scheduled_time: DateTime<Utc>,
    /// Idempotency token; the service creates at most one job per key.
    pub domain_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Error,
    Killed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Error | JobStatus::Killed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Error => "error",
            JobStatus::Killed => "killed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal job state reported by the job service's completion wait.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub status: JobStatus,
    pub error_message: Option<String>,
}

/// One decoded result row: ordered column values, each a string, null, or
/// other-typed scalar.
pub type ResultRow = Vec<serde_json::Value>;

/// Outcome of a completed run, for downstream task consumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub job_id: String,
    /// First result row keyed by column name, present when the task asked to
    /// store last results. Empty result sets yield an empty map.
    pub last_results: Option<serde_json::Map<String, serde_json::Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_parse() {
        assert_eq!("presto".parse::<Engine>().unwrap(), Engine::Presto);
        assert_eq!("hive".parse::<Engine>().unwrap(), Engine::Hive);
    }

    #[test]
    fn test_engine_parse_unknown_names_options() {
        let err = "spark".parse::<Engine>().unwrap_err();
        assert!(err.contains("spark"));
        assert!(err.contains("hive and presto"));
    }

    #[test]
    fn test_engine_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Engine::Hive).unwrap(), "\"hive\"");
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(JobStatus::Success.is_terminal());
        assert!(JobStatus::Killed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }
}

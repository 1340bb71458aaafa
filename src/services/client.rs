// Remote job-service collaborator boundary.
//
// Wire format and HTTP semantics live behind this trait; the runner only
// depends on the typed surface and the error classification below.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{JobRequest, JobSummary, ResultRow};

/// Errors surfaced by a job-service client implementation.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The referenced resource does not exist. For result fetches of a
    /// DML-only job this is an expected outcome, not a failure.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The service rejected the request and will keep rejecting it.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Transient service or network failure.
    #[error("Job service error: {0}")]
    Service(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// True for errors that deterministically recur on retry. They are
    /// either legitimate outcomes (NotFound at a result fetch) or fatal; in
    /// neither case is retrying useful.
    pub fn is_deterministic(&self) -> bool {
        matches!(self, ClientError::NotFound(_) | ClientError::InvalidRequest(_))
    }
}

/// Client for the remote analytic job service.
///
/// `submit_job` must honor the request's domain key: at most one job is
/// created per key no matter how often it is called.
#[async_trait]
pub trait JobServiceClient: Send + Sync {
    /// Submits a job and returns its id. Re-submission with the same domain
    /// key returns the already-created job's id.
    async fn submit_job(&self, request: &JobRequest) -> Result<String, ClientError>;

    /// Blocks until the job reaches a terminal state and returns its summary.
    async fn wait_job_completion(&self, job_id: &str) -> Result<JobSummary, ClientError>;

    /// Ordered column names of the job's result set.
    async fn result_column_names(&self, job_id: &str) -> Result<Vec<String>, ClientError>;

    /// Streams decoded result rows into `visitor`; the visitor returns false
    /// to stop early. Yields `NotFound` for jobs without a result set.
    async fn result_rows(
        &self,
        job_id: &str,
        visitor: &mut (dyn FnMut(ResultRow) -> bool + Send),
    ) -> Result<(), ClientError>;

    /// Creates the table if it does not exist yet.
    async fn ensure_table_exists(&self, database: &str, table: &str) -> Result<(), ClientError>;

    /// Drops the table if it exists.
    async fn delete_table(&self, database: &str, table: &str) -> Result<(), ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_classification() {
        assert!(ClientError::NotFound("job 1".to_string()).is_deterministic());
        assert!(ClientError::InvalidRequest("bad".to_string()).is_deterministic());
        assert!(!ClientError::Service("reset".to_string()).is_deterministic());
        let io = ClientError::Io(std::io::Error::new(std::io::ErrorKind::Other, "x"));
        assert!(!io.is_deterministic());
    }
}

use thiserror::Error;

use crate::services::client::ClientError;

/// Task-level error types
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Job service error: {0}")]
    Client(#[from] ClientError),

    #[error("TD job {job_id} failed with status {status}")]
    JobFailed { job_id: String, status: String },

    #[error("{message}")]
    RetriesExhausted {
        message: String,
        #[source]
        source: ClientError,
    },

    #[error("State store error: {0}")]
    State(#[from] anyhow::Error),
}

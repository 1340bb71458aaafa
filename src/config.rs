use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::error::TaskError;
use crate::models::{Engine, TableTarget};
use crate::services::retry::RetryPolicy;

/// Settings for one job task, loaded from `TD_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    pub query: String,
    pub database: String,
    pub engine: Engine,
    pub insert_into: Option<TableTarget>,
    pub create_table: Option<TableTarget>,
    pub priority: i32,
    pub result_url: Option<String>,
    pub job_retry: u32,
    pub download_file: Option<String>,
    pub store_last_results: bool,
    pub preview: bool,
    pub min_retry_interval_secs: u64,
    pub max_retry_interval_secs: u64,
    pub max_retries: u32,
}

impl TaskConfig {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("engine", "presto")?
            .set_default("priority", 0)?
            .set_default("job_retry", 0)?
            .set_default("store_last_results", false)?
            .set_default("preview", false)?
            .set_default("min_retry_interval_secs", 1)?
            .set_default("max_retry_interval_secs", 30)?
            .set_default("max_retries", 10)?;

        // Load from environment variables
        if let Ok(query) = env::var("TD_QUERY") {
            builder = builder.set_override("query", query)?;
        }

        if let Ok(database) = env::var("TD_DATABASE") {
            builder = builder.set_override("database", database)?;
        }

        if let Ok(engine) = env::var("TD_ENGINE") {
            builder = builder.set_override("engine", engine)?;
        }

        if let Ok(insert_into) = env::var("TD_INSERT_INTO") {
            builder = builder.set_override("insert_into", insert_into)?;
        }

        if let Ok(create_table) = env::var("TD_CREATE_TABLE") {
            builder = builder.set_override("create_table", create_table)?;
        }

        if let Ok(result_url) = env::var("TD_RESULT_URL") {
            builder = builder.set_override("result_url", result_url)?;
        }

        if let Ok(priority) = env::var("TD_PRIORITY") {
            builder = builder.set_override("priority", priority.parse::<i32>().unwrap_or(0))?;
        }

        if let Ok(job_retry) = env::var("TD_JOB_RETRY") {
            builder = builder.set_override("job_retry", job_retry.parse::<u32>().unwrap_or(0))?;
        }

        if let Ok(download_file) = env::var("TD_DOWNLOAD_FILE") {
            builder = builder.set_override("download_file", download_file)?;
        }

        if let Ok(store_last_results) = env::var("TD_STORE_LAST_RESULTS") {
            builder = builder.set_override(
                "store_last_results",
                store_last_results.parse::<bool>().unwrap_or(false),
            )?;
        }

        if let Ok(preview) = env::var("TD_PREVIEW") {
            builder = builder.set_override("preview", preview.parse::<bool>().unwrap_or(false))?;
        }

        if let Ok(min_interval) = env::var("TD_MIN_RETRY_INTERVAL_SECS") {
            builder = builder
                .set_override("min_retry_interval_secs", min_interval.parse::<u64>().unwrap_or(1))?;
        }

        if let Ok(max_interval) = env::var("TD_MAX_RETRY_INTERVAL_SECS") {
            builder = builder
                .set_override("max_retry_interval_secs", max_interval.parse::<u64>().unwrap_or(30))?;
        }

        if let Ok(max_retries) = env::var("TD_MAX_RETRIES") {
            builder = builder.set_override("max_retries", max_retries.parse::<u32>().unwrap_or(10))?;
        }

        // Try to load from .env file
        let _ = dotenv::dotenv();

        builder.build()?.try_deserialize()
    }

    /// Rejects setting combinations that have no meaningful behavior.
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.insert_into.is_some() && self.create_table.is_some() {
            return Err(TaskError::Config(
                "Setting both insert_into and create_table is invalid".to_string(),
            ));
        }
        if self.download_file.is_some()
            && (self.insert_into.is_some() || self.create_table.is_some())
        {
            return Err(TaskError::Config(
                "download_file is invalid if insert_into or create_table is set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            min_interval: Duration::from_secs(self.min_retry_interval_secs),
            max_interval: Duration::from_secs(
                self.max_retry_interval_secs.max(self.min_retry_interval_secs),
            ),
            max_retries: self.max_retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(insert_into: Option<&str>, create_table: Option<&str>) -> TaskConfig {
        TaskConfig {
            query: "SELECT 1".to_string(),
            database: "sample".to_string(),
            engine: Engine::Presto,
            insert_into: insert_into.map(|t| t.parse().unwrap()),
            create_table: create_table.map(|t| t.parse().unwrap()),
            priority: 0,
            result_url: None,
            job_retry: 0,
            download_file: None,
            store_last_results: false,
            preview: false,
            min_retry_interval_secs: 1,
            max_retry_interval_secs: 30,
            max_retries: 10,
        }
    }

    #[test]
    fn test_validate_accepts_single_write_target() {
        assert!(minimal(Some("t"), None).validate().is_ok());
        assert!(minimal(None, Some("d.t")).validate().is_ok());
        assert!(minimal(None, None).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_both_write_targets() {
        let result = minimal(Some("a"), Some("b")).validate();
        assert!(matches!(result, Err(TaskError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_download_with_write_target() {
        let mut config = minimal(Some("t"), None);
        config.download_file = Some("out.csv".to_string());
        assert!(matches!(config.validate(), Err(TaskError::Config(_))));
    }

    #[test]
    fn test_retry_policy_clamps_max_to_min() {
        let mut config = minimal(None, None);
        config.min_retry_interval_secs = 60;
        config.max_retry_interval_secs = 5;
        let policy = config.retry_policy();
        assert_eq!(policy.max_interval, Duration::from_secs(60));
    }
}

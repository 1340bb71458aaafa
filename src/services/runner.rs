// Drives one analytic query job from submission to downstream results.
//
// Every externally visible side effect (submission, preview job, row
// download) sits behind a persisted progress key, so a crashed worker can be
// restarted and the run resumes instead of repeating remote work.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::TaskConfig;
use crate::error::TaskError;
use crate::models::{Engine, JobRequest, JobStatus, ResultRow, TableTarget, TaskResult};
use crate::output::CsvWriter;
use crate::services::client::{ClientError, JobServiceClient};
use crate::services::retry::PollingRetryExecutor;
use crate::statement::insert_command_statement;
use crate::storage::StateStore;

/// Rows shown by a preview.
pub const PREVIEW_ROWS: usize = 20;

// Progress stage keys.
const JOB: &str = "job";
const PREVIEW_JOB: &str = "previewJob";
const PREVIEW: &str = "preview";
const DOWNLOAD: &str = "download";
const RESULT: &str = "result";

/// Orchestrates one job: statement assembly, idempotent submission, waiting
/// for completion, and the download / preview / store-results sub-flows.
pub struct JobRunner<'a> {
    client: &'a dyn JobServiceClient,
    state: &'a dyn StateStore,
    config: &'a TaskConfig,
    session_time: DateTime<Utc>,
}

impl<'a> JobRunner<'a> {
    pub fn new(
        client: &'a dyn JobServiceClient,
        state: &'a dyn StateStore,
        config: &'a TaskConfig,
        session_time: DateTime<Utc>,
    ) -> Self {
        Self {
            client,
            state,
            config,
            session_time,
        }
    }

    pub async fn run(&self) -> Result<TaskResult, TaskError> {
        self.config.validate()?;

        let job_id = self.submit_main_job().await?;

        let summary = self.client.wait_job_completion(&job_id).await?;
        if summary.status != JobStatus::Success {
            if let Some(message) = &summary.error_message {
                error!("job {} failed: {}", job_id, message);
            }
            return Err(TaskError::JobFailed {
                job_id,
                status: summary.status.to_string(),
            });
        }

        self.download_job_result(&job_id).await?;

        if self.config.preview {
            self.preview_job_result(&job_id).await;
        }

        let last_results = self.build_last_results(&job_id).await?;

        Ok(TaskResult {
            job_id,
            last_results,
        })
    }

    /// Assembles the engine-specific statement and submits it under the "job"
    /// progress key. The recorded result is the job id, so a restart after
    /// the service accepted the job returns the same id without resubmitting.
    async fn submit_main_job(&self) -> Result<String, TaskError> {
        let (statement, ensure_target) = self.build_statement();
        let domain_key = self.domain_key(JOB).await?;

        let request = JobRequest {
            engine: self.config.engine,
            database: self.config.database.clone(),
            query: statement,
            result_url: self.config.result_url.clone(),
            priority: self.config.priority,
            retry_limit: self.config.job_retry,
            scheduled_time: self.session_time,
            domain_key,
        };

        let client = self.client;
        let req = &request;
        let ensure = ensure_target.as_ref();
        let default_database = self.config.database.as_str();

        let exec = self
            .retry(JOB)
            .with_error_message(format!("Failed to submit {} job", self.config.engine));
        exec.run_once(move || {
            async move {
                if let Some(target) = ensure {
                    client
                        .ensure_table_exists(target.database_or(default_database), &target.table)
                        .await?;
                }
                let job_id = client.submit_job(req).await?;
                info!("Started {} job id={}:\n{}", req.engine, job_id, req.query);
                Ok(job_id)
            }
            .boxed()
        })
        .await
    }

    /// Engine dispatch: the returned target, when present, must exist before
    /// the statement runs. Presto's CREATE TABLE AS needs no pre-created
    /// table; Hive writes always do.
    fn build_statement(&self) -> (String, Option<TableTarget>) {
        let cfg = self.config;
        match cfg.engine {
            Engine::Presto => {
                if let Some(target) = &cfg.insert_into {
                    let command = format!("INSERT INTO {}", target.escaped_presto());
                    (
                        insert_command_statement(&command, &cfg.query),
                        Some(target.clone()),
                    )
                } else if let Some(target) = &cfg.create_table {
                    // Two statements; the drop-then-create is not atomic on
                    // the service side.
                    let name = target.escaped_presto();
                    let command = format!("DROP TABLE IF EXISTS {};\nCREATE TABLE {} AS", name, name);
                    (insert_command_statement(&command, &cfg.query), None)
                } else {
                    (cfg.query.clone(), None)
                }
            }
            Engine::Hive => {
                if let Some(target) = &cfg.insert_into {
                    let command = format!("INSERT INTO TABLE {}", target.escaped_hive());
                    (
                        insert_command_statement(&command, &cfg.query),
                        Some(target.clone()),
                    )
                } else if let Some(target) = &cfg.create_table {
                    let command = format!("INSERT OVERWRITE TABLE {}", target.escaped_hive());
                    (
                        insert_command_statement(&command, &cfg.query),
                        Some(target.clone()),
                    )
                } else {
                    (cfg.query.clone(), None)
                }
            }
        }
    }

    /// Idempotency token for one submission stage. Generated once and
    /// persisted, so re-invocation after a crash submits with the same key
    /// and the service returns the already-created job.
    async fn domain_key(&self, stage: &str) -> Result<String, TaskError> {
        let key = format!("{}.domain_key", stage);
        if let Some(value) = self.state.get(&key).await? {
            if let Some(existing) = value.as_str() {
                return Ok(existing.to_string());
            }
        }
        let fresh = Uuid::new_v4().to_string();
        self.state.put(&key, Value::String(fresh.clone())).await?;
        Ok(fresh)
    }

    /// Streams the full result set into the configured download file as CSV.
    /// The file is recreated per attempt, so a retried download restarts
    /// from a clean boundary.
    async fn download_job_result(&self, job_id: &str) -> Result<(), TaskError> {
        let Some(path) = self.config.download_file.as_deref() else {
            return Ok(());
        };

        let client = self.client;
        let exec = self.retry(DOWNLOAD).with_error_message(format!(
            "Failed to download result of job '{}'",
            job_id
        ));
        exec.run_once(move || {
            async move {
                let columns = client.result_column_names(job_id).await?;
                let file = std::fs::File::create(path)?;
                let mut writer = CsvWriter::new(std::io::BufWriter::new(file));
                writer.write_header(&columns)?;

                let mut write_error: Option<std::io::Error> = None;
                client
                    .result_rows(job_id, &mut |row| match writer.write_row(&row) {
                        Ok(()) => true,
                        Err(e) => {
                            write_error = Some(e);
                            false
                        }
                    })
                    .await?;
                if let Some(e) = write_error {
                    return Err(e.into());
                }
                writer.flush()?;
                Ok(true)
            }
            .boxed()
        })
        .await?;
        Ok(())
    }

    /// Best-effort preview. A job that wrote into a table has no result set
    /// of its own, so a fresh SELECT against the destination table is
    /// submitted (under its own progress key and domain key) and previewed
    /// instead. Failures are logged and swallowed; preview never fails the
    /// job.
    async fn preview_job_result(&self, job_id: &str) {
        let write_target = self
            .config
            .insert_into
            .as_ref()
            .or(self.config.create_table.as_ref());

        let outcome = match write_target {
            Some(target) => match self.submit_preview_job(job_id).await {
                Ok(preview_job_id) => {
                    self.download_preview_rows(&preview_job_id, &format!("table {}", target))
                        .await
                }
                Err(e) => Err(e),
            },
            None => {
                self.download_preview_rows(job_id, &format!("job id {}", job_id))
                    .await
            }
        };

        if let Err(e) = outcome {
            warn!("Getting rows for preview failed. Ignoring this error: {}", e);
        }
    }

    async fn submit_preview_job(&self, job_id: &str) -> Result<String, TaskError> {
        // Checked by the caller; preview jobs only exist for write targets.
        let target = self
            .config
            .insert_into
            .as_ref()
            .or(self.config.create_table.as_ref())
            .ok_or_else(|| TaskError::Config("preview job requires a write target".to_string()))?;

        let domain_key = self.domain_key(PREVIEW_JOB).await?;
        let request = JobRequest {
            engine: Engine::Presto,
            database: self.config.database.clone(),
            query: format!(
                "-- preview results of job id {}\nSELECT * FROM {} LIMIT {}",
                job_id,
                target.escaped_presto(),
                PREVIEW_ROWS
            ),
            result_url: None,
            priority: 0,
            retry_limit: 0,
            scheduled_time: self.session_time,
            domain_key,
        };

        let client = self.client;
        let req = &request;
        let exec = self.retry(PREVIEW_JOB).with_error_message(format!(
            "Failed to submit preview job for job '{}'",
            job_id
        ));
        let preview_job_id: String = exec
            .run_once(move || async move { client.submit_job(req).await }.boxed())
            .await?;

        let summary = self.client.wait_job_completion(&preview_job_id).await?;
        if summary.status != JobStatus::Success {
            return Err(TaskError::JobFailed {
                job_id: preview_job_id,
                status: summary.status.to_string(),
            });
        }
        Ok(preview_job_id)
    }

    async fn download_preview_rows(&self, job_id: &str, description: &str) -> Result<(), TaskError> {
        let rows = self.download_first_results(job_id, PREVIEW_ROWS, PREVIEW).await?;
        if rows.is_empty() {
            info!("preview of {}: (no results)", description);
            return Ok(());
        }

        let columns = self.client.result_column_names(job_id).await?;
        let mut writer = CsvWriter::new(Vec::new());
        writer.write_header(&columns).map_err(ClientError::from)?;
        for row in &rows {
            writer.write_row(row).map_err(ClientError::from)?;
        }
        let rendered = String::from_utf8_lossy(&writer.into_inner()).into_owned();
        info!("preview of {}:\r\n{}", description, rendered);
        Ok(())
    }

    /// Captures the first result row keyed by column name, truncated to the
    /// shorter of row length and column count. Empty result sets (including
    /// DML-only jobs) yield an empty map.
    async fn build_last_results(
        &self,
        job_id: &str,
    ) -> Result<Option<Map<String, Value>>, TaskError> {
        if !self.config.store_last_results {
            return Ok(None);
        }

        let rows = self.download_first_results(job_id, 1, RESULT).await?;
        let mut last_results = Map::new();
        if let Some(row) = rows.first() {
            let columns = self.client.result_column_names(job_id).await?;
            for (name, value) in columns.iter().zip(row.iter()) {
                last_results.insert(name.clone(), value.clone());
            }
        }
        Ok(Some(last_results))
    }

    /// Fetches up to `max` rows under a progress key, caching them so a
    /// resumed run does not re-read the remote result. A NotFound response
    /// means the job produced no result set (INSERT or CREATE TABLE) and
    /// maps to an empty row list.
    async fn download_first_results(
        &self,
        job_id: &str,
        max: usize,
        stage: &str,
    ) -> Result<Vec<ResultRow>, TaskError> {
        let client = self.client;
        let exec = self.retry(stage).with_error_message(format!(
            "Failed to download result of job '{}'",
            job_id
        ));
        exec.run(move || {
            async move {
                let mut rows: Vec<ResultRow> = Vec::new();
                let fetched = client
                    .result_rows(job_id, &mut |row| {
                        rows.push(row);
                        rows.len() < max
                    })
                    .await;
                match fetched {
                    Ok(()) => Ok(rows),
                    Err(ClientError::NotFound(_)) => Ok(Vec::new()),
                    Err(e) => Err(e),
                }
            }
            .boxed()
        })
        .await
    }

    fn retry<'s>(&'s self, stage: &str) -> PollingRetryExecutor<'s> {
        PollingRetryExecutor::new(self.state, stage)
            .retry_unless(ClientError::is_deterministic)
            .with_retry_policy(self.config.retry_policy())
    }
}

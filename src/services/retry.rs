// Idempotent retry execution over persisted progress state.
//
// Every side-effecting step of a job run goes through an executor keyed by a
// stage name. The progress record lives in the caller's durable StateStore,
// so a process restart resumes from the recorded marker instead of repeating
// the step.

use std::time::Duration;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::TaskError;
use crate::services::client::ClientError;
use crate::storage::StateStore;

/// Backoff and exhaustion bounds for retried operations.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            max_retries: 10,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for the given retry ordinal (1-based), never below
    /// `min_interval` and never above `max_interval`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(20);
        let min_ms = self.min_interval.as_millis() as u64;
        let max_ms = self.max_interval.as_millis() as u64;
        let raw = min_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(raw.clamp(min_ms, max_ms.max(min_ms)))
    }
}

/// Runs an operation under a named progress key.
///
/// If a completion marker already exists for the key, the recorded result is
/// returned without invoking the operation. Otherwise the operation runs;
/// transient failures are retried with persisted backoff position, and a new
/// marker is written only on success.
pub struct PollingRetryExecutor<'a> {
    store: &'a dyn StateStore,
    key: String,
    policy: RetryPolicy,
    retry_unless: fn(&ClientError) -> bool,
    error_message: Option<String>,
}

impl<'a> PollingRetryExecutor<'a> {
    pub fn new(store: &'a dyn StateStore, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            policy: RetryPolicy::default(),
            retry_unless: |_| false,
            error_message: None,
        }
    }

    /// Classifier for deterministic errors: when it returns true the failure
    /// is surfaced immediately instead of retried.
    pub fn retry_unless(mut self, classifier: fn(&ClientError) -> bool) -> Self {
        self.retry_unless = classifier;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Message reported when retries are exhausted. Callers at result-fetch
    /// sites embed the job id here.
    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Runs `op`, caching its successful result verbatim under the progress
    /// key so resumption does not repeat the work.
    pub async fn run<T, F>(&self, op: F) -> Result<T, TaskError>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> BoxFuture<'a, Result<T, ClientError>>,
    {
        let progress = self.store.get(&self.key).await?;

        if let Some(record) = &progress {
            if record.get("done").and_then(Value::as_bool) == Some(true) {
                debug!("progress marker found for '{}', skipping", self.key);
                let recorded = record.get("result").cloned().unwrap_or(Value::Null);
                return serde_json::from_value(recorded)
                    .map_err(|e| TaskError::State(e.into()));
            }
        }

        let mut retry = progress
            .as_ref()
            .and_then(|record| record.get("retry"))
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;

        loop {
            match op().await {
                Ok(result) => {
                    let recorded =
                        serde_json::to_value(&result).map_err(|e| TaskError::State(e.into()))?;
                    self.store
                        .put(&self.key, json!({ "done": true, "result": recorded }))
                        .await?;
                    return Ok(result);
                }
                Err(e) if (self.retry_unless)(&e) => return Err(TaskError::Client(e)),
                Err(e) => {
                    if retry >= self.policy.max_retries {
                        let message = self.error_message.clone().unwrap_or_else(|| {
                            format!("Operation '{}' failed after {} retries", self.key, retry)
                        });
                        return Err(TaskError::RetriesExhausted { message, source: e });
                    }
                    retry += 1;
                    self.store.put(&self.key, json!({ "retry": retry })).await?;
                    let backoff = self.policy.backoff(retry);
                    warn!(
                        "operation '{}' failed, retrying in {:?}: {}",
                        self.key, backoff, e
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Runs `op` at most once across all process lifetimes.
    ///
    /// Mechanically identical to `run`; the distinct name marks call sites
    /// whose side effect must not repeat. When such an operation is retried
    /// before its marker is written, dedup safety comes from the domain key,
    /// not from suppressing the call.
    pub async fn run_once<T, F>(&self, op: F) -> Result<T, TaskError>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> BoxFuture<'a, Result<T, ClientError>>,
    {
        self.run(op).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStateStore;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            min_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
            max_retries: 2,
        }
    }

    #[test]
    fn test_backoff_is_bounded() {
        let policy = RetryPolicy {
            min_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            max_retries: 10,
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(5), Duration::from_secs(16));
        assert_eq!(policy.backoff(6), Duration::from_secs(30));
        assert_eq!(policy.backoff(60), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_run_once_skips_completed_operation() {
        let store = MemoryStateStore::new();
        let calls = AtomicUsize::new(0);

        let exec = PollingRetryExecutor::new(&store, "job");
        let first: String = exec
            .run_once(|| {
                async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("1234".to_string())
                }
                .boxed()
            })
            .await
            .unwrap();
        assert_eq!(first, "1234");

        let exec = PollingRetryExecutor::new(&store, "job");
        let second: String = exec
            .run_once(|| {
                async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("9999".to_string())
                }
                .boxed()
            })
            .await
            .unwrap();

        assert_eq!(second, "1234");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_until_success() {
        let store = MemoryStateStore::new();
        let calls = AtomicUsize::new(0);

        let exec = PollingRetryExecutor::new(&store, "download").with_retry_policy(fast_policy());
        let rows: u32 = exec
            .run(|| {
                async {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ClientError::Service("connection reset".to_string()))
                    } else {
                        Ok(5u32)
                    }
                }
                .boxed()
            })
            .await
            .unwrap();

        assert_eq!(rows, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let record = store.get("download").await.unwrap().unwrap();
        assert_eq!(record.get("done"), Some(&serde_json::json!(true)));
    }

    #[tokio::test]
    async fn test_exhaustion_reports_caller_message_and_cause() {
        let store = MemoryStateStore::new();
        let calls = AtomicUsize::new(0);

        let exec = PollingRetryExecutor::new(&store, "download")
            .with_retry_policy(RetryPolicy {
                min_interval: Duration::from_millis(1),
                max_interval: Duration::from_millis(1),
                max_retries: 1,
            })
            .with_error_message("Failed to download result of job '17'");

        let result: Result<u32, _> = exec
            .run(|| {
                async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ClientError::Service("boom".to_string()))
                }
                .boxed()
            })
            .await;

        match result {
            Err(TaskError::RetriesExhausted { message, source }) => {
                assert!(message.contains("job '17'"));
                assert!(source.to_string().contains("boom"));
            }
            other => panic!("expected RetriesExhausted, got {:?}", other.map(|_| ())),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_deterministic_failure_is_not_retried() {
        let store = MemoryStateStore::new();
        let calls = AtomicUsize::new(0);

        let exec = PollingRetryExecutor::new(&store, "job")
            .retry_unless(ClientError::is_deterministic)
            .with_retry_policy(fast_policy());

        let result: Result<u32, _> = exec
            .run(|| {
                async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ClientError::InvalidRequest("bad engine".to_string()))
                }
                .boxed()
            })
            .await;

        assert!(matches!(
            result,
            Err(TaskError::Client(ClientError::InvalidRequest(_)))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_persisted_retry_count_survives_restart() {
        let store = MemoryStateStore::new();
        store
            .put("download", serde_json::json!({ "retry": 5 }))
            .await
            .unwrap();
        let calls = AtomicUsize::new(0);

        // A prior process already burned through the budget; the first
        // failure after resumption must exhaust.
        let exec = PollingRetryExecutor::new(&store, "download").with_retry_policy(RetryPolicy {
            min_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(1),
            max_retries: 3,
        });
        let result: Result<u32, _> = exec
            .run(|| {
                async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ClientError::Service("still down".to_string()))
                }
                .boxed()
            })
            .await;

        assert!(matches!(result, Err(TaskError::RetriesExhausted { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

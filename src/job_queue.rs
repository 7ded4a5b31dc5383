//! C4 — durable, at-least-once, FIFO-per-queue job queue backed by Redis.
//!
//! `enqueue` pushes a job record onto a list (the queue) and stores its
//! status under a separate key so `status` lookups don't require scanning
//! the list. The worker loop (`run_worker`) pops from the list, dispatches
//! by function name through a registered handler table, and commits the
//! terminal state.

use crate::error::QueueError;
use chrono::Utc;
use deadpool_redis::{Config as RedisConfig, Pool, Runtime};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

const QUEUE_KEY: &str = "home_assistant:jobs:queue";
const STATUS_KEY_PREFIX: &str = "home_assistant:jobs:status:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub state: JobState,
    pub enqueued_at: String,
    pub completed_at: Option<String>,
    pub error: Option<String>,
}

/// `not_found` is represented explicitly as a sum type, not a trailing
/// `None` sentinel.
pub enum StatusLookup {
    Found(JobStatus),
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JobRecord {
    job_id: String,
    function_name: String,
    args: serde_json::Value,
}

pub type JobHandler = Arc<
    dyn Fn(serde_json::Value) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>>
        + Send
        + Sync,
>;

#[derive(Clone)]
pub struct JobQueue {
    pool: Pool,
}

impl JobQueue {
    pub async fn new(host: &str, port: u16) -> Result<Self, QueueError> {
        let cfg = RedisConfig::from_url(format!("redis://{host}:{port}"));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Durable (survives process restart because it lives in Redis),
    /// at-least-once, FIFO per queue (list push/pop order).
    pub async fn enqueue(
        &self,
        function_name: &str,
        args: serde_json::Value,
    ) -> Result<String, QueueError> {
        let job_id = Uuid::new_v4().to_string();
        let record = JobRecord {
            job_id: job_id.clone(),
            function_name: function_name.to_string(),
            args,
        };

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        let status = JobStatus {
            job_id: job_id.clone(),
            state: JobState::Queued,
            enqueued_at: Utc::now().to_rfc3339(),
            completed_at: None,
            error: None,
        };

        let payload = serde_json::to_string(&record)?;
        let status_payload = serde_json::to_string(&status)?;

        let _: () = conn
            .rpush(QUEUE_KEY, payload)
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        let _: () = conn
            .set(format!("{STATUS_KEY_PREFIX}{job_id}"), status_payload)
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        info!(job_id = %job_id, function_name, "job enqueued");
        Ok(job_id)
    }

    pub async fn status(&self, job_id: &str) -> Result<StatusLookup, QueueError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        let raw: Option<String> = conn
            .get(format!("{STATUS_KEY_PREFIX}{job_id}"))
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        match raw {
            None => Ok(StatusLookup::NotFound),
            Some(raw) => Ok(StatusLookup::Found(serde_json::from_str(&raw)?)),
        }
    }

    async fn set_status(&self, status: &JobStatus) -> Result<(), QueueError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        let payload = serde_json::to_string(status)?;
        let _: () = conn
            .set(format!("{STATUS_KEY_PREFIX}{}", status.job_id), payload)
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        Ok(())
    }

    /// Claim a job, invoke the registered handler, commit the terminal
    /// state. Bounded by `per_job_timeout`; a timed-out job is failed.
    /// Blocks on the queue's pop call; run this in its own task.
    pub async fn run_worker(
        &self,
        handlers: HashMap<String, JobHandler>,
        max_concurrent_jobs: usize,
        per_job_timeout: Duration,
    ) {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(max_concurrent_jobs));
        loop {
            let mut conn = match self.pool.get().await {
                Ok(c) => c,
                Err(e) => {
                    warn!("job queue connection failed: {e}, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let popped: Option<(String, String)> = match conn.blpop(QUEUE_KEY, 1.0).await {
                Ok(v) => v,
                Err(e) => {
                    warn!("job queue pop failed: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let Some((_, payload)) = popped else {
                continue;
            };

            let Ok(record) = serde_json::from_str::<JobRecord>(&payload) else {
                error!("dropping malformed job payload");
                continue;
            };

            let Some(handler) = handlers.get(&record.function_name).cloned() else {
                error!(function_name = %record.function_name, "no handler registered");
                continue;
            };

            let queue = self.clone();
            let permit = semaphore.clone().acquire_owned().await.unwrap();

            tokio::spawn(async move {
                let _permit = permit;

                // Preserve the timestamp recorded at `enqueue` time across every
                // later status write; only `state`/`completed_at`/`error` change.
                let enqueued_at = match queue.status(&record.job_id).await {
                    Ok(StatusLookup::Found(existing)) => existing.enqueued_at,
                    _ => Utc::now().to_rfc3339(),
                };

                if let Err(e) = queue
                    .set_status(&JobStatus {
                        job_id: record.job_id.clone(),
                        state: JobState::Processing,
                        enqueued_at: enqueued_at.clone(),
                        completed_at: None,
                        error: None,
                    })
                    .await
                {
                    error!(job_id = %record.job_id, error = %e, "failed to record processing status");
                }

                let result = tokio::time::timeout(per_job_timeout, handler(record.args)).await;

                let final_status = match result {
                    Ok(Ok(())) => JobStatus {
                        job_id: record.job_id.clone(),
                        state: JobState::Completed,
                        enqueued_at: enqueued_at.clone(),
                        completed_at: Some(Utc::now().to_rfc3339()),
                        error: None,
                    },
                    Ok(Err(err)) => JobStatus {
                        job_id: record.job_id.clone(),
                        state: JobState::Failed,
                        enqueued_at: enqueued_at.clone(),
                        completed_at: Some(Utc::now().to_rfc3339()),
                        error: Some(err),
                    },
                    Err(_) => JobStatus {
                        job_id: record.job_id.clone(),
                        state: JobState::Failed,
                        enqueued_at: enqueued_at.clone(),
                        completed_at: Some(Utc::now().to_rfc3339()),
                        error: Some("job timed out".to_string()),
                    },
                };

                if let Err(e) = queue.set_status(&final_status).await {
                    error!("failed to commit terminal job status: {e}");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_serializes_lowercase_state() {
        let status = JobStatus {
            job_id: "j1".to_string(),
            state: JobState::Queued,
            enqueued_at: "2026-01-01T00:00:00Z".to_string(),
            completed_at: None,
            error: None,
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"queued\""));
    }
}

//! Background jobs with pollable status.
//!
//! Long operations (parse, build, refresh) run as tokio tasks registered
//! here. Each gets a UUID; its [`JobInfo`] moves through
//! `pending → running → done | failed` and keeps the task's JSON result or
//! error message once finished.
//!
//! A finished task drops its own join handle. Only the most recent
//! finished jobs are kept; older ones are evicted as new jobs finish.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: Uuid,
    pub kind: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Finished jobs kept by [`JobRegistry::new`].
pub const DEFAULT_RETAINED_JOBS: usize = 100;

#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<Uuid, JobInfo>>>,
    /// Handles of tasks that have not finished yet.
    handles: Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>,
    retained: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAINED_JOBS)
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `retained` finished jobs. Pending and running jobs are
    /// never evicted.
    pub fn with_retention(retained: usize) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            handles: Arc::new(Mutex::new(HashMap::new())),
            retained,
        }
    }

    /// Register `task` under a new id and start it in the background.
    pub async fn spawn<F, T, E>(&self, kind: &str, task: F) -> Uuid
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Serialize + Send + 'static,
        E: Display + Send + 'static,
    {
        let id = Uuid::new_v4();
        let info = JobInfo {
            id,
            kind: kind.to_string(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        };
        self.jobs.write().await.insert(id, info);

        let jobs = Arc::clone(&self.jobs);
        let handles = Arc::clone(&self.handles);
        let retained = self.retained;
        let kind = kind.to_string();

        // Held until the handle is registered, so the task cannot try to
        // drop its handle before it exists.
        let mut registered = self.handles.lock().await;
        let handle = tokio::spawn(async move {
            if let Some(job) = jobs.write().await.get_mut(&id) {
                job.status = JobStatus::Running;
                job.started_at = Some(Utc::now());
            }

            let outcome = task.await;

            {
                let mut jobs = jobs.write().await;
                if let Some(job) = jobs.get_mut(&id) {
                    record_outcome(job, &kind, outcome);
                }
                evict_finished(&mut jobs, retained);
            }
            handles.lock().await.remove(&id);
        });
        registered.insert(id, handle);

        id
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        self.jobs.read().await.get(&id).cloned()
    }

    /// All jobs, newest first.
    pub async fn list(&self) -> Vec<JobInfo> {
        let mut jobs: Vec<JobInfo> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Wait for a job's task to finish and return its final state.
    pub async fn wait(&self, id: Uuid) -> Option<JobInfo> {
        let handle = self.handles.lock().await.remove(&id);
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(job = %id, error = %e, "job task aborted");
                if let Some(job) = self.jobs.write().await.get_mut(&id) {
                    job.status = JobStatus::Failed;
                    job.finished_at = Some(Utc::now());
                    job.error = Some(e.to_string());
                }
            }
        }
        self.get(id).await
    }
}

fn record_outcome<T, E>(job: &mut JobInfo, kind: &str, outcome: Result<T, E>)
where
    T: Serialize,
    E: Display,
{
    job.finished_at = Some(Utc::now());
    match outcome {
        Ok(value) => match serde_json::to_value(&value) {
            Ok(json) => {
                job.status = JobStatus::Done;
                job.result = Some(json);
                info!(job = %job.id, kind, "job finished");
            }
            Err(e) => {
                job.status = JobStatus::Failed;
                job.error = Some(format!("result encoding failed: {e}"));
            }
        },
        Err(e) => {
            job.status = JobStatus::Failed;
            job.error = Some(e.to_string());
            warn!(job = %job.id, kind, error = %e, "job failed");
        }
    }
}

/// Drop the oldest finished jobs until at most `retained` remain.
fn evict_finished(jobs: &mut HashMap<Uuid, JobInfo>, retained: usize) {
    let mut finished: Vec<(DateTime<Utc>, Uuid)> = jobs
        .values()
        .filter(|job| job.status.is_finished())
        .map(|job| (job.finished_at.unwrap_or(job.created_at), job.id))
        .collect();
    if finished.len() <= retained {
        return;
    }

    finished.sort();
    let excess = finished.len() - retained;
    for (_, id) in finished.into_iter().take(excess) {
        jobs.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_job() {
        let jobs = JobRegistry::new();
        let id = jobs
            .spawn("count", async { Ok::<_, String>(serde_json::json!({"n": 3})) })
            .await;

        let info = jobs.wait(id).await.unwrap();
        assert_eq!(info.status, JobStatus::Done);
        assert_eq!(info.result.unwrap()["n"], 3);
        assert!(info.started_at.is_some());
        assert!(info.finished_at.is_some());
        assert!(info.error.is_none());
    }

    #[tokio::test]
    async fn test_failed_job() {
        let jobs = JobRegistry::new();
        let id = jobs
            .spawn("boom", async { Err::<(), _>("exploded".to_string()) })
            .await;

        let info = jobs.wait(id).await.unwrap();
        assert_eq!(info.status, JobStatus::Failed);
        assert_eq!(info.error.as_deref(), Some("exploded"));
        assert!(info.status.is_finished());
    }

    #[tokio::test]
    async fn test_pending_or_running_before_completion() {
        let jobs = JobRegistry::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let id = jobs
            .spawn("gated", async move {
                let _ = rx.await;
                Ok::<_, String>(())
            })
            .await;

        let status = jobs.get(id).await.unwrap().status;
        assert!(matches!(status, JobStatus::Pending | JobStatus::Running));

        tx.send(()).unwrap();
        assert_eq!(jobs.wait(id).await.unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let jobs = JobRegistry::new();
        assert!(jobs.get(Uuid::new_v4()).await.is_none());
        assert!(jobs.wait(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let jobs = JobRegistry::new();
        let first = jobs.spawn("a", async { Ok::<_, String>(()) }).await;
        jobs.wait(first).await;
        let second = jobs.spawn("b", async { Ok::<_, String>(()) }).await;
        jobs.wait(second).await;

        let listed = jobs.list().await;
        assert_eq!(listed.len(), 2);
        assert!(listed[0].created_at >= listed[1].created_at);
    }

    async fn poll_until_finished(jobs: &JobRegistry, ids: &[Uuid]) {
        for _ in 0..500 {
            let mut all_finished = true;
            for id in ids {
                if let Some(info) = jobs.get(*id).await {
                    all_finished &= info.status.is_finished();
                }
            }
            if all_finished && jobs.handles.lock().await.is_empty() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("jobs did not finish");
    }

    #[tokio::test]
    async fn test_finished_jobs_release_handles() {
        let jobs = JobRegistry::new();
        let mut ids = Vec::new();
        for n in 0..200 {
            ids.push(jobs.spawn("count", async move { Ok::<_, String>(n) }).await);
        }

        poll_until_finished(&jobs, &ids).await;
        assert!(jobs.handles.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_only_recent_finished_jobs_are_retained() {
        let jobs = JobRegistry::with_retention(3);
        let mut ids = Vec::new();
        for n in 0..10 {
            let id = jobs.spawn("count", async move { Ok::<_, String>(n) }).await;
            jobs.wait(id).await;
            ids.push(id);
        }

        let listed = jobs.list().await;
        assert_eq!(listed.len(), 3);
        assert!(jobs.get(ids[0]).await.is_none());
        assert_eq!(jobs.get(ids[9]).await.unwrap().result.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_running_jobs_are_never_evicted() {
        let jobs = JobRegistry::with_retention(0);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let gated = jobs
            .spawn("gated", async move {
                let _ = rx.await;
                Ok::<_, String>(())
            })
            .await;
        let quick = jobs.spawn("quick", async { Ok::<_, String>(()) }).await;
        jobs.wait(quick).await;

        assert!(jobs.get(gated).await.is_some());
        assert!(jobs.get(quick).await.is_none());
        tx.send(()).unwrap();
    }
}

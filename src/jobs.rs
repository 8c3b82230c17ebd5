//! In-process registry of sync jobs.
//!
//! Jobs live only as long as the process. Cancelling a job trips its
//! [`CancellationToken`]; the export engine stops at the next batch boundary.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::change::ChangeStats;
use crate::readiness::DevReadyStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncJobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SyncJobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            SyncJobStatus::Completed | SyncJobStatus::Failed | SyncJobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncJob {
    pub sync_id: Uuid,
    pub file_key: String,
    pub status: SyncJobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Share of export work done, `0.0..=1.0`
    pub progress: f32,
    pub change_stats: Option<ChangeStats>,
    pub dev_ready_stats: BTreeMap<DevReadyStatus, usize>,
    pub errors: Vec<String>,
}

/// Reports export progress for one job without touching the registry lock.
#[derive(Clone)]
pub struct ProgressHandle(Arc<watch::Sender<f32>>);

impl ProgressHandle {
    pub fn set(&self, done: usize, total: usize) {
        let value = if total == 0 {
            1.0
        } else {
            (done as f32 / total as f32).clamp(0.0, 1.0)
        };
        self.0.send_replace(value);
    }
}

struct JobEntry {
    job: SyncJob,
    cancel: CancellationToken,
    progress: Arc<watch::Sender<f32>>,
}

impl JobEntry {
    fn snapshot(&self) -> SyncJob {
        let mut job = self.job.clone();
        job.progress = *self.progress.borrow();
        job
    }
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<Uuid, JobEntry>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queued job. The token is tripped by [`cancel`](Self::cancel).
    pub async fn create(&self, file_key: &str) -> (Uuid, CancellationToken) {
        let sync_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (progress, _) = watch::channel(0.0);
        let entry = JobEntry {
            job: SyncJob {
                sync_id,
                file_key: file_key.to_string(),
                status: SyncJobStatus::Queued,
                created_at: Utc::now(),
                started_at: None,
                finished_at: None,
                progress: 0.0,
                change_stats: None,
                dev_ready_stats: BTreeMap::new(),
                errors: Vec::new(),
            },
            cancel: cancel.clone(),
            progress: Arc::new(progress),
        };
        self.jobs.write().await.insert(sync_id, entry);
        debug!(%sync_id, file_key, "sync job queued");
        (sync_id, cancel)
    }

    pub async fn start(&self, sync_id: Uuid) {
        self.update(sync_id, |job| {
            if job.status == SyncJobStatus::Queued {
                job.status = SyncJobStatus::Running;
                job.started_at = Some(Utc::now());
            }
        })
        .await;
    }

    pub async fn progress_handle(&self, sync_id: Uuid) -> Option<ProgressHandle> {
        self.jobs
            .read()
            .await
            .get(&sync_id)
            .map(|entry| ProgressHandle(Arc::clone(&entry.progress)))
    }

    pub async fn record_stats(
        &self,
        sync_id: Uuid,
        change_stats: ChangeStats,
        dev_ready_stats: BTreeMap<DevReadyStatus, usize>,
    ) {
        self.update(sync_id, |job| {
            job.change_stats = Some(change_stats);
            job.dev_ready_stats = dev_ready_stats;
        })
        .await;
    }

    pub async fn push_error(&self, sync_id: Uuid, error: impl Into<String>) {
        let error = error.into();
        self.update(sync_id, |job| job.errors.push(error)).await;
    }

    /// Mark the job finished. A job whose token was tripped ends as
    /// `cancelled` whatever `succeeded` says.
    pub async fn finish(&self, sync_id: Uuid, succeeded: bool) {
        let mut jobs = self.jobs.write().await;
        let Some(entry) = jobs.get_mut(&sync_id) else {
            return;
        };
        if entry.job.status.is_finished() {
            return;
        }
        entry.job.status = if entry.cancel.is_cancelled() {
            SyncJobStatus::Cancelled
        } else if succeeded {
            entry.progress.send_replace(1.0);
            SyncJobStatus::Completed
        } else {
            SyncJobStatus::Failed
        };
        entry.job.finished_at = Some(Utc::now());
        info!(%sync_id, status = ?entry.job.status, "sync job finished");
    }

    /// Request cancellation. Returns `false` for unknown or finished jobs.
    pub async fn cancel(&self, sync_id: Uuid) -> bool {
        let mut jobs = self.jobs.write().await;
        let Some(entry) = jobs.get_mut(&sync_id) else {
            return false;
        };
        if entry.job.status.is_finished() {
            return false;
        }
        entry.cancel.cancel();
        if entry.job.status == SyncJobStatus::Queued {
            entry.job.status = SyncJobStatus::Cancelled;
            entry.job.finished_at = Some(Utc::now());
        }
        info!(%sync_id, "sync job cancellation requested");
        true
    }

    /// Cancel every queued or running job; returns how many were asked to stop.
    pub async fn cancel_unfinished(&self) -> usize {
        let mut cancelled = 0;
        for job in self.list().await {
            if self.cancel(job.sync_id).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub async fn get(&self, sync_id: Uuid) -> Option<SyncJob> {
        self.jobs.read().await.get(&sync_id).map(JobEntry::snapshot)
    }

    /// All jobs, oldest first.
    pub async fn list(&self) -> Vec<SyncJob> {
        let mut jobs: Vec<SyncJob> = self.jobs.read().await.values().map(JobEntry::snapshot).collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    async fn update(&self, sync_id: Uuid, apply: impl FnOnce(&mut SyncJob)) {
        if let Some(entry) = self.jobs.write().await.get_mut(&sync_id) {
            apply(&mut entry.job);
        }
    }
}

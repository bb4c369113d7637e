//! Job status tracking for background pipeline runs.
//!
//! ## Lifecycle
//!
//! ```text
//! created ──▶ processing ──▶ completed
//!    │            │
//!    └────────────┴───────▶ failed
//! ```
//!
//! `completed` and `failed` are terminal: once a record reaches either, the
//! tracker rejects every further transition. Records live for the lifetime of
//! the process only; a resumed job re-derives its progress from the artifacts
//! in its working directory, not from the tracker.
//!
//! The tracker is the only state shared between a running job and the
//! status-polling path, so every read-modify-write of a record happens under
//! one mutex.

use crate::controller::{Pipeline, RunSummary, StepSelection};
use crate::error::{PipelineError, Result};
use crate::progress::PipelineObserver;
use crate::steps::Step;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

pub const COMPLETED_MESSAGE: &str = "Processing completed successfully!";

// ═══════════════════════════════════════════════════════════
// Status
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Created,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn can_become(&self, next: JobStatus) -> bool {
        !self.is_terminal() && next != JobStatus::Created
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════
// Records
// ═══════════════════════════════════════════════════════════

/// Sub-progress of the running step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
}

/// Snapshot of one job, as returned by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub status: JobStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Packaged working directory; set once the job completes.
    #[serde(skip)]
    pub bundle: Option<PathBuf>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {0} already exists")]
    AlreadyExists(Uuid),

    #[error("job {id} is {from}; cannot become {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },
}

// ═══════════════════════════════════════════════════════════
// Tracker
// ═══════════════════════════════════════════════════════════

/// Process-wide map from job id to its status record.
#[derive(Debug, Default)]
pub struct JobTracker {
    jobs: Mutex<HashMap<Uuid, JobRecord>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, JobRecord>> {
        // A panic while holding the lock cannot leave a record half-written:
        // every mutation below is a plain field assignment.
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new job in the `created` state.
    pub fn create(&self, id: Uuid) -> Result<JobRecord, JobError> {
        let mut jobs = self.lock();
        if jobs.contains_key(&id) {
            return Err(JobError::AlreadyExists(id));
        }
        let now = Utc::now();
        let record = JobRecord {
            id,
            status: JobStatus::Created,
            message: "Job created".into(),
            step: None,
            progress: None,
            created_at: now,
            updated_at: now,
            bundle: None,
        };
        jobs.insert(id, record.clone());
        Ok(record)
    }

    /// Move a job to `status` with a new message.
    pub fn update(
        &self,
        id: Uuid,
        status: JobStatus,
        message: impl Into<String>,
    ) -> Result<(), JobError> {
        self.modify(id, |record| {
            if !record.status.can_become(status) {
                return Err(JobError::InvalidTransition {
                    id,
                    from: record.status,
                    to: status,
                });
            }
            record.status = status;
            record.message = message.into();
            if status.is_terminal() {
                record.progress = None;
            }
            Ok(())
        })
    }

    /// Record the step now running, clearing the previous step's progress.
    pub fn set_step(&self, id: Uuid, step: &str, message: impl Into<String>) -> Result<(), JobError> {
        self.modify_live(id, |record| {
            record.step = Some(step.to_string());
            record.progress = None;
            record.message = message.into();
        })
    }

    pub fn set_progress(
        &self,
        id: Uuid,
        done: usize,
        total: usize,
        message: impl Into<String>,
    ) -> Result<(), JobError> {
        self.modify_live(id, |record| {
            record.progress = Some(Progress { done, total });
            record.message = message.into();
        })
    }

    /// Attach the finished bundle and mark the job `completed`.
    pub fn set_result(&self, id: Uuid, bundle: PathBuf) -> Result<(), JobError> {
        self.modify(id, |record| {
            if !record.status.can_become(JobStatus::Completed) {
                return Err(JobError::InvalidTransition {
                    id,
                    from: record.status,
                    to: JobStatus::Completed,
                });
            }
            record.status = JobStatus::Completed;
            record.message = COMPLETED_MESSAGE.into();
            record.progress = None;
            record.bundle = Some(bundle);
            Ok(())
        })
    }

    pub fn get(&self, id: Uuid) -> Result<JobRecord, JobError> {
        self.lock().get(&id).cloned().ok_or(JobError::NotFound(id))
    }

    /// Every record, oldest first.
    pub fn list(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self.lock().values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    fn modify(
        &self,
        id: Uuid,
        change: impl FnOnce(&mut JobRecord) -> Result<(), JobError>,
    ) -> Result<(), JobError> {
        let mut jobs = self.lock();
        let record = jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
        change(record)?;
        record.updated_at = Utc::now();
        Ok(())
    }

    /// Progress updates are only accepted while a job is still live.
    fn modify_live(&self, id: Uuid, change: impl FnOnce(&mut JobRecord)) -> Result<(), JobError> {
        self.modify(id, |record| {
            if record.status.is_terminal() {
                return Err(JobError::InvalidTransition {
                    id,
                    from: record.status,
                    to: JobStatus::Processing,
                });
            }
            change(record);
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════
// Observer
// ═══════════════════════════════════════════════════════════

/// Mirrors pipeline events into one tracker record.
pub struct TrackerObserver {
    tracker: Arc<JobTracker>,
    id: Uuid,
}

impl TrackerObserver {
    pub fn new(tracker: Arc<JobTracker>, id: Uuid) -> Self {
        Self { tracker, id }
    }

    fn record(&self, result: Result<(), JobError>) {
        if let Err(e) = result {
            debug!("Ignoring progress event: {}", e);
        }
    }
}

fn step_label(step: &str) -> String {
    match Step::from_name(step) {
        Some(s) => format!("Step {}: {}", s.number(), s.describe()),
        None => step.to_string(),
    }
}

impl PipelineObserver for TrackerObserver {
    fn on_step_start(&self, step: &'static str) {
        self.record(
            self.tracker
                .set_step(self.id, step, format!("{}...", step_label(step))),
        );
    }

    fn on_step_skipped(&self, step: &'static str) {
        self.record(self.tracker.set_step(
            self.id,
            step,
            format!("{}: already done, skipping", step_label(step)),
        ));
    }

    fn on_subtask_progress(&self, step: &'static str, done: usize, total: usize, message: &str) {
        self.record(self.tracker.set_progress(
            self.id,
            done,
            total,
            format!("{}: {}", step_label(step), message),
        ));
    }
}

// ═══════════════════════════════════════════════════════════
// Running jobs
// ═══════════════════════════════════════════════════════════

/// Drive `pipeline` for job `id`, mirroring progress into `tracker`.
///
/// On success the working directory is packaged to `bundle` and the job is
/// marked `completed`. Any failure, packaging included, marks it `failed`
/// with `"Error: {cause}"`. Artifacts already written are left in place.
pub async fn run_job(
    tracker: Arc<JobTracker>,
    id: Uuid,
    pipeline: Pipeline,
    selection: StepSelection,
    bundle: PathBuf,
) -> Result<RunSummary> {
    if let Err(e) = tracker.update(id, JobStatus::Processing, "Job started") {
        return Err(PipelineError::Internal(e.to_string()));
    }
    let pipeline = pipeline.observer(Arc::new(TrackerObserver::new(tracker.clone(), id)));

    let outcome = match pipeline.run(&selection).await {
        Ok(summary) => pack_workdir(pipeline.store().root(), &bundle)
            .await
            .map(|()| summary),
        Err(e) => Err(e),
    };

    match outcome {
        Ok(summary) => {
            info!("Job {} completed: {}", id, bundle.display());
            if let Err(e) = tracker.set_result(id, bundle) {
                return Err(PipelineError::Internal(e.to_string()));
            }
            Ok(summary)
        }
        Err(e) => {
            error!("Job {} failed: {}", id, e);
            if let Err(te) = tracker.update(id, JobStatus::Failed, format!("Error: {e}")) {
                debug!("Could not record failure: {}", te);
            }
            Err(e)
        }
    }
}

/// Write `workdir` as a gzip-compressed tarball at `dest`.
///
/// Entries are rooted at the working directory's own name, so the archive
/// unpacks into a single folder.
pub async fn pack_workdir(workdir: &Path, dest: &Path) -> Result<()> {
    let root = workdir.to_path_buf();
    let prefix = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "job".into());

    let bytes = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
        let mut tar_bytes = Vec::new();
        {
            let gz = flate2::write::GzEncoder::new(&mut tar_bytes, flate2::Compression::default());
            let mut tar = tar::Builder::new(gz);
            tar.append_dir_all(&prefix, &root)
                .map_err(|e| PipelineError::store(&root, e))?;
            tar.into_inner()
                .and_then(|gz| gz.finish())
                .map_err(|e| PipelineError::store(&root, e))?;
        }
        Ok(tar_bytes)
    })
    .await
    .map_err(|e| PipelineError::Internal(format!("packaging task panicked: {e}")))??;

    tokio::fs::write(dest, &bytes)
        .await
        .map_err(|e| PipelineError::store(dest, e))?;
    debug!("Packed {} bytes into {}", bytes.len(), dest.display());
    Ok(())
}

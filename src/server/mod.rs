//! HTTP front end: job submission, status polling and bundle download.
//!
//! ```text
//! POST /api/jobs               upload a PDF, start a job      → 202 {job_id}
//! GET  /api/jobs               every job record
//! GET  /api/jobs/:id           {status, message, step?, progress?}
//! GET  /api/jobs/:id/download  {id}.tar.gz once completed      (409 before)
//! GET  /api/styles             the style registry
//! GET  /api/health             liveness
//! ```
//!
//! Every job gets its own working directory under the data directory:
//! `{data_dir}/{id}.pdf` is the upload, `{data_dir}/{id}/` the artifacts and
//! `{data_dir}/{id}.tar.gz` the bundle. Jobs run on background tokio tasks;
//! the only state they share with request handlers is the [`JobTracker`].

pub mod error;
pub mod handlers;

use crate::config::PipelineConfig;
use crate::controller::Pipeline;
use crate::error::Result;
use crate::jobs::JobTracker;
use async_trait::async_trait;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Largest PDF accepted by `POST /api/jobs`.
pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Request body limit: base64 inflates by 4/3, plus room for the JSON fields.
const MAX_BODY_BYTES: usize = MAX_UPLOAD_BYTES / 3 * 4 + 64 * 1024;

/// Builds the pipeline for a submitted job.
#[async_trait]
pub trait PipelineFactory: Send + Sync {
    async fn create(&self, config: PipelineConfig, workdir: &Path, pdf: &Path) -> Result<Pipeline>;
}

/// Pipelines with the real LLM, pdfium, PubMed and pandoc collaborators.
pub struct DefaultPipelineFactory;

#[async_trait]
impl PipelineFactory for DefaultPipelineFactory {
    async fn create(&self, config: PipelineConfig, workdir: &Path, pdf: &Path) -> Result<Pipeline> {
        Pipeline::from_config(config, workdir, pdf).await
    }
}

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<JobTracker>,
    pub data_dir: PathBuf,
    /// Server-wide defaults; each submission may override provider, model,
    /// style, keys, email and worker count.
    pub base_config: PipelineConfig,
    pub factory: Arc<dyn PipelineFactory>,
}

impl AppState {
    pub fn new(data_dir: impl Into<PathBuf>, base_config: PipelineConfig) -> Self {
        Self {
            tracker: Arc::new(JobTracker::new()),
            data_dir: data_dir.into(),
            base_config,
            factory: Arc::new(DefaultPipelineFactory),
        }
    }

    /// Replace the pipeline factory.
    pub fn with_factory(mut self, factory: Arc<dyn PipelineFactory>) -> Self {
        self.factory = factory;
        self
    }
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    // NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).
    let api = Router::new()
        .route("/health", get(handlers::health))
        .route("/styles", get(handlers::styles))
        .route("/jobs", post(handlers::create_job).get(handlers::list_jobs))
        .route("/jobs/:id", get(handlers::job_status))
        .route("/jobs/:id/download", get(handlers::download))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES));

    Router::new().nest("/api", api)
}

//! Request handlers for the job API.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::error::ApiError;
use super::{AppState, MAX_UPLOAD_BYTES};
use crate::config::{PipelineConfig, ProviderChoice};
use crate::controller::StepSelection;
use crate::jobs::{self, JobRecord, JobStatus};
use crate::style::{self, StyleConfig};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// `GET /api/health`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /api/styles`
pub async fn styles() -> Json<&'static [StyleConfig]> {
    Json(style::STYLES)
}

/// Body of `POST /api/jobs`.
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub filename: String,
    pub pdf_base64: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub style: Option<String>,
    pub email: Option<String>,
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub workers: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct CreateJobResponse {
    pub job_id: Uuid,
}

/// Decode and sanity-check an uploaded PDF.
fn decode_pdf(request: &CreateJobRequest) -> Result<Vec<u8>, ApiError> {
    if !request.filename.to_lowercase().ends_with(".pdf") {
        return Err(ApiError::BadRequest(format!(
            "'{}' is not a .pdf file",
            request.filename
        )));
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(request.pdf_base64.trim())
        .map_err(|e| ApiError::BadRequest(format!("pdf_base64 is not valid base64: {e}")))?;
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(ApiError::PayloadTooLarge(format!(
            "PDF is {} bytes; the limit is {} bytes",
            bytes.len(),
            MAX_UPLOAD_BYTES
        )));
    }
    if !bytes.starts_with(b"%PDF") {
        return Err(ApiError::BadRequest("upload is not a PDF".into()));
    }
    Ok(bytes)
}

/// Apply a submission's overrides to the server defaults.
fn job_config(base: &PipelineConfig, request: &CreateJobRequest) -> Result<PipelineConfig, ApiError> {
    let mut builder = base.clone().into_builder();
    if let Some(provider) = &request.provider {
        builder = builder.provider(provider.parse::<ProviderChoice>()?);
    }
    if let Some(model) = request.model.as_deref().filter(|m| !m.trim().is_empty()) {
        builder = builder.model(model.trim());
    }
    if let Some(style) = &request.style {
        builder = builder.style(style.as_str());
    }
    if let Some(email) = request.email.as_deref().filter(|e| !e.trim().is_empty()) {
        builder = builder.email(email.trim());
    }
    if let Some(key) = request.gemini_api_key.as_deref().filter(|k| !k.is_empty()) {
        builder = builder.gemini_api_key(key);
    }
    if let Some(key) = request.openai_api_key.as_deref().filter(|k| !k.is_empty()) {
        builder = builder.openai_api_key(key);
    }
    if let Some(workers) = request.workers {
        if workers == 0 {
            return Err(ApiError::BadRequest("workers must be at least 1".into()));
        }
        builder = builder.concurrency(workers);
    }
    Ok(builder.build()?)
}

/// `POST /api/jobs`: store the upload and start the pipeline in the background.
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<CreateJobResponse>), ApiError> {
    let pdf = decode_pdf(&request)?;
    let config = job_config(&state.base_config, &request)?;

    let id = Uuid::new_v4();
    let pdf_path = state.data_dir.join(format!("{id}.pdf"));
    let workdir = state.data_dir.join(id.to_string());
    let bundle = state.data_dir.join(format!("{id}.tar.gz"));

    tokio::fs::create_dir_all(&state.data_dir)
        .await
        .map_err(|e| ApiError::Internal(format!("{}: {e}", state.data_dir.display())))?;
    tokio::fs::write(&pdf_path, &pdf)
        .await
        .map_err(|e| ApiError::Internal(format!("{}: {e}", pdf_path.display())))?;

    state.tracker.create(id)?;
    info!(
        "Job {} submitted: '{}' ({} bytes, style '{}')",
        id,
        request.filename,
        pdf.len(),
        config.style.name
    );

    let tracker = state.tracker.clone();
    let factory = state.factory.clone();
    tokio::spawn(async move {
        match factory.create(config, &workdir, &pdf_path).await {
            Ok(pipeline) => {
                // Failures are recorded in the tracker by run_job.
                let _ = jobs::run_job(tracker, id, pipeline, StepSelection::All, bundle).await;
            }
            Err(e) => {
                warn!("Job {} could not start: {}", id, e);
                if let Err(te) = tracker.update(id, JobStatus::Failed, format!("Error: {e}")) {
                    warn!("Job {}: {}", id, te);
                }
            }
        }
    });

    Ok((StatusCode::ACCEPTED, Json(CreateJobResponse { job_id: id })))
}

fn parse_job_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("'{raw}' is not a job id")))
}

/// `GET /api/jobs`
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobRecord>> {
    Json(state.tracker.list())
}

/// `GET /api/jobs/:id`
pub async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobRecord>, ApiError> {
    let id = parse_job_id(&id)?;
    Ok(Json(state.tracker.get(id)?))
}

/// `GET /api/jobs/:id/download`: the packaged working directory.
pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_job_id(&id)?;
    let record = state.tracker.get(id)?;
    if record.status != JobStatus::Completed {
        return Err(ApiError::Conflict(format!(
            "job {id} is {}; the bundle is available once it completes",
            record.status
        )));
    }
    let bundle = record
        .bundle
        .ok_or_else(|| ApiError::Internal(format!("job {id} completed without a bundle")))?;
    let bytes = tokio::fs::read(&bundle)
        .await
        .map_err(|e| ApiError::Internal(format!("{}: {e}", bundle.display())))?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/gzip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{id}.tar.gz\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(filename: &str, pdf: &[u8]) -> CreateJobRequest {
        CreateJobRequest {
            filename: filename.into(),
            pdf_base64: base64::engine::general_purpose::STANDARD.encode(pdf),
            provider: None,
            model: None,
            style: None,
            email: None,
            gemini_api_key: None,
            openai_api_key: None,
            workers: None,
        }
    }

    #[test]
    fn uploads_must_be_pdfs() {
        assert!(decode_pdf(&request("deck.pdf", b"%PDF-1.7\n...")).is_ok());
        assert!(matches!(
            decode_pdf(&request("deck.pdf", b"PK\x03\x04")),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            decode_pdf(&request("deck.pptx", b"%PDF-1.7")),
            Err(ApiError::BadRequest(_))
        ));
        let mut bad = request("deck.pdf", b"");
        bad.pdf_base64 = "***".into();
        assert!(matches!(decode_pdf(&bad), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn submission_overrides_server_defaults() {
        let base = PipelineConfig::builder().email("lab@example.org").build().unwrap();
        let mut req = request("deck.pdf", b"%PDF");
        req.style = Some("nature".into());
        req.provider = Some("openai".into());
        req.workers = Some(2);
        let config = job_config(&base, &req).unwrap();
        assert_eq!(config.style.name, "nature");
        assert_eq!(config.provider, ProviderChoice::OpenAi);
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.email.as_deref(), Some("lab@example.org"));

        req.style = Some("acm".into());
        assert!(matches!(job_config(&base, &req), Err(ApiError::BadRequest(_))));
        req.style = None;
        req.workers = Some(0);
        assert!(matches!(job_config(&base, &req), Err(ApiError::BadRequest(_))));
    }
}

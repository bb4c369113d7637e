//! Error types for the slide2thesis library.
//!
//! A single fatal error type, [`PipelineError`], flows through every layer.
//! There is no partial-success channel: a step either writes all of its
//! artifacts or fails, and the controller stops at the first failing step.
//!
//! Transient API errors are the only variant that is ever retried, and only
//! inside [`crate::ai::AiClient`]. Everything that escapes the client is
//! permanent from the caller's point of view.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the slide2thesis library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── LLM errors ────────────────────────────────────────────────────────
    /// Rate limit, timeout, 5xx or dropped connection. Retried by the AI client.
    #[error("transient LLM API error: {message}")]
    TransientApi { message: String },

    /// Invalid request, auth failure, content policy, empty reply, or
    /// transient failures that outlived the retry budget.
    #[error("LLM API error after {attempts} attempt(s): {message}")]
    PermanentApi { message: String, attempts: u32 },

    /// The configured provider could not be constructed (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Step contract errors ──────────────────────────────────────────────
    /// A step needs an upstream artifact that is not in the working directory.
    #[error("step '{step}' requires '{artifact}', which does not exist.\nRun the earlier steps first.")]
    MissingDependency { step: &'static str, artifact: String },

    /// One task of a concurrent batch failed; the whole batch was abandoned.
    #[error("task {} of {total} failed: {source}", .index + 1)]
    PartialBatchFailure {
        index: usize,
        total: usize,
        #[source]
        source: Box<PipelineError>,
    },

    /// A step failed; wraps the cause with the step name.
    #[error("step '{step}' failed: {source}")]
    StepFailure {
        step: &'static str,
        #[source]
        source: Box<PipelineError>,
    },

    // ── External tools ────────────────────────────────────────────────────
    /// pandoc or tectonic could not be spawned or exited non-zero.
    #[error("{tool} failed{}:\n{stderr}", .status.map(|s| format!(" with exit status {s}")).unwrap_or_default())]
    ExternalToolFailure {
        tool: String,
        status: Option<i32>,
        stderr: String,
    },

    /// The bibliographic lookup service returned an error.
    #[error("bibliography lookup for '{query}' failed: {detail}")]
    Lookup { query: String, detail: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// PDF header/trailer/xref is corrupt, or the file is not a PDF.
    #[error("PDF '{path}' could not be opened: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none (or a wrong one) was provided.
    #[error("PDF '{path}' is encrypted.\nProvide the password with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium for your platform and either place it next to the binary,\n\
in a system library directory, or point PDFIUM_LIB_PATH at its directory.\n"
    )]
    PdfiumBindingFailed(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Reading or writing an artifact in the working directory failed.
    #[error("I/O error on '{path}': {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Whether the AI client should retry the call that produced this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::TransientApi { .. })
    }

    /// Name of the step that failed, when this is a [`PipelineError::StepFailure`].
    pub fn failed_step(&self) -> Option<&'static str> {
        match self {
            PipelineError::StepFailure { step, .. } => Some(step),
            _ => None,
        }
    }

    /// Innermost cause, unwrapping step and batch wrappers.
    pub fn root_cause(&self) -> &PipelineError {
        match self {
            PipelineError::StepFailure { source, .. }
            | PipelineError::PartialBatchFailure { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub(crate) fn store(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Store {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

//! External collaborators the steps talk to.
//!
//! Each submodule wraps exactly one outside system behind a trait seam, so
//! the steps can be tested with in-memory fakes and an implementation can be
//! swapped (another renderer, another lookup service) without touching the
//! step logic.
//!
//! ## Data Flow
//!
//! ```text
//! render ──▶ encode ──▶ llm ──▶ postprocess
//! (pdfium)   (PNG)     (chat)   (cleanup)
//!
//! pubmed (citations)      toolchain (pandoc + tectonic)
//! ```
//!
//! 1. [`render`] : rasterise slides and pull embedded images; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 2. [`encode`] : PNG-encode images and wrap them for the multimodal request
//! 3. [`llm`]    : provider resolution and the single-attempt chat call
//! 4. [`postprocess`]: deterministic cleanup of model-written Markdown
//! 5. [`pubmed`] : bibliographic lookup over NCBI E-utilities
//! 6. [`toolchain`]: document typesetting through subprocesses

pub mod encode;
pub mod llm;
pub mod postprocess;
pub mod pubmed;
pub mod render;
pub mod toolchain;

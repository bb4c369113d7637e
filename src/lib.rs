//! # slide2thesis
//!
//! Turn a PDF slide deck into a compiled thesis or journal paper.
//!
//! ## Why this crate?
//!
//! A research talk already contains the skeleton of a paper: motivation,
//! method, results, figures. What it lacks is prose, citations and a layout.
//! This crate reads every slide with a vision model, sorts the slides into
//! document sections, writes a chapter per section, grounds claims in PubMed
//! references, places the slide figures, and typesets the result with pandoc
//! and tectonic.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Extract    rasterise slides, describe each with the VLM
//!  ├─ 2. Classify   assign pages to six section kinds
//!  ├─ 3. Chapters   draft, expand and polish one chapter per section
//!  ├─ 4. Citations  find claims, look them up on PubMed, insert [@key]
//!  ├─ 5. Figures    reference slide images from the chapters
//!  ├─ 6. Metadata   title, author, abstracts → metadata.yaml
//!  └─ 7. Compile    pandoc + tectonic with the style's template
//! ```
//!
//! Every step reads and writes named artifacts in a per-job working
//! directory ([`store::ContentStore`]). A full run skips steps whose outputs
//! already exist, so an interrupted job resumes where it stopped.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use slide2thesis::{Pipeline, PipelineConfig, StepSelection};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from GEMINI_API_KEY / OPENAI_API_KEY
//!     let config = PipelineConfig::builder().style("thesis").build()?;
//!     let pipeline = Pipeline::from_config(config, "talk_debug", "talk.pdf").await?;
//!     let summary = pipeline.run(&StepSelection::All).await?;
//!     println!("{:?} ({} AI calls)", summary.output, summary.ai_calls);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | The `slide2thesis` binary (clap + anyhow + indicatif) |
//! | `server` | on      | The `slide2thesis-server` binary and [`server`] router (axum) |
//!
//! Disable both when using only the library:
//! ```toml
//! slide2thesis = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod ai;
pub mod config;
pub mod controller;
pub mod document;
pub mod error;
pub mod jobs;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod runner;
#[cfg(feature = "server")]
pub mod server;
pub mod steps;
pub mod store;
pub mod style;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use ai::{AiClient, LlmBackend, RetryPolicy};
pub use config::{PipelineConfig, PipelineConfigBuilder, ProviderChoice, ProviderKind};
pub use controller::{Collaborators, Pipeline, RunSummary, StepSelection};
pub use document::{ChapterStage, Classification, SectionKind};
pub use error::{PipelineError, Result};
pub use jobs::{run_job, JobError, JobRecord, JobStatus, JobTracker};
pub use progress::{NoopObserver, Observer, PipelineObserver};
pub use runner::TaskRunner;
pub use steps::{Step, StepOutcome};
pub use store::{Artifact, ContentStore};
pub use style::{MetadataSchema, StyleConfig};

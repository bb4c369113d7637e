//! The seven pipeline steps and the context they share.
//!
//! ## Data Flow
//!
//! ```text
//! extract ──▶ classify ──▶ chapters ──▶ citations ──▶ figures ──▶ metadata ──▶ compile
//! (pages)     (sections)   (drafts)     (+[@key])     (+figures)  (YAML)       (PDF)
//! ```
//!
//! Steps never call each other. Every dependency is an artifact in the
//! [`ContentStore`]; a step that finds an upstream artifact missing fails
//! with [`PipelineError::MissingDependency`]. That contract is what lets a
//! user re-run any single step against an existing working directory.

pub mod chapters;
pub mod citations;
pub mod classify;
pub mod compile;
pub mod extract;
pub mod figures;
pub mod metadata;

use crate::ai::AiClient;
use crate::config::PipelineConfig;
use crate::document::{ChapterStage, Classification, SectionKind};
use crate::error::{PipelineError, Result};
use crate::pipeline::pubmed::BibliographySource;
use crate::pipeline::render::PageRenderer;
use crate::pipeline::toolchain::DocumentBuilder;
use crate::progress::Observer;
use crate::runner::TaskRunner;
use crate::store::{Artifact, ContentStore};
use serde::de::DeserializeOwned;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// One of the seven ordered transformations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Step {
    Extract,
    Classify,
    Chapters,
    Citations,
    Figures,
    Metadata,
    Compile,
}

impl Step {
    /// Chain order.
    pub const ALL: [Step; 7] = [
        Step::Extract,
        Step::Classify,
        Step::Chapters,
        Step::Citations,
        Step::Figures,
        Step::Metadata,
        Step::Compile,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Step::Extract => "extract",
            Step::Classify => "classify",
            Step::Chapters => "chapters",
            Step::Citations => "citations",
            Step::Figures => "figures",
            Step::Metadata => "metadata",
            Step::Compile => "compile",
        }
    }

    /// Status line shown while the step runs.
    pub fn describe(self) -> &'static str {
        match self {
            Step::Extract => "Extracting text from PDF",
            Step::Classify => "Categorizing pages",
            Step::Chapters => "Generating chapters",
            Step::Citations => "Adding citations to chapters",
            Step::Figures => "Adding figure references to chapters",
            Step::Metadata => "Generating YAML metadata",
            Step::Compile => "Compiling document",
        }
    }

    /// 1-based position in the chain.
    pub fn number(self) -> usize {
        self as usize + 1
    }

    pub fn from_name(name: &str) -> Option<Step> {
        Step::ALL.into_iter().find(|s| s.name() == name)
    }

    /// Run the step, overwriting its outputs.
    pub async fn execute(self, ctx: &StepContext) -> Result<StepOutcome> {
        match self {
            Step::Extract => extract::run(ctx).await,
            Step::Classify => classify::run(ctx).await,
            Step::Chapters => chapters::run(ctx).await,
            Step::Citations => citations::run(ctx).await,
            Step::Figures => figures::run(ctx).await,
            Step::Metadata => metadata::run(ctx).await,
            Step::Compile => compile::run(ctx).await,
        }
    }

    /// Whether every output of the step is already in the store.
    pub async fn outputs_present(self, ctx: &StepContext) -> Result<bool> {
        let store = &ctx.store;
        Ok(match self {
            // Written last, after every page artifact.
            Step::Extract => store.exists(Artifact::ExtractedText),
            Step::Classify => store.exists(Artifact::Classification),
            Step::Chapters => all_chapters_at(ctx, ChapterStage::Draft).await?,
            Step::Citations => {
                store.exists(Artifact::Bibliography)
                    && all_chapters_at(ctx, ChapterStage::Cited).await?
            }
            Step::Figures => all_chapters_at(ctx, ChapterStage::WithFigures).await?,
            Step::Metadata => store.exists(Artifact::Metadata),
            Step::Compile => store.exists(Artifact::Document(ctx.config.style.output_stem)),
        })
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a step wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutcome {
    /// Artifact names, in write order.
    pub artifacts: Vec<String>,
}

impl StepOutcome {
    pub(crate) fn wrote(&mut self, name: String) {
        self.artifacts.push(name);
    }
}

/// Everything a step may use. Built once per run by the controller.
#[derive(Clone)]
pub struct StepContext {
    pub config: Arc<PipelineConfig>,
    pub store: ContentStore,
    pub ai: AiClient,
    pub runner: TaskRunner,
    pub renderer: Arc<dyn PageRenderer>,
    pub bibliography: Arc<dyn BibliographySource>,
    pub builder: Arc<dyn DocumentBuilder>,
    pub pdf_path: PathBuf,
    pub observer: Observer,
}

impl StepContext {
    /// Forward sub-task progress of `step` to the observer.
    pub(crate) fn progress(&self, step: Step, done: usize, total: usize, message: &str) {
        self.observer
            .on_subtask_progress(step.name(), done, total, message);
    }
}

// ── Shared helpers ───────────────────────────────────────────────────────

/// The stored classification, or `None` when classify has not run.
pub(crate) async fn load_classification(store: &ContentStore) -> Result<Option<Classification>> {
    if !store.exists(Artifact::Classification) {
        return Ok(None);
    }
    let json = store.read(Artifact::Classification).await?;
    serde_json::from_str(&json).map(Some).map_err(|e| {
        PipelineError::Internal(format!(
            "{} is not a valid classification: {e}",
            Artifact::Classification.name()
        ))
    })
}

async fn all_chapters_at(ctx: &StepContext, stage: ChapterStage) -> Result<bool> {
    let Some(classification) = load_classification(&ctx.store).await? else {
        return Ok(false);
    };
    let kinds = classification.kinds();
    Ok(!kinds.is_empty()
        && kinds
            .iter()
            .all(|&kind| ctx.store.exists(Artifact::Chapter(kind, stage))))
}

/// Chapters available at `stage`, in canonical order.
///
/// With a classification every classified kind must have its `stage`
/// artifact. Without one, whatever chapters are on disk are used. Either
/// way an empty set is a missing dependency on the introduction chapter.
pub(crate) async fn chapter_set(
    ctx: &StepContext,
    stage: ChapterStage,
    step: Step,
) -> Result<Vec<SectionKind>> {
    let missing = |kind: SectionKind| PipelineError::MissingDependency {
        step: step.name(),
        artifact: Artifact::Chapter(kind, stage).name(),
    };

    match load_classification(&ctx.store).await? {
        Some(classification) => {
            let kinds = classification.kinds();
            if let Some(&absent) = kinds
                .iter()
                .find(|&&kind| !ctx.store.exists(Artifact::Chapter(kind, stage)))
            {
                return Err(missing(absent));
            }
            if kinds.is_empty() {
                return Err(missing(SectionKind::Introduction));
            }
            Ok(kinds)
        }
        None => {
            let kinds: Vec<SectionKind> = SectionKind::ALL
                .into_iter()
                .filter(|&kind| ctx.store.exists(Artifact::Chapter(kind, stage)))
                .collect();
            if kinds.is_empty() {
                return Err(missing(SectionKind::Introduction));
            }
            Ok(kinds)
        }
    }
}

/// Read every chapter of `kinds` at `stage`.
pub(crate) async fn read_chapters(
    ctx: &StepContext,
    kinds: &[SectionKind],
    stage: ChapterStage,
    step: Step,
) -> Result<Vec<(SectionKind, String)>> {
    let mut chapters = Vec::with_capacity(kinds.len());
    for &kind in kinds {
        let text = ctx
            .store
            .require(step.name(), Artifact::Chapter(kind, stage))
            .await?;
        chapters.push((kind, text));
    }
    Ok(chapters)
}

/// Outermost `{…}` of a model reply, parsed as `T`.
///
/// Models wrap JSON in fences or prose; anything unparsable yields `None`
/// with a warning rather than failing the step.
pub(crate) fn parse_json_reply<T: DeserializeOwned>(reply: &str, what: &str) -> Option<T> {
    let (start, end) = match (reply.find('{'), reply.rfind('}')) {
        (Some(s), Some(e)) if e > s => (s, e),
        _ => {
            warn!("{}: no JSON object in model reply", what);
            return None;
        }
    };
    match serde_json::from_str(&reply[start..=end]) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{}: unparsable JSON in model reply: {}", what, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Reply {
        items: Vec<u32>,
    }

    #[test]
    fn step_names_round_trip() {
        for step in Step::ALL {
            assert_eq!(Step::from_name(step.name()), Some(step));
        }
        assert_eq!(Step::from_name("render"), None);
    }

    #[test]
    fn steps_sort_in_chain_order() {
        let mut steps = vec![Step::Compile, Step::Extract, Step::Figures];
        steps.sort();
        assert_eq!(steps, vec![Step::Extract, Step::Figures, Step::Compile]);
    }

    #[test]
    fn json_reply_tolerates_fences_and_prose() {
        let reply = "Sure!\n```json\n{\"items\": [1, 2]}\n```\nHope this helps.";
        assert_eq!(
            parse_json_reply::<Reply>(reply, "test"),
            Some(Reply { items: vec![1, 2] })
        );
    }

    #[test]
    fn json_reply_failure_is_none() {
        assert_eq!(parse_json_reply::<Reply>("no json here", "test"), None);
        assert_eq!(parse_json_reply::<Reply>("{\"items\": [1,}", "test"), None);
        assert_eq!(parse_json_reply::<Reply>("} backwards {", "test"), None);
    }
}

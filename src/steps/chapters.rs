//! Chapter generation: draft, expand, polish.
//!
//! Each classified section becomes one chapter. Methods and results pages
//! are dense with detail the first draft tends to drop, so those chapters
//! get an extra call that compares the draft with its source pages and
//! fills in what is missing.

use super::{load_classification, Step, StepContext, StepOutcome};
use crate::ai::AiClient;
use crate::document::{ChapterStage, SectionKind};
use crate::error::{PipelineError, Result};
use crate::pipeline::postprocess::{clean_markdown, ensure_chapter_heading};
use crate::prompts;
use crate::store::Artifact;
use tracing::{debug, info};

const STEP: Step = Step::Chapters;

pub(crate) async fn run(ctx: &StepContext) -> Result<StepOutcome> {
    let classification = load_classification(&ctx.store)
        .await?
        .ok_or_else(|| PipelineError::MissingDependency {
            step: STEP.name(),
            artifact: Artifact::Classification.name(),
        })?;

    let mut sections = Vec::new();
    for kind in classification.kinds() {
        let text = ctx.store.require(STEP.name(), Artifact::Section(kind)).await?;
        sections.push((kind, text));
    }
    if sections.is_empty() {
        return Err(PipelineError::MissingDependency {
            step: STEP.name(),
            artifact: Artifact::Section(SectionKind::Introduction).name(),
        });
    }

    info!("Writing {} chapter(s)", sections.len());
    let ai = &ctx.ai;
    let chapters = ctx
        .runner
        .run_with_progress(
            sections,
            |_, (kind, section)| async move { write_chapter(ai, kind, &section).await },
            |done, total| ctx.progress(STEP, done, total, &format!("chapter {done} of {total} written")),
        )
        .await?;

    let mut outcome = StepOutcome::default();
    for (kind, chapter) in chapters {
        let artifact = Artifact::Chapter(kind, ChapterStage::Draft);
        ctx.store.write(artifact, chapter).await?;
        outcome.wrote(artifact.name());
    }
    Ok(outcome)
}

async fn write_chapter(ai: &AiClient, kind: SectionKind, section: &str) -> Result<(SectionKind, String)> {
    let mut chapter = ai.generate(&prompts::draft_chapter(kind, section), &[]).await?;
    debug!("{}: draft {} chars", kind, chapter.len());

    if matches!(kind, SectionKind::Methods | SectionKind::Results) {
        chapter = ai
            .generate(&prompts::expand_chapter(section, &chapter), &[])
            .await?;
        debug!("{}: expanded to {} chars", kind, chapter.len());
    }

    let polished = ai.generate(&prompts::polish_chapter(&chapter), &[]).await?;
    let cleaned = clean_markdown(&polished);
    Ok((kind, ensure_chapter_heading(&cleaned, kind.title())))
}

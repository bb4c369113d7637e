//! Classification: partition the slides into section kinds.

use super::{Step, StepContext, StepOutcome};
use crate::document::{format_section, parse_classification, parse_transcript};
use crate::error::{PipelineError, Result};
use crate::prompts;
use crate::store::Artifact;
use tracing::{info, warn};

const STEP: Step = Step::Classify;

pub(crate) async fn run(ctx: &StepContext) -> Result<StepOutcome> {
    let transcript = ctx
        .store
        .require(STEP.name(), Artifact::ExtractedText)
        .await?;
    let pages = parse_transcript(&transcript);
    if pages.is_empty() {
        return Err(PipelineError::MissingDependency {
            step: STEP.name(),
            artifact: format!("{} (no pages found)", Artifact::ExtractedText.name()),
        });
    }

    let reply = ctx
        .ai
        .generate(&prompts::classify_pages(&pages), &[])
        .await?;
    let valid: Vec<usize> = pages.iter().map(|(n, _)| *n).collect();
    let classification = parse_classification(&reply, &valid);

    let kinds = classification.kinds();
    if kinds.is_empty() {
        return Err(PipelineError::PermanentApi {
            message: "classification reply assigned no page to any section".into(),
            attempts: 1,
        });
    }
    let dropped = valid.len() - classification.all_pages().count();
    if dropped > 0 {
        warn!("{} page(s) left unclassified", dropped);
    }

    let mut outcome = StepOutcome::default();
    let json = serde_json::to_string_pretty(&classification)
        .map_err(|e| PipelineError::Internal(format!("classification JSON: {e}")))?;
    ctx.store.write(Artifact::Classification, json).await?;
    outcome.wrote(Artifact::Classification.name());

    for kind in kinds {
        let section_pages: Vec<(usize, &str)> = classification
            .pages_of(kind)
            .iter()
            .filter_map(|n| {
                pages
                    .iter()
                    .find(|(number, _)| number == n)
                    .map(|(number, text)| (*number, text.as_str()))
            })
            .collect();
        info!("{}: pages {:?}", kind, classification.pages_of(kind));
        let artifact = Artifact::Section(kind);
        ctx.store.write(artifact, format_section(&section_pages)).await?;
        outcome.wrote(artifact.name());
    }
    Ok(outcome)
}

//! Compilation: assemble the working directory and typeset it.
//!
//! The style's template and class files are copied next to the chapters so
//! pandoc and tectonic can run with the working directory as `cwd` and
//! every path relative.

use super::{chapter_set, Step, StepContext, StepOutcome};
use crate::document::ChapterStage;
use crate::error::{PipelineError, Result};
use crate::pipeline::toolchain::BuildRequest;
use crate::store::Artifact;
use std::path::{Path, PathBuf};
use tracing::info;

const STEP: Step = Step::Compile;

pub(crate) async fn run(ctx: &StepContext) -> Result<StepOutcome> {
    let style = ctx.config.style;
    let kinds = chapter_set(ctx, ChapterStage::WithFigures, STEP).await?;
    for artifact in [Artifact::Bibliography, Artifact::Metadata] {
        if !ctx.store.exists(artifact) {
            return Err(PipelineError::MissingDependency {
                step: STEP.name(),
                artifact: artifact.name(),
            });
        }
    }

    let template_root = ctx.config.templates_dir.join(style.template_dir);
    let mut outcome = StepOutcome::default();
    for file in std::iter::once(style.template_file).chain(style.required_files.iter().copied()) {
        let source = template_root.join(file);
        if !source.is_file() {
            return Err(PipelineError::MissingDependency {
                step: STEP.name(),
                artifact: source.display().to_string(),
            });
        }
        ctx.store.import(&source, file).await?;
        outcome.wrote(file.to_string());
    }

    let request = BuildRequest {
        workdir: ctx.store.root().to_path_buf(),
        chapters: kinds
            .iter()
            .map(|&kind| Artifact::Chapter(kind, ChapterStage::WithFigures).name())
            .collect(),
        metadata: Artifact::Metadata.name(),
        bibliography: Artifact::Bibliography.name(),
        template: style.template_file.to_string(),
        csl: ctx.config.csl_path.as_deref().map(absolute),
        output_stem: style.output_stem.to_string(),
    };
    info!(
        "Compiling {} chapter(s) with style '{}'",
        request.chapters.len(),
        style.name
    );
    let output = ctx.builder.build(&request).await?;

    let document = Artifact::Document(style.output_stem);
    if !ctx.store.exists(document) {
        return Err(PipelineError::ExternalToolFailure {
            tool: "tectonic".into(),
            status: None,
            stderr: format!("expected output '{}' was not produced", output.display()),
        });
    }
    outcome.wrote(Artifact::LatexSource(style.output_stem).name());
    outcome.wrote(document.name());
    Ok(outcome)
}

/// Tools run inside the working directory, so user-relative paths must be
/// made absolute first.
fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

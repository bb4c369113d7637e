//! Pipeline controller: selection, ordering, skip-if-present, fail-fast.
//!
//! ## Resume Semantics
//!
//! A full run ([`StepSelection::All`]) walks the chain and skips every step
//! whose outputs are already in the working directory, so an interrupted
//! job resumes where it stopped and a finished job re-runs with zero AI
//! calls. Once a step actually regenerates, every later step is forced:
//! downstream artifacts built from the old output are stale.
//!
//! An explicit selection ([`StepSelection::Only`]) means "regenerate these":
//! the selected steps always run and overwrite their outputs, relying on
//! artifact presence for their prerequisites.

use crate::ai::{AiClient, LlmBackend, RetryPolicy};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::pipeline::llm::{ProviderBackend, UnavailableBackend};
use crate::pipeline::pubmed::{BibliographySource, PubMedClient};
use crate::pipeline::render::{PageRenderer, PdfiumRenderer};
use crate::pipeline::toolchain::{DocumentBuilder, PandocToolchain};
use crate::progress::{NoopObserver, Observer};
use crate::runner::TaskRunner;
use crate::steps::{Step, StepContext};
use crate::store::{Artifact, ContentStore};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Which steps a run covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StepSelection {
    /// The whole chain, skipping steps whose outputs exist.
    #[default]
    All,
    /// Just these steps, in chain order, always regenerated.
    Only(BTreeSet<Step>),
}

impl StepSelection {
    /// `All` when `steps` is empty, `Only(steps)` otherwise.
    pub fn from_steps(steps: impl IntoIterator<Item = Step>) -> Self {
        let set: BTreeSet<Step> = steps.into_iter().collect();
        if set.is_empty() {
            StepSelection::All
        } else {
            StepSelection::Only(set)
        }
    }

    pub fn includes(&self, step: Step) -> bool {
        match self {
            StepSelection::All => true,
            StepSelection::Only(set) => set.contains(&step),
        }
    }

    fn forces(&self) -> bool {
        matches!(self, StepSelection::Only(_))
    }
}

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Steps that ran, in order.
    pub executed: Vec<Step>,
    /// Steps skipped because their outputs were present.
    pub skipped: Vec<Step>,
    /// Artifacts written by the executed steps.
    pub artifacts: Vec<String>,
    /// AI requests made during the run, retries included.
    pub ai_calls: usize,
    /// Compiled document, when one exists after the run.
    pub output: Option<PathBuf>,
    pub duration_ms: u64,
}

/// The outside systems a pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub backend: Arc<dyn LlmBackend>,
    pub renderer: Arc<dyn PageRenderer>,
    pub bibliography: Arc<dyn BibliographySource>,
    pub builder: Arc<dyn DocumentBuilder>,
}

impl Collaborators {
    /// Real implementations configured from `config`.
    ///
    /// A provider that cannot be constructed (no API key, typically) is
    /// replaced by one that fails on first use, so steps that make no AI
    /// calls still run.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let backend: Arc<dyn LlmBackend> = match ProviderBackend::from_config(config) {
            Ok(backend) => Arc::new(backend),
            Err(PipelineError::ProviderNotConfigured { provider, hint }) => {
                warn!("LLM provider '{}' unavailable; AI steps will fail", provider);
                Arc::new(UnavailableBackend::new(provider, hint))
            }
            Err(e) => return Err(e),
        };
        Ok(Self {
            backend,
            renderer: Arc::new(PdfiumRenderer::new(config)),
            bibliography: Arc::new(PubMedClient::new(config.email.clone())?),
            builder: Arc::new(PandocToolchain::new(
                config.pandoc_bin.clone(),
                config.tectonic_bin.clone(),
            )),
        })
    }
}

/// Drives the steps of one job over one working directory.
pub struct Pipeline {
    ctx: StepContext,
}

impl Pipeline {
    /// Pipeline with the real collaborators.
    pub async fn from_config(
        config: PipelineConfig,
        workdir: impl Into<PathBuf>,
        pdf_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let collaborators = Collaborators::from_config(&config)?;
        Self::with_collaborators(config, workdir, pdf_path, collaborators).await
    }

    /// Pipeline with injected collaborators.
    pub async fn with_collaborators(
        config: PipelineConfig,
        workdir: impl Into<PathBuf>,
        pdf_path: impl Into<PathBuf>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let store = ContentStore::open(workdir).await?;
        let ai = AiClient::new(collaborators.backend, RetryPolicy::from_config(&config));
        let runner = TaskRunner::new(config.concurrency);
        Ok(Self {
            ctx: StepContext {
                config: Arc::new(config),
                store,
                ai,
                runner,
                renderer: collaborators.renderer,
                bibliography: collaborators.bibliography,
                builder: collaborators.builder,
                pdf_path: pdf_path.into(),
                observer: Arc::new(NoopObserver),
            },
        })
    }

    /// Attach a progress observer.
    pub fn observer(mut self, observer: Observer) -> Self {
        self.ctx.observer = observer;
        self
    }

    pub fn store(&self) -> &ContentStore {
        &self.ctx.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.ctx.config
    }

    /// Run the selected steps in chain order, stopping at the first failure.
    ///
    /// # Errors
    /// [`PipelineError::StepFailure`] naming the failed step and wrapping
    /// its cause. Artifacts written by earlier steps are kept.
    pub async fn run(&self, selection: &StepSelection) -> Result<RunSummary> {
        let start = Instant::now();
        let ctx = &self.ctx;
        let calls_before = ctx.ai.calls();
        info!(
            "Pipeline start: {} → {} (style '{}', {})",
            ctx.pdf_path.display(),
            ctx.store.root().display(),
            ctx.config.style.name,
            ctx.ai.backend_name()
        );

        let mut summary = RunSummary::default();
        let mut force = selection.forces();
        for step in Step::ALL {
            if !selection.includes(step) {
                continue;
            }

            let present = if force {
                false
            } else {
                step.outputs_present(ctx)
                    .await
                    .map_err(|e| self.fail(step, e))?
            };
            if present {
                info!("Skipping {}: outputs already present", step);
                ctx.observer.on_step_skipped(step.name());
                summary.skipped.push(step);
                continue;
            }

            info!("Running {}", step);
            ctx.observer.on_step_start(step.name());
            let step_start = Instant::now();
            let outcome = step.execute(ctx).await.map_err(|e| self.fail(step, e))?;
            info!(
                "{} done: {} artifact(s) in {}ms",
                step,
                outcome.artifacts.len(),
                step_start.elapsed().as_millis()
            );
            ctx.observer.on_step_complete(step.name());
            summary.executed.push(step);
            summary.artifacts.extend(outcome.artifacts);
            force = true;
        }

        let document = Artifact::Document(ctx.config.style.output_stem);
        summary.output = ctx
            .store
            .exists(document)
            .then(|| ctx.store.path_of(&document.name()));
        summary.ai_calls = ctx.ai.calls() - calls_before;
        summary.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Pipeline done: {} run, {} skipped, {} AI call(s) in {}ms",
            summary.executed.len(),
            summary.skipped.len(),
            summary.ai_calls,
            summary.duration_ms
        );
        Ok(summary)
    }

    fn fail(&self, step: Step, error: PipelineError) -> PipelineError {
        let message = error.to_string();
        warn!("{} failed: {}", step, message);
        self.ctx.observer.on_step_failed(step.name(), &message);
        PipelineError::StepFailure {
            step: step.name(),
            source: Box::new(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_selection_means_all() {
        assert_eq!(StepSelection::from_steps(Vec::new()), StepSelection::All);
        let only = StepSelection::from_steps([Step::Compile, Step::Citations]);
        assert!(only.includes(Step::Citations));
        assert!(!only.includes(Step::Extract));
        assert!(only.forces());
        assert!(!StepSelection::All.forces());
    }
}

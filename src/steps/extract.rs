//! Extraction: one description per slide.
//!
//! Slides are rendered, PNG-encoded, and described by the vision model one
//! call per page through the task runner. Nothing is written until every
//! page has a description, so a failed run never leaves a transcript that
//! covers only part of the deck.

use super::{Step, StepContext, StepOutcome};
use crate::document::format_transcript;
use crate::error::{PipelineError, Result};
use crate::pipeline::encode::{encode_png, to_image_data};
use crate::pipeline::render::RenderedPage;
use crate::prompts;
use crate::store::Artifact;
use tracing::info;

const STEP: Step = Step::Extract;

/// PNG bytes of one slide and its embedded images.
struct EncodedPage {
    number: usize,
    render: Vec<u8>,
    embedded: Vec<Vec<u8>>,
}

pub(crate) async fn run(ctx: &StepContext) -> Result<StepOutcome> {
    let rendered = ctx.renderer.render(&ctx.pdf_path).await?;
    if rendered.is_empty() {
        return Err(PipelineError::CorruptPdf {
            path: ctx.pdf_path.clone(),
            detail: "document has no pages".into(),
        });
    }
    let total = rendered.len();

    let pages = tokio::task::spawn_blocking(move || encode_pages(rendered))
        .await
        .map_err(|e| PipelineError::Internal(format!("Encode task panicked: {}", e)))??;

    info!("Describing {} slide(s)", total);
    let ai = &ctx.ai;
    let inputs: Vec<&EncodedPage> = pages.iter().collect();
    let descriptions = ctx
        .runner
        .run_with_progress(
            inputs,
            |_, page| async move {
                let prompt = prompts::describe_page(page.number, total);
                let image = to_image_data(&page.render);
                ai.generate(&prompt, std::slice::from_ref(&image)).await
            },
            |done, total| {
                ctx.progress(STEP, done, total, &format!("processing page {done} of {total}"));
            },
        )
        .await?;

    let mut outcome = StepOutcome::default();
    for page in &pages {
        let image = Artifact::PageImage(page.number);
        ctx.store.write(image, &page.render).await?;
        outcome.wrote(image.name());
        for (k, png) in page.embedded.iter().enumerate() {
            let embedded = Artifact::EmbeddedImage(page.number, k + 1);
            ctx.store.write(embedded, png).await?;
            outcome.wrote(embedded.name());
        }
    }

    let texts: Vec<(usize, String)> = pages
        .iter()
        .zip(descriptions)
        .map(|(page, text)| (page.number, text.trim().to_string()))
        .collect();
    for (number, text) in &texts {
        let artifact = Artifact::PageText(*number);
        ctx.store.write(artifact, format!("{text}\n")).await?;
        outcome.wrote(artifact.name());
    }

    ctx.store
        .write(Artifact::ExtractedText, format_transcript(&texts))
        .await?;
    outcome.wrote(Artifact::ExtractedText.name());
    Ok(outcome)
}

fn encode_pages(rendered: Vec<RenderedPage>) -> Result<Vec<EncodedPage>> {
    rendered
        .into_iter()
        .map(|page| {
            let failed = |e: image::ImageError| PipelineError::RasterisationFailed {
                page: page.number,
                detail: format!("PNG encoding failed: {e}"),
            };
            let render = encode_png(&page.image).map_err(failed)?;
            let embedded = page
                .embedded
                .iter()
                .map(|img| encode_png(img).map_err(failed))
                .collect::<Result<Vec<_>>>()?;
            Ok(EncodedPage {
                number: page.number,
                render,
                embedded,
            })
        })
        .collect()
}

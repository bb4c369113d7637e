//! Slide rasterisation and embedded-image extraction via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and blocks for the whole render. `tokio::task::spawn_blocking`
//! moves that work onto the blocking pool so the AI calls of other jobs keep
//! running on the async workers.
//!
//! ## Why cap pixels, not DPI?
//!
//! Slide decks come in 4:3, 16:9 and poster sizes. `max_rendered_pixels`
//! bounds the longest edge regardless of physical size, which keeps memory
//! and request sizes predictable.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One rendered slide.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// 1-based page number.
    pub number: usize,
    /// Full-slide render.
    pub image: DynamicImage,
    /// Raster images embedded in the slide, in object order.
    pub embedded: Vec<DynamicImage>,
}

/// Turns a PDF into rendered pages.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, pdf_path: &Path) -> Result<Vec<RenderedPage>>;
}

/// pdfium-backed renderer.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    max_pixels: u32,
    password: Option<String>,
    /// Embedded images smaller than this on either edge are skipped (icons, bullets).
    min_embedded_edge: u32,
}

impl PdfiumRenderer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            max_pixels: config.max_rendered_pixels,
            password: config.password.clone(),
            min_embedded_edge: 64,
        }
    }
}

#[async_trait]
impl PageRenderer for PdfiumRenderer {
    async fn render(&self, pdf_path: &Path) -> Result<Vec<RenderedPage>> {
        if !pdf_path.is_file() {
            return Err(PipelineError::FileNotFound {
                path: pdf_path.to_path_buf(),
            });
        }

        let path = pdf_path.to_path_buf();
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.render_blocking(&path))
            .await
            .map_err(|e| PipelineError::Internal(format!("Render task panicked: {}", e)))?
    }
}

impl PdfiumRenderer {
    fn render_blocking(&self, pdf_path: &Path) -> Result<Vec<RenderedPage>> {
        let pdfium = bind_pdfium()?;

        let document = pdfium
            .load_pdf_from_file(pdf_path, self.password.as_deref())
            .map_err(|e| {
                let detail = format!("{:?}", e);
                if detail.to_lowercase().contains("password") {
                    PipelineError::PasswordRequired {
                        path: pdf_path.to_path_buf(),
                    }
                } else {
                    PipelineError::CorruptPdf {
                        path: pdf_path.to_path_buf(),
                        detail,
                    }
                }
            })?;

        let render_config = PdfRenderConfig::new()
            .set_target_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let pages = document.pages();
        info!("PDF loaded: {} slides", pages.len());

        let mut rendered = Vec::with_capacity(pages.len() as usize);
        for (idx, page) in pages.iter().enumerate() {
            let number = idx + 1;
            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                PipelineError::RasterisationFailed {
                    page: number,
                    detail: format!("{:?}", e),
                }
            })?;
            let image = bitmap.as_image();

            let mut embedded = Vec::new();
            for object in page.objects().iter() {
                let Some(image_object) = object.as_image_object() else {
                    continue;
                };
                match image_object.get_raw_image() {
                    Ok(raw)
                        if raw.width() >= self.min_embedded_edge
                            && raw.height() >= self.min_embedded_edge =>
                    {
                        embedded.push(raw)
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Slide {}: skipping unreadable embedded image: {:?}", number, e),
                }
            }

            debug!(
                "Rendered slide {} → {}x{} px, {} embedded image(s)",
                number,
                image.width(),
                image.height(),
                embedded.len()
            );
            rendered.push(RenderedPage {
                number,
                image,
                embedded,
            });
        }

        Ok(rendered)
    }
}

/// Bind to pdfium: `PDFIUM_LIB_PATH` first, then the working directory,
/// then the system library path.
fn bind_pdfium() -> Result<Pdfium> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Ok(dir) = std::env::var("PDFIUM_LIB_PATH") {
        candidates.push(PathBuf::from(dir));
    }
    candidates.push(PathBuf::from("./"));

    for dir in &candidates {
        let lib = Pdfium::pdfium_platform_library_name_at_path(dir);
        if let Ok(bindings) = Pdfium::bind_to_library(&lib) {
            debug!("Bound pdfium at {}", lib.display());
            return Ok(Pdfium::new(bindings));
        }
    }

    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| PipelineError::PdfiumBindingFailed(format!("{:?}", e)))
}

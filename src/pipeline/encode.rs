//! Image encoding: `DynamicImage` → PNG bytes → base64 `ImageData`.
//!
//! Slides are stored on disk as PNG (the same bytes later referenced by the
//! figure step and compiled into the document) and sent to the model as
//! base64 data in the request body.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode an image as PNG.
///
/// PNG is lossless; JPEG artefacts on rendered slide text confuse vision
/// models and look poor once the slide is embedded as a figure.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Wrap PNG bytes for a vision request.
///
/// `detail: "high"` lets GPT-4-class models tile the slide instead of
/// squeezing it into one 512 px overview, which loses small print.
pub fn to_image_data(png: &[u8]) -> ImageData {
    let b64 = STANDARD.encode(png);
    debug!("Encoded image → {} bytes base64", b64.len());
    ImageData::new(b64, "image/png").with_detail("high")
}

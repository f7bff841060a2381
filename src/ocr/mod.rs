pub mod engine;
pub mod preprocess;
pub mod setup;

pub use engine::{OcrProfile, TesseractEngine};
pub use setup::locate_tesseract;

use anyhow::Result;

/// Turns an encoded image into text.
///
/// Implemented by [`TesseractEngine`]; tests substitute scripted fakes.
pub trait TextRecognizer {
    fn read_text(&self, png: &[u8], profile: &OcrProfile) -> Result<String>;
}

/// Contrast-boosts a full-page screenshot before generic page OCR.
pub fn prepare_page(png: &[u8], contrast: f32) -> Result<Vec<u8>> {
    let img = image::load_from_memory(png)?.to_rgb8();
    let enhanced = preprocess::enhance_contrast(&img, contrast);
    Ok(preprocess::encode_png(&image::DynamicImage::ImageRgb8(enhanced))?)
}

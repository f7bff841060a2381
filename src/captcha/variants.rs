//! Preprocessed renderings of a captcha image.
//!
//! Each recognizer backend gets its own fixed set of variants. Variants are
//! freshly encoded PNGs; the source bytes are never touched.

use anyhow::{anyhow, Result};
use image::DynamicImage;
use imageproc::filter::median_filter;

use crate::ocr::preprocess::{
    binarize_otsu, edge_enhance_more, encode_png, enhance_brightness, enhance_contrast,
    enhance_sharpness, equalize_clipped, upscale,
};

/// Label used when preprocessing fails and the source is passed through.
pub const ORIGINAL_LABEL: &str = "original";

/// One preprocessed rendering of the source image.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageVariant {
    pub label: String,
    pub png: Vec<u8>,
}

impl ImageVariant {
    pub fn original(source: &[u8]) -> Self {
        Self {
            label: ORIGINAL_LABEL.to_string(),
            png: source.to_vec(),
        }
    }
}

/// Produces a small, deterministic set of variants from encoded image bytes.
pub trait VariantGenerator {
    /// Never fails: unusable input comes back as the single `original` variant.
    fn generate(&self, source: &[u8]) -> Vec<ImageVariant> {
        match self.try_generate(source) {
            Ok(variants) if !variants.is_empty() => variants,
            Ok(_) => vec![ImageVariant::original(source)],
            Err(e) => {
                log::warn!("Captcha preprocessing failed: {:#}. Using the original image.", e);
                vec![ImageVariant::original(source)]
            }
        }
    }

    fn try_generate(&self, source: &[u8]) -> Result<Vec<ImageVariant>>;
}

fn decode(source: &[u8]) -> Result<DynamicImage> {
    let img = image::load_from_memory(source)?;
    if img.width() == 0 || img.height() == 0 {
        return Err(anyhow!("empty image ({}x{})", img.width(), img.height()));
    }
    Ok(img)
}

fn variant(label: impl Into<String>, img: DynamicImage) -> Result<ImageVariant> {
    Ok(ImageVariant {
        label: label.into(),
        png: encode_png(&img)?,
    })
}

/// Color variants for the vision model: enlarged, then three different
/// trade-offs between noise suppression and edge clarity.
#[derive(Clone, Copy, Debug, Default)]
pub struct VisionVariants;

impl VariantGenerator for VisionVariants {
    fn try_generate(&self, source: &[u8]) -> Result<Vec<ImageVariant>> {
        let base = upscale(&decode(source)?, 200, 600, 1.0).to_rgb8();

        let max_enhance = enhance_brightness(
            &enhance_sharpness(&enhance_contrast(&base, 4.0), 3.0),
            1.1,
        );
        let denoised = median_filter(&enhance_contrast(&base, 2.5), 1, 1);
        let noise_reduced = enhance_sharpness(&denoised, 2.0);
        let edge_enhanced = enhance_contrast(&edge_enhance_more(&base), 2.8);

        Ok(vec![
            variant("max_enhance", DynamicImage::ImageRgb8(max_enhance))?,
            variant("noise_reduced", DynamicImage::ImageRgb8(noise_reduced))?,
            variant("edge_enhanced", DynamicImage::ImageRgb8(edge_enhanced))?,
        ])
    }
}

/// Binarized grayscale variants for Tesseract, one per equalization clip limit.
#[derive(Clone, Debug)]
pub struct OcrVariants {
    contrast_levels: Vec<f32>,
}

impl OcrVariants {
    pub fn new(contrast_levels: Vec<f32>) -> Self {
        Self { contrast_levels }
    }
}

impl VariantGenerator for OcrVariants {
    fn try_generate(&self, source: &[u8]) -> Result<Vec<ImageVariant>> {
        let gray = upscale(&decode(source)?, 150, 450, 2.5).to_luma8();

        self.contrast_levels
            .iter()
            .map(|&clip| {
                let equalized = equalize_clipped(&gray, clip);
                let binary = binarize_otsu(&equalized);
                variant(format!("clahe_{:.1}", clip), DynamicImage::ImageLuma8(binary))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn sample_png() -> Vec<u8> {
        let img = RgbImage::from_fn(30, 10, |x, y| {
            if (x / 5 + y / 5) % 2 == 0 { Rgb([30, 40, 50]) } else { Rgb([220, 210, 200]) }
        });
        encode_png(&DynamicImage::ImageRgb8(img)).unwrap()
    }

    #[test]
    fn test_vision_variants() {
        let source = sample_png();
        let variants = VisionVariants.generate(&source);

        let labels: Vec<&str> = variants.iter().map(|v| v.label.as_str()).collect();
        assert_eq!(labels, ["max_enhance", "noise_reduced", "edge_enhanced"]);

        for v in &variants {
            let decoded = image::load_from_memory(&v.png).unwrap();
            // max(200/10, 600/30) = 20
            assert_eq!((decoded.width(), decoded.height()), (600, 200));
        }
    }

    #[test]
    fn test_ocr_variants_are_binary() {
        let source = sample_png();
        let variants = OcrVariants::new(vec![2.0, 3.0]).generate(&source);

        let labels: Vec<&str> = variants.iter().map(|v| v.label.as_str()).collect();
        assert_eq!(labels, ["clahe_2.0", "clahe_3.0"]);

        let decoded = image::load_from_memory(&variants[0].png).unwrap().to_luma8();
        assert!(decoded.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let source = sample_png();
        assert_eq!(VisionVariants.generate(&source), VisionVariants.generate(&source));
    }

    #[test]
    fn test_corrupt_input_falls_back_to_original() {
        let garbage = b"definitely not a png".to_vec();
        let variants = VisionVariants.generate(&garbage);
        assert_eq!(variants, vec![ImageVariant::original(&garbage)]);

        let variants = OcrVariants::new(vec![2.0]).generate(&garbage);
        assert_eq!(variants[0].label, ORIGINAL_LABEL);
    }

    #[test]
    fn test_no_contrast_levels_falls_back_to_original() {
        let source = sample_png();
        let variants = OcrVariants::new(Vec::new()).generate(&source);
        assert_eq!(variants, vec![ImageVariant::original(&source)]);
    }
}

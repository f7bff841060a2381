//! Recognizer backends for captcha images.
//!
//! Every backend turns one image variant into zero or more raw text guesses.
//! A failed call is logged and skipped; the remaining calls still run.

use std::fmt;
use std::sync::Arc;

use super::variants::{ImageVariant, OcrVariants, VariantGenerator, VisionVariants};
use crate::error::ScraperError;
use crate::ocr::{OcrProfile, TextRecognizer};
use crate::vision::{Sampling, VisionModel};

/// Unvalidated recognizer output.
pub type RawGuess = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecognizerKind {
    Ocr,
    VisionModel,
}

impl RecognizerKind {
    pub fn name(self) -> &'static str {
        match self {
            RecognizerKind::Ocr => "ocr",
            RecognizerKind::VisionModel => "vision",
        }
    }
}

impl fmt::Display for RecognizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub trait Recognizer {
    fn kind(&self) -> RecognizerKind;

    /// The preprocessed renderings this backend wants to see.
    fn variants(&self, source: &[u8]) -> Vec<ImageVariant>;

    /// All raw answers for one variant, in call order.
    fn recognize(&self, variant: &ImageVariant) -> Vec<RawGuess>;
}

fn record_failure(kind: RecognizerKind, variant: &ImageVariant, err: anyhow::Error) {
    let failure = ScraperError::RecognitionFailure {
        backend: kind.name(),
        variant: variant.label.clone(),
        message: format!("{:#}", err),
    };
    log::debug!("{}", failure);
}

/// Tesseract with a digit whitelist, one call per profile.
pub struct OcrRecognizer {
    engine: Arc<dyn TextRecognizer>,
    profiles: Vec<OcrProfile>,
    variants: OcrVariants,
}

impl OcrRecognizer {
    pub fn new(engine: Arc<dyn TextRecognizer>, profiles: Vec<OcrProfile>, contrast_levels: Vec<f32>) -> Self {
        Self {
            engine,
            profiles,
            variants: OcrVariants::new(contrast_levels),
        }
    }
}

impl Recognizer for OcrRecognizer {
    fn kind(&self) -> RecognizerKind {
        RecognizerKind::Ocr
    }

    fn variants(&self, source: &[u8]) -> Vec<ImageVariant> {
        self.variants.generate(source)
    }

    fn recognize(&self, variant: &ImageVariant) -> Vec<RawGuess> {
        let mut guesses = Vec::new();
        for profile in &self.profiles {
            match self.engine.read_text(&variant.png, profile) {
                Ok(text) => {
                    log::debug!("OCR ({}, {}): {:?}", variant.label, profile.name, text.trim());
                    guesses.push(text.trim().to_string());
                }
                Err(e) => record_failure(self.kind(), variant, e),
            }
        }
        guesses
    }
}

/// A multimodal model asked each prompt, `passes` times over.
pub struct VisionRecognizer {
    model: Arc<dyn VisionModel>,
    prompts: Vec<String>,
    sampling: Sampling,
    passes: u32,
}

impl VisionRecognizer {
    pub fn new(model: Arc<dyn VisionModel>, prompts: Vec<String>, sampling: Sampling, passes: u32) -> Self {
        Self {
            model,
            prompts,
            sampling,
            passes: passes.max(1),
        }
    }
}

impl Recognizer for VisionRecognizer {
    fn kind(&self) -> RecognizerKind {
        RecognizerKind::VisionModel
    }

    fn variants(&self, source: &[u8]) -> Vec<ImageVariant> {
        VisionVariants.generate(source)
    }

    fn recognize(&self, variant: &ImageVariant) -> Vec<RawGuess> {
        let mut guesses = Vec::new();
        for pass in 1..=self.passes {
            for (i, prompt) in self.prompts.iter().enumerate() {
                match self.model.ask(&variant.png, prompt, self.sampling) {
                    Ok(answer) => {
                        log::debug!(
                            "Vision ({}, pass {}, prompt {}): {:?}",
                            variant.label,
                            pass,
                            i + 1,
                            answer
                        );
                        guesses.push(answer);
                    }
                    Err(e) => record_failure(self.kind(), variant, e),
                }
            }
        }
        guesses
    }
}

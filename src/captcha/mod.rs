//! Captcha reading: preprocessing, recognition, normalization and voting.

pub mod consensus;
pub mod normalize;
pub mod recognizer;
pub mod solver;
pub mod variants;

pub use consensus::{AttemptPool, ConsensusEngine};
pub use normalize::{GuessNormalizer, NormalizationPolicy, NormalizedGuess};
pub use recognizer::{OcrRecognizer, RawGuess, Recognizer, RecognizerKind, VisionRecognizer};
pub use solver::CaptchaSolver;
pub use variants::ImageVariant;

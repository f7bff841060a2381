//! Failure kinds surfaced by the login and extraction pipeline.
//!
//! Failures local to one recognizer call or one extraction probe are logged
//! and dropped where they happen. Everything that reaches `main` is one of
//! these named kinds.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScraperError {
    /// A single OCR or vision-model call failed. Never propagated.
    #[error("{backend} recognizer call failed ({variant}): {message}")]
    RecognitionFailure {
        backend: &'static str,
        variant: String,
        message: String,
    },

    /// The portal rejected the submitted captcha.
    #[error("captcha rejected: {0}")]
    CaptchaRejected(String),

    /// The portal rejected the login for a reason other than the captcha.
    #[error("login rejected: {0}")]
    CredentialRejected(String),

    /// Every top-level login attempt ran out of captcha guesses or failed.
    #[error("automated login failed after {attempts} attempt(s)")]
    LoginExhausted { attempts: u32 },

    /// No extraction probe produced an in-range value.
    #[error("could not determine CGPA: all {probes} extraction probe(s) came back empty")]
    ExtractionExhausted { probes: usize },

    /// A recognizer backend could not be reached at startup.
    #[error("{backend} backend unavailable: {reason}")]
    CapabilityUnavailable {
        backend: &'static str,
        reason: String,
    },

    /// The browser session or a page element misbehaved.
    #[error("portal interaction failed: {0}")]
    Portal(String),

    /// Missing credentials or unusable configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ScraperError {
    /// Wraps a collaborator error (usually `anyhow`) as a portal failure,
    /// keeping the whole context chain in the message.
    pub fn portal(err: impl std::fmt::Display) -> Self {
        ScraperError::Portal(format!("{:#}", err))
    }

    /// Returns true if the user can recover by logging in by hand.
    pub fn needs_manual_login(&self) -> bool {
        matches!(
            self,
            ScraperError::LoginExhausted { .. }
                | ScraperError::CredentialRejected(_)
                | ScraperError::CaptchaRejected(_)
        )
    }
}

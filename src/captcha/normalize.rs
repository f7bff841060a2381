use serde::{Deserialize, Serialize};
use std::fmt;

/// What the normalizer does with output that has more digits than the captcha.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizationPolicy {
    /// Keep the first N digits. Can silently accept a misread.
    #[default]
    Truncate,
    /// Reject anything that is not exactly N digits after cleaning.
    Strict,
}

/// A captcha guess of exactly N ASCII digits.
///
/// Only constructed through [`GuessNormalizer::normalize`] or
/// [`NormalizedGuess::parse`], so holders never need to re-validate it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NormalizedGuess(String);

impl NormalizedGuess {
    /// Accepts `text` only if it is already exactly `length` digits.
    pub fn parse(text: &str, length: usize) -> Option<Self> {
        if length > 0 && text.len() == length && text.bytes().all(|b| b.is_ascii_digit()) {
            Some(Self(text.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Digit at `position`. Guesses are ASCII, so bytes and characters coincide.
    pub fn digit_at(&self, position: usize) -> Option<char> {
        self.0.as_bytes().get(position).map(|&b| b as char)
    }
}

impl fmt::Display for NormalizedGuess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cleans raw recognizer output into fixed-length numeric guesses.
#[derive(Clone, Copy, Debug)]
pub struct GuessNormalizer {
    length: usize,
    policy: NormalizationPolicy,
}

impl GuessNormalizer {
    pub fn new(length: usize, policy: NormalizationPolicy) -> Self {
        Self { length, policy }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Strips every non-digit from `raw`, then applies the length policy.
    ///
    /// Exactly N digits are accepted; more than N are truncated to the first
    /// N under [`NormalizationPolicy::Truncate`] and rejected under
    /// [`NormalizationPolicy::Strict`]; fewer than N are rejected.
    pub fn normalize(&self, raw: &str) -> Option<NormalizedGuess> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

        if digits.len() < self.length {
            return None;
        }
        if digits.len() > self.length && self.policy == NormalizationPolicy::Strict {
            return None;
        }

        NormalizedGuess::parse(&digits[..self.length], self.length)
    }
}

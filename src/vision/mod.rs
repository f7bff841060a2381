//! Multimodal model access for captcha reading and grade sheet fallback.

pub mod client;

pub use client::OllamaClient;

use anyhow::Result;

/// Sampling options sent with each request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampling {
    pub temperature: f32,
    pub top_p: Option<f32>,
}

impl Sampling {
    pub fn temperature(temperature: f32) -> Self {
        Self {
            temperature,
            top_p: None,
        }
    }
}

/// Answers a text prompt about one image.
pub trait VisionModel {
    fn ask(&self, png: &[u8], prompt: &str, sampling: Sampling) -> Result<String>;
}

/// Captcha prompts, phrased for a code of `length` digits.
pub fn captcha_prompts(length: usize) -> Vec<String> {
    let example: String = (1..=length).map(|d| char::from(b'0' + (d % 10) as u8)).collect();
    vec![
        format!(
            "The image is a security code made of {length} digits (0-9). Read them left to right \
             and answer with the {length} digits only, for example {example}."
        ),
        format!(
            "Read the {length}-digit verification code in this captcha. Ignore lines, dots and \
             background noise. Reply with just the digits."
        ),
        format!(
            "Each of the {length} positions in this captcha holds one digit. Go from left to right \
             and give me the {length}-digit number."
        ),
        format!(
            "This picture contains exactly {length} numeric characters. Identify each one and \
             respond with nothing but the {length}-digit code."
        ),
        format!("Which {length} digits are shown in this captcha? Answer with the code as one number."),
    ]
}

/// Grade sheet prompts, tried in order at low temperature.
pub const PAGE_PROMPTS: [&str; 5] = [
    "This is a screenshot of a student's grade sheet. Find the CGPA (Cumulative Grade Point \
     Average). It is a decimal between 0.0 and 10.0 such as 8.74. Reply with the number only.",
    "Locate the cumulative GPA or CGPA shown on this grade sheet and reply with just that decimal number.",
    "Look through this academic record for the overall CGPA, a value like 8.45 or 9.12. Give only the number.",
    "Find the total CGPA or cumulative grade point average in this grade sheet. Answer with the number alone.",
    "This grade sheet summarizes a student's results. What is the CGPA? Respond with the decimal value only.",
];

/// Last-resort grade sheet prompt, sent once at temperature 0.
pub const FALLBACK_PROMPT: &str = "\
You are looking at a grade sheet from a university Student Life Cycle Management (SLCM) portal.

It lists subjects, grades and credits, and somewhere it shows the CGPA (Cumulative Grade Point Average).

Find that CGPA value. It is:
- a decimal number between 0.0 and 10.0, for example 7.89 or 9.25
- labelled \"CGPA\", \"Cumulative GPA\", \"Cumulative Grade Point Average\" or similar
- usually in a summary block or a totals row near the bottom

Do not report credits, semester GPAs or marks. Reply with only the CGPA number. If the sheet says CGPA: 8.74, reply: 8.74";

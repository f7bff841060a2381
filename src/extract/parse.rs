use anyhow::Result;
use regex::{Regex, RegexBuilder};

/// A number with a fractional part: 8.74, 10.0. Integers never match.
const DECIMAL_PATTERN: &str = r"(\d+\.\d+)";

/// Label-prefixed CGPA patterns for free text (OCR output), most specific first.
/// Matched case-insensitively; capture group 1 is the value.
const LABEL_PATTERNS: [&str; 6] = [
    r"Total[:\s]*CGPA[:\s]*(\d+\.\d+)",
    r"CGPA[:\s]*(\d+\.\d+)",
    r"Cumulative[:\s]*Grade[:\s]*Point[:\s]*Average[:\s]*(\d+\.\d+)",
    r"Cumulative[:\s]*(\d+\.\d+)",
    r"Overall[:\s]*(\d+\.\d+)",
    r"Grade[:\s]*Point[:\s]*Average[:\s]*(\d+\.\d+)",
];

/// Words that mark text as talking about the CGPA itself.
pub const CGPA_KEYWORDS: [&str; 4] = ["cgpa", "cumulative", "gpa", "grade point"];
/// Words in an element's markup that make a bare decimal worth trusting.
pub const MARKUP_KEYWORDS: [&str; 3] = ["cgpa", "cumulative", "total"];
/// Words that make a table worth scanning.
pub const TABLE_KEYWORDS: [&str; 5] = ["cgpa", "gpa", "cumulative", "grade", "total"];
/// Words that mark a summary row.
pub const SUMMARY_ROW_KEYWORDS: [&str; 4] = ["total", "summary", "overall", "cgpa"];

/// How much of an element's markup is checked for keywords.
pub const MARKUP_PREFIX_CHARS: usize = 200;

/// Returns true if the lowercased `text` contains any keyword.
pub fn mentions_any(text: &str, keywords: &[&str]) -> bool {
    let lower = text.to_lowercase();
    keywords.iter().any(|k| lower.contains(k))
}

/// The first `MARKUP_PREFIX_CHARS` characters of `markup`.
pub fn markup_prefix(markup: &str) -> &str {
    match markup.char_indices().nth(MARKUP_PREFIX_CHARS) {
        Some((end, _)) => &markup[..end],
        None => markup,
    }
}

/// Every decimal number in `text`, in order of appearance.
pub fn decimals(text: &str) -> Result<Vec<f64>> {
    let decimal_regex = Regex::new(DECIMAL_PATTERN)?;
    Ok(decimal_regex
        .captures_iter(text)
        .filter_map(|caps| caps[1].parse().ok())
        .collect())
}

/// Values found after a CGPA-style label, pattern by pattern.
pub fn labelled_values(text: &str) -> Result<Vec<f64>> {
    let mut values = Vec::new();
    for pattern in LABEL_PATTERNS {
        let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        values.extend(
            regex
                .captures_iter(text)
                .filter_map(|caps| caps[1].parse::<f64>().ok()),
        );
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimals_skip_integers() {
        assert_eq!(
            decimals("Total Credits: 184, SGPA 8.5 and CGPA 8.74").unwrap(),
            [8.5, 8.74]
        );
        assert!(decimals("Total Credits: 184").unwrap().is_empty());
    }

    #[test]
    fn test_labelled_values() {
        assert_eq!(labelled_values("Name: A\ncgpa : 9.12\n").unwrap(), [9.12]);
        // Matched by both the full and the shorter "Grade Point Average" label
        assert_eq!(
            labelled_values("Cumulative Grade Point Average 7.65").unwrap(),
            [7.65, 7.65]
        );
        assert!(labelled_values("Semester 4 GPA 8.00 Credits 22.0").unwrap().is_empty());
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        assert!(mentions_any("Your CGPA is", &CGPA_KEYWORDS));
        assert!(mentions_any("Grade Point Average", &CGPA_KEYWORDS));
        assert!(!mentions_any("Credits", &CGPA_KEYWORDS));
    }

    #[test]
    fn test_markup_prefix() {
        let long = "x".repeat(300);
        assert_eq!(markup_prefix(&long).len(), MARKUP_PREFIX_CHARS);
        assert_eq!(markup_prefix("<td>8.1</td>"), "<td>8.1</td>");
    }
}

//! CGPA extraction from the grade sheet page.
//!
//! An ordered cascade of probes, from cheap DOM queries up to a vision model,
//! stopping at the first value that passes validation.

pub mod cascade;
pub mod parse;
pub mod probes;

pub use cascade::ExtractionCascade;
pub use probes::{DirectText, PageOcr, Probe, TableScan, VisionFallback, VisionPrompts};

use anyhow::Result;
use std::fmt;

/// Inclusive CGPA range accepted from any probe.
pub const CGPA_RANGE: std::ops::RangeInclusive<f64> = 0.0..=10.0;

/// DOM lookups used by the direct text probe, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DomQuery {
    /// Elements whose own text mentions CGPA
    LabelText,
    /// Table cells right after a CGPA label cell
    CellAfterLabel,
    /// Cells of the last row of each table
    LastRowCells,
    /// Short spans containing a decimal point
    DecimalSpans,
}

impl DomQuery {
    pub const ALL: [DomQuery; 4] = [
        DomQuery::LabelText,
        DomQuery::CellAfterLabel,
        DomQuery::LastRowCells,
        DomQuery::DecimalSpans,
    ];
}

/// A matched element: visible text plus its outer HTML.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DomNode {
    pub text: String,
    pub markup: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableCell {
    pub text: String,
    /// Text of the enclosing row
    pub row_text: String,
}

/// One table with its cells (td and th) in document order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PageTable {
    pub text: String,
    pub cells: Vec<TableCell>,
}

/// Read access to the loaded grade sheet.
pub trait ResultsPage {
    fn probe_dom(&self, query: DomQuery) -> Result<Vec<DomNode>>;
    fn tables(&self) -> Result<Vec<PageTable>>;
    /// PNG bytes of the visible page
    fn screenshot(&self) -> Result<Vec<u8>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeKind {
    DirectText,
    TableScan,
    PageOcr,
    VisionPrompts,
    VisionFallback,
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProbeKind::DirectText => "direct_text",
            ProbeKind::TableScan => "table_scan",
            ProbeKind::PageOcr => "page_ocr",
            ProbeKind::VisionPrompts => "vision_prompts",
            ProbeKind::VisionFallback => "vision_fallback",
        };
        f.write_str(name)
    }
}

/// A validated CGPA and where it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractionCandidate {
    pub value: f64,
    pub probe: ProbeKind,
    /// The text the value was found in, for the log and the CSV
    pub context: String,
}

impl ExtractionCandidate {
    /// Returns `None` unless `value` is a finite number in [`CGPA_RANGE`].
    pub fn new(value: f64, probe: ProbeKind, context: impl Into<String>) -> Option<Self> {
        if !value.is_finite() || !CGPA_RANGE.contains(&value) {
            return None;
        }
        Some(Self {
            value,
            probe,
            context: context.into(),
        })
    }
}

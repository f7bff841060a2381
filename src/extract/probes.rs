use anyhow::Result;
use std::sync::Arc;

use super::parse::{
    decimals, labelled_values, markup_prefix, mentions_any, CGPA_KEYWORDS, MARKUP_KEYWORDS,
    SUMMARY_ROW_KEYWORDS, TABLE_KEYWORDS,
};
use super::{DomQuery, ExtractionCandidate, ProbeKind, ResultsPage};
use crate::ocr::{prepare_page, OcrProfile, TextRecognizer};
use crate::vision::{Sampling, VisionModel};

/// One extraction strategy. Returns at most one candidate.
pub trait Probe {
    fn kind(&self) -> ProbeKind;
    fn probe(&self, page: &dyn ResultsPage) -> Result<Option<ExtractionCandidate>>;
}

/// First in-range decimal anywhere in `text`.
fn first_decimal(text: &str, kind: ProbeKind) -> Result<Option<ExtractionCandidate>> {
    Ok(decimals(text)?
        .into_iter()
        .find_map(|value| ExtractionCandidate::new(value, kind, text.trim())))
}

/// Decimals inside elements that mention the CGPA, either in their text or
/// near the start of their markup.
pub struct DirectText;

impl Probe for DirectText {
    fn kind(&self) -> ProbeKind {
        ProbeKind::DirectText
    }

    fn probe(&self, page: &dyn ResultsPage) -> Result<Option<ExtractionCandidate>> {
        for query in DomQuery::ALL {
            let nodes = match page.probe_dom(query) {
                Ok(nodes) => nodes,
                Err(e) => {
                    log::debug!("DOM query {:?} failed: {:#}", query, e);
                    continue;
                }
            };

            for node in nodes {
                let text = node.text.trim();
                if text.is_empty() {
                    continue;
                }
                let trusted = mentions_any(text, &CGPA_KEYWORDS)
                    || mentions_any(markup_prefix(&node.markup), &MARKUP_KEYWORDS);
                if !trusted {
                    continue;
                }
                if let Some(candidate) = first_decimal(text, self.kind())? {
                    log::debug!("{:?} matched: {}", query, text);
                    return Ok(Some(candidate));
                }
            }
        }
        Ok(None)
    }
}

/// Cells of grade-related tables, judged by their neighbours and their row.
pub struct TableScan;

impl Probe for TableScan {
    fn kind(&self) -> ProbeKind {
        ProbeKind::TableScan
    }

    fn probe(&self, page: &dyn ResultsPage) -> Result<Option<ExtractionCandidate>> {
        let tables = page.tables()?;
        log::info!("Found {} tables on the grade sheet", tables.len());

        for (i, table) in tables.iter().enumerate() {
            if !mentions_any(&table.text, &TABLE_KEYWORDS) {
                continue;
            }
            log::debug!("Scanning table {}", i + 1);

            for (j, cell) in table.cells.iter().enumerate() {
                let text = cell.text.trim();
                if text.is_empty() {
                    continue;
                }
                let Some(value) = decimals(text)?
                    .into_iter()
                    .find(|v| super::CGPA_RANGE.contains(v))
                else {
                    continue;
                };

                let prev = j.checked_sub(1).and_then(|k| table.cells.get(k));
                let next = table.cells.get(j + 1);
                let neighbourhood = format!(
                    "{} {} {}",
                    prev.map_or("", |c| c.text.as_str()),
                    text,
                    next.map_or("", |c| c.text.as_str())
                );

                if mentions_any(&neighbourhood, &CGPA_KEYWORDS) {
                    return Ok(ExtractionCandidate::new(value, self.kind(), neighbourhood.trim()));
                }
                if mentions_any(&cell.row_text, &SUMMARY_ROW_KEYWORDS) {
                    return Ok(ExtractionCandidate::new(value, self.kind(), cell.row_text.trim()));
                }
            }
        }
        Ok(None)
    }
}

/// Generic OCR over a contrast-boosted screenshot, then label patterns.
pub struct PageOcr {
    engine: Arc<dyn TextRecognizer>,
    profile: OcrProfile,
    contrast: f32,
}

impl PageOcr {
    pub fn new(engine: Arc<dyn TextRecognizer>, profile: OcrProfile, contrast: f32) -> Self {
        Self {
            engine,
            profile,
            contrast,
        }
    }
}

impl Probe for PageOcr {
    fn kind(&self) -> ProbeKind {
        ProbeKind::PageOcr
    }

    fn probe(&self, page: &dyn ResultsPage) -> Result<Option<ExtractionCandidate>> {
        let screenshot = prepare_page(&page.screenshot()?, self.contrast)?;
        let text = self.engine.read_text(&screenshot, &self.profile)?;
        log::info!("Page OCR read {} characters", text.len());

        Ok(labelled_values(&text)?
            .into_iter()
            .find_map(|value| ExtractionCandidate::new(value, self.kind(), format!("OCR: {}", value))))
    }
}

/// Several phrasings asked in turn; the first answer with an in-range decimal wins.
pub struct VisionPrompts {
    model: Arc<dyn VisionModel>,
    prompts: Vec<String>,
    sampling: Sampling,
}

impl VisionPrompts {
    pub fn new(model: Arc<dyn VisionModel>, prompts: Vec<String>, sampling: Sampling) -> Self {
        Self {
            model,
            prompts,
            sampling,
        }
    }
}

impl Probe for VisionPrompts {
    fn kind(&self) -> ProbeKind {
        ProbeKind::VisionPrompts
    }

    fn probe(&self, page: &dyn ResultsPage) -> Result<Option<ExtractionCandidate>> {
        let screenshot = page.screenshot()?;

        for (i, prompt) in self.prompts.iter().enumerate() {
            let answer = match self.model.ask(&screenshot, prompt, self.sampling) {
                Ok(answer) => answer,
                Err(e) => {
                    log::warn!("Vision prompt {} failed: {:#}", i + 1, e);
                    continue;
                }
            };
            log::debug!("Vision prompt {} answered: {:?}", i + 1, answer);

            if let Some(candidate) = first_decimal(&answer, self.kind())? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }
}

/// One long, explicit prompt at temperature 0.
pub struct VisionFallback {
    model: Arc<dyn VisionModel>,
    prompt: String,
    temperature: f32,
}

impl VisionFallback {
    pub fn new(model: Arc<dyn VisionModel>, prompt: impl Into<String>, temperature: f32) -> Self {
        Self {
            model,
            prompt: prompt.into(),
            temperature,
        }
    }
}

impl Probe for VisionFallback {
    fn kind(&self) -> ProbeKind {
        ProbeKind::VisionFallback
    }

    fn probe(&self, page: &dyn ResultsPage) -> Result<Option<ExtractionCandidate>> {
        let screenshot = page.screenshot()?;
        let answer = self
            .model
            .ask(&screenshot, &self.prompt, Sampling::temperature(self.temperature))?;
        log::info!("Vision fallback answered: {:?}", answer);
        first_decimal(&answer, self.kind())
    }
}

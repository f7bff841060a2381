use super::probes::Probe;
use super::{ExtractionCandidate, ResultsPage};
use crate::error::ScraperError;

/// Ordered probes, run until one produces a candidate.
pub struct ExtractionCascade {
    probes: Vec<Box<dyn Probe>>,
}

impl ExtractionCascade {
    pub fn new(probes: Vec<Box<dyn Probe>>) -> Self {
        Self { probes }
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    /// Runs the probes in order and returns the first candidate.
    ///
    /// A failing probe counts as empty. Later probes are never run once one
    /// succeeds.
    pub fn run(&self, page: &dyn ResultsPage) -> Result<ExtractionCandidate, ScraperError> {
        for (i, probe) in self.probes.iter().enumerate() {
            log::info!(
                "Extraction probe {}/{}: {}",
                i + 1,
                self.probes.len(),
                probe.kind()
            );

            match probe.probe(page) {
                Ok(Some(candidate)) => {
                    log::info!(
                        "CGPA {:.2} found by {} ({})",
                        candidate.value,
                        candidate.probe,
                        candidate.context
                    );
                    return Ok(candidate);
                }
                Ok(None) => log::info!("{} found nothing", probe.kind()),
                Err(e) => log::warn!("{} failed: {:#}", probe.kind(), e),
            }
        }

        Err(ScraperError::ExtractionExhausted {
            probes: self.probes.len(),
        })
    }
}

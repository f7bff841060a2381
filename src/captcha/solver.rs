use super::consensus::{AttemptPool, ConsensusEngine, ConsensusResult};
use super::normalize::{GuessNormalizer, NormalizedGuess};
use super::recognizer::Recognizer;

/// Runs every available recognizer over a captcha image and votes.
pub struct CaptchaSolver {
    recognizers: Vec<Box<dyn Recognizer>>,
    normalizer: GuessNormalizer,
    engine: ConsensusEngine,
}

impl CaptchaSolver {
    pub fn new(recognizers: Vec<Box<dyn Recognizer>>, normalizer: GuessNormalizer, engine: ConsensusEngine) -> Self {
        Self {
            recognizers,
            normalizer,
            engine,
        }
    }

    pub fn captcha_length(&self) -> usize {
        self.normalizer.length()
    }

    pub fn has_recognizers(&self) -> bool {
        !self.recognizers.is_empty()
    }

    /// One pass of every recognizer over its own variants of `png`.
    ///
    /// Returns the normalized guesses in the order they were produced.
    pub fn collect_round(&self, png: &[u8]) -> Vec<NormalizedGuess> {
        let mut round = Vec::new();

        for recognizer in &self.recognizers {
            let kind = recognizer.kind();
            let mut accepted = 0;
            let mut produced = 0;

            for variant in recognizer.variants(png) {
                for raw in recognizer.recognize(&variant) {
                    produced += 1;
                    match self.normalizer.normalize(&raw) {
                        Some(guess) => {
                            accepted += 1;
                            round.push(guess);
                        }
                        None => log::debug!("{} ({}) unusable: {:?}", kind, variant.label, raw),
                    }
                }
            }

            log::info!("{} recognizer: {}/{} answers usable", kind, accepted, produced);
        }

        round
    }

    /// Adds a fresh round to `pool` and decides over the whole pool.
    pub fn solve(&self, png: &[u8], pool: &mut AttemptPool) -> Option<ConsensusResult> {
        let round = self.collect_round(png);
        log::info!("Collected {} guesses ({} in pool before)", round.len(), pool.len());
        pool.extend(round);

        let result = self.engine.decide(pool)?;
        log::info!(
            "Captcha guess {} ({:?}, weight {:.1}, confidence {:.0}%)",
            result.guess,
            result.method,
            result.weight,
            result.confidence * 100.0
        );
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captcha::consensus::ConsensusMethod;
    use crate::captcha::normalize::NormalizationPolicy;
    use crate::captcha::recognizer::{RawGuess, RecognizerKind};
    use crate::captcha::variants::ImageVariant;

    struct Fixed {
        kind: RecognizerKind,
        answers: Vec<&'static str>,
    }

    impl Recognizer for Fixed {
        fn kind(&self) -> RecognizerKind {
            self.kind
        }

        fn variants(&self, source: &[u8]) -> Vec<ImageVariant> {
            vec![ImageVariant::original(source)]
        }

        fn recognize(&self, _variant: &ImageVariant) -> Vec<RawGuess> {
            self.answers.iter().map(|a| a.to_string()).collect()
        }
    }

    fn solver(recognizers: Vec<Box<dyn Recognizer>>) -> CaptchaSolver {
        CaptchaSolver::new(
            recognizers,
            GuessNormalizer::new(3, NormalizationPolicy::Truncate),
            ConsensusEngine::default(),
        )
    }

    #[test]
    fn test_round_keeps_backend_order() {
        let solver = solver(vec![
            Box::new(Fixed {
                kind: RecognizerKind::VisionModel,
                answers: vec!["The code is 739", "no idea"],
            }),
            Box::new(Fixed {
                kind: RecognizerKind::Ocr,
                answers: vec!["7", "1234"],
            }),
        ]);

        let round: Vec<String> = solver
            .collect_round(b"png")
            .iter()
            .map(|g| g.to_string())
            .collect();
        assert_eq!(round, ["739", "123"]);
    }

    #[test]
    fn test_pool_accumulates_across_rounds() {
        let solver = solver(vec![Box::new(Fixed {
            kind: RecognizerKind::Ocr,
            answers: vec!["905"],
        })]);
        let mut pool = AttemptPool::new(3);

        let first = solver.solve(b"png", &mut pool).unwrap();
        assert_eq!(first.method, ConsensusMethod::Positional);

        let second = solver.solve(b"png", &mut pool).unwrap();
        assert_eq!(second.guess.as_str(), "905");
        assert_eq!(second.method, ConsensusMethod::Agreement);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_no_usable_answers() {
        let solver = solver(vec![Box::new(Fixed {
            kind: RecognizerKind::Ocr,
            answers: vec!["", "ab"],
        })]);
        let mut pool = AttemptPool::new(3);
        assert!(solver.solve(b"png", &mut pool).is_none());
        assert!(pool.is_empty());
    }
}

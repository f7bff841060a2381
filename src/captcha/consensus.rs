//! Captcha consensus voting.
//!
//! Collapses a pool of noisy guesses into one answer:
//! - Pass 1: weighted full-string vote, later guesses weigh slightly more
//! - Pass 2: per-position majority when no full string clears the threshold

use super::normalize::NormalizedGuess;

/// Guesses gathered during one top-level login attempt, oldest first.
///
/// Append-only. Every entry has the pool's length; a new login attempt
/// starts with a new pool.
#[derive(Clone, Debug)]
pub struct AttemptPool {
    length: usize,
    guesses: Vec<NormalizedGuess>,
}

impl AttemptPool {
    pub fn new(length: usize) -> Self {
        Self {
            length,
            guesses: Vec::new(),
        }
    }

    /// Appends a guess. Returns false (and drops it) if its length differs
    /// from the pool's captcha length.
    pub fn push(&mut self, guess: NormalizedGuess) -> bool {
        if guess.len() != self.length {
            log::warn!(
                "Dropping guess {} (expected {} digits)",
                guess,
                self.length
            );
            return false;
        }
        self.guesses.push(guess);
        true
    }

    pub fn extend(&mut self, guesses: impl IntoIterator<Item = NormalizedGuess>) {
        for guess in guesses {
            self.push(guess);
        }
    }

    pub fn len(&self) -> usize {
        self.guesses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guesses.is_empty()
    }

    pub fn captcha_length(&self) -> usize {
        self.length
    }

    pub fn guesses(&self) -> &[NormalizedGuess] {
        &self.guesses
    }
}

/// Which pass produced the consensus guess.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsensusMethod {
    /// The best full string cleared the weight threshold. Usually a repeated
    /// value, though a single guess late in a long pool weighs enough alone.
    Agreement,
    /// Synthesized from the most frequent digit at each position
    Positional,
}

/// The chosen guess plus diagnostics. Confidence never drives control flow.
#[derive(Clone, Debug, PartialEq)]
pub struct ConsensusResult {
    pub guess: NormalizedGuess,
    pub method: ConsensusMethod,
    /// Summed weight of the best full-string value
    pub weight: f64,
    /// Mean share of the pool that agrees with the guess, per position (0.0-1.0)
    pub confidence: f64,
}

/// Weighted-frequency voting with a positional fallback.
#[derive(Clone, Copy, Debug)]
pub struct ConsensusEngine {
    weight_step: f64,
    agreement_threshold: f64,
}

impl Default for ConsensusEngine {
    fn default() -> Self {
        Self {
            weight_step: 0.1,
            agreement_threshold: 1.5,
        }
    }
}

impl ConsensusEngine {
    pub fn new(weight_step: f64, agreement_threshold: f64) -> Self {
        Self {
            weight_step,
            agreement_threshold,
        }
    }

    /// Picks the best guess from the pool, or `None` if the pool is empty.
    ///
    /// Safe to call repeatedly as the pool grows.
    pub fn decide(&self, pool: &AttemptPool) -> Option<ConsensusResult> {
        if pool.is_empty() {
            return None;
        }

        let (best, weight) = self.weighted_vote(pool.guesses())?;
        let (positional, confidence) = positional_vote(pool.guesses(), pool.captcha_length())?;

        log::debug!(
            "Consensus over {} guesses: best full string {} (weight {:.1}), positional {} (confidence {:.2})",
            pool.len(),
            best,
            weight,
            positional,
            confidence
        );

        if weight > self.agreement_threshold {
            let confidence = agreement_share(pool.guesses(), best);
            return Some(ConsensusResult {
                guess: best.clone(),
                method: ConsensusMethod::Agreement,
                weight,
                confidence,
            });
        }

        Some(ConsensusResult {
            guess: positional,
            method: ConsensusMethod::Positional,
            weight,
            confidence,
        })
    }

    /// Sums `1.0 + step * index` per distinct value. Ties between equal sums
    /// go to the value that entered the pool first.
    fn weighted_vote<'a>(&self, guesses: &'a [NormalizedGuess]) -> Option<(&'a NormalizedGuess, f64)> {
        let mut totals: Vec<(&NormalizedGuess, f64)> = Vec::new();

        for (index, guess) in guesses.iter().enumerate() {
            let weight = 1.0 + self.weight_step * index as f64;
            match totals.iter_mut().find(|(value, _)| *value == guess) {
                Some(entry) => entry.1 += weight,
                None => totals.push((guess, weight)),
            }
        }

        let mut best: Option<(&NormalizedGuess, f64)> = None;
        for (value, total) in totals {
            if best.is_none_or(|(_, best_total)| total > best_total) {
                best = Some((value, total));
            }
        }
        best
    }
}

/// Most frequent digit per position, concatenated.
///
/// Ties go to the digit first seen at that position in pool order.
/// Returns the synthesized guess and the mean per-position share.
fn positional_vote(guesses: &[NormalizedGuess], length: usize) -> Option<(NormalizedGuess, f64)> {
    if guesses.is_empty() {
        return None;
    }

    let mut digits = String::with_capacity(length);
    let mut share_sum = 0.0;

    for position in 0..length {
        // (digit, count) in first-seen order
        let mut counts: Vec<(char, usize)> = Vec::new();
        for guess in guesses {
            let Some(digit) = guess.digit_at(position) else {
                continue;
            };
            match counts.iter_mut().find(|(d, _)| *d == digit) {
                Some(entry) => entry.1 += 1,
                None => counts.push((digit, 1)),
            }
        }

        let mut winner: Option<(char, usize)> = None;
        for (digit, count) in counts {
            if winner.is_none_or(|(_, best)| count > best) {
                winner = Some((digit, count));
            }
        }

        let (digit, count) = winner?;
        log::debug!(
            "Position {}: {} ({}/{} votes)",
            position + 1,
            digit,
            count,
            guesses.len()
        );
        digits.push(digit);
        share_sum += count as f64 / guesses.len() as f64;
    }

    let confidence = share_sum / length.max(1) as f64;
    NormalizedGuess::parse(&digits, length).map(|guess| (guess, confidence))
}

/// Fraction of the pool equal to `value`.
fn agreement_share(guesses: &[NormalizedGuess], value: &NormalizedGuess) -> f64 {
    let matching = guesses.iter().filter(|g| *g == value).count();
    matching as f64 / guesses.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(values: &[&str]) -> AttemptPool {
        let mut pool = AttemptPool::new(3);
        for value in values {
            assert!(pool.push(NormalizedGuess::parse(value, 3).unwrap()));
        }
        pool
    }

    #[test]
    fn test_empty_pool_has_no_guess() {
        let engine = ConsensusEngine::default();
        assert!(engine.decide(&AttemptPool::new(3)).is_none());
    }

    #[test]
    fn test_repeated_value_wins() {
        let engine = ConsensusEngine::default();
        for n in 2..8 {
            let values = vec!["482"; n];
            let result = engine.decide(&pool(&values)).unwrap();
            assert_eq!(result.guess.as_str(), "482");
            assert_eq!(result.method, ConsensusMethod::Agreement);
        }
        // 1.0 + 1.1
        let result = engine.decide(&pool(&["482", "482"])).unwrap();
        assert!((result.weight - 2.1).abs() < 1e-9);
        assert!((result.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_agreement_beats_scattered_votes() {
        let engine = ConsensusEngine::default();
        let result = engine
            .decide(&pool(&["111", "739", "222", "739", "333"]))
            .unwrap();
        assert_eq!(result.guess.as_str(), "739");
        assert_eq!(result.method, ConsensusMethod::Agreement);
        // 1.1 + 1.3
        assert!((result.weight - 2.4).abs() < 1e-9);
    }

    #[test]
    fn test_single_guess_falls_back_to_positional() {
        let engine = ConsensusEngine::default();
        let result = engine.decide(&pool(&["905"])).unwrap();
        assert_eq!(result.guess.as_str(), "905");
        assert_eq!(result.method, ConsensusMethod::Positional);
    }

    #[test]
    fn test_positional_majority() {
        let engine = ConsensusEngine::default();
        // No full-string repeats; each position has a clear majority.
        let result = engine.decide(&pool(&["123", "124", "133"])).unwrap();
        assert_eq!(result.guess.as_str(), "123");
        assert_eq!(result.method, ConsensusMethod::Positional);
        // shares: 3/3, 2/3, 2/3
        assert!((result.confidence - 7.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_positional_tie_goes_to_first_seen() {
        let engine = ConsensusEngine::default();
        let input = ["561", "782"];
        for _ in 0..5 {
            let result = engine.decide(&pool(&input)).unwrap();
            assert_eq!(result.guess.as_str(), "561");
        }
        let result = engine.decide(&pool(&["782", "561"])).unwrap();
        assert_eq!(result.guess.as_str(), "782");
    }

    #[test]
    fn test_positional_can_synthesize_unseen_value() {
        let engine = ConsensusEngine::default();
        let result = engine.decide(&pool(&["128", "423", "193", "420"])).unwrap();
        // position 0: 1,4 tie -> 1 (first); position 1: 2 (3 votes); position 2: 3 (2 votes)
        assert_eq!(result.guess.as_str(), "123");
        assert_eq!(result.method, ConsensusMethod::Positional);
    }

    #[test]
    fn test_late_entries_weigh_more() {
        let engine = ConsensusEngine::default();
        // "111" at 0 and 1: 1.0 + 1.1 = 2.1; "222" at 2 and 3: 1.2 + 1.3 = 2.5
        let result = engine.decide(&pool(&["111", "111", "222", "222"])).unwrap();
        assert_eq!(result.guess.as_str(), "222");
    }

    #[test]
    fn test_equal_weights_go_to_first_seen() {
        // With no index weighting, both values total 2.0
        let engine = ConsensusEngine::new(0.0, 1.5);
        let result = engine.decide(&pool(&["111", "222", "111", "222"])).unwrap();
        assert_eq!(result.guess.as_str(), "111");
    }

    #[test]
    fn test_threshold_is_exclusive() {
        // Single guess at index 5 weighs exactly 1.5, which does not clear 1.5
        let engine = ConsensusEngine::default();
        let result = engine
            .decide(&pool(&["100", "200", "300", "400", "500", "677"]))
            .unwrap();
        assert_eq!(result.method, ConsensusMethod::Positional);
        assert!((result.weight - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_late_single_guess_clears_threshold() {
        // "777" at index 6 weighs 1.6 on its own
        let engine = ConsensusEngine::default();
        let result = engine
            .decide(&pool(&["100", "200", "300", "400", "500", "600", "777"]))
            .unwrap();
        assert_eq!(result.guess.as_str(), "777");
        assert_eq!(result.method, ConsensusMethod::Agreement);
        assert!((result.weight - 1.6).abs() < 1e-9);
        assert!((result.confidence - 1.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_incremental_rerun() {
        let engine = ConsensusEngine::default();
        let mut growing = pool(&["318"]);
        assert_eq!(
            engine.decide(&growing).unwrap().method,
            ConsensusMethod::Positional
        );

        growing.extend([
            NormalizedGuess::parse("518", 3).unwrap(),
            NormalizedGuess::parse("518", 3).unwrap(),
        ]);
        let result = engine.decide(&growing).unwrap();
        assert_eq!(result.guess.as_str(), "518");
        assert_eq!(result.method, ConsensusMethod::Agreement);
    }

    #[test]
    fn test_pool_rejects_wrong_length() {
        let mut pool = AttemptPool::new(3);
        assert!(!pool.push(NormalizedGuess::parse("1234", 4).unwrap()));
        assert!(pool.is_empty());
    }
}

//! Login retry state machine.
//!
//! Sequences: Idle → Filling → CaptchaGuessing → Submitted → Success.
//! A captcha rejection loops back through CaptchaRejected while captcha
//! attempts remain; a failed attempt goes back to Idle, which starts the
//! next top-level attempt with an empty guess pool.

use std::time::Duration;

use super::{LoginPortal, SubmitOutcome};
use crate::captcha::{AttemptPool, CaptchaSolver, NormalizedGuess};
use crate::config::{Credentials, LoginConfig};
use crate::error::ScraperError;

/// Login state machine states.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginState {
    /// Between top-level attempts (initial state)
    Idle,
    /// Login page open, entering credentials
    Filling,
    /// Reading the captcha and voting on a guess
    CaptchaGuessing,
    /// A guess is ready to submit
    Submitted { guess: NormalizedGuess },
    /// The portal refused the last guess
    CaptchaRejected,
    /// The current top-level attempt is over
    AttemptFailed(ScraperError),
    /// Logged in
    Success,
    /// The loop is over without a login
    FatalError(ScraperError),
}

impl std::fmt::Display for LoginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoginState::Idle => write!(f, "Idle"),
            LoginState::Filling => write!(f, "Filling credentials"),
            LoginState::CaptchaGuessing => write!(f, "Guessing captcha"),
            LoginState::Submitted { guess } => write!(f, "Submitting {}", guess),
            LoginState::CaptchaRejected => write!(f, "Captcha rejected"),
            LoginState::AttemptFailed(e) => write!(f, "Attempt failed: {}", e),
            LoginState::Success => write!(f, "Success"),
            LoginState::FatalError(e) => write!(f, "Error: {}", e),
        }
    }
}

/// Summary of a finished login loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoginReport {
    /// Top-level attempts started
    pub attempts: u32,
    /// Guesses submitted to the portal
    pub submissions: u32,
    /// Rejected guesses and the portal's message for each
    pub rejected: Vec<(NormalizedGuess, String)>,
}

impl LoginReport {
    pub fn log_summary(&self) {
        log::info!(
            "Login report: {} attempt(s), {} captcha submission(s)",
            self.attempts,
            self.submissions
        );
        for (guess, message) in &self.rejected {
            log::info!("  rejected {}: {}", guess, message);
        }
    }
}

/// Login loop context. All counters live here.
pub struct LoginContext<'a, P: LoginPortal + ?Sized> {
    pub state: LoginState,
    portal: &'a mut P,
    solver: &'a CaptchaSolver,
    credentials: &'a Credentials,
    config: LoginConfig,
    /// Current top-level attempt (1-based once started)
    pub attempt: u32,
    /// Captcha guesses made in the current attempt
    pub captcha_attempt: u32,
    pub pool: AttemptPool,
    pub report: LoginReport,
}

impl<'a, P: LoginPortal + ?Sized> LoginContext<'a, P> {
    pub fn new(
        portal: &'a mut P,
        solver: &'a CaptchaSolver,
        credentials: &'a Credentials,
        config: LoginConfig,
    ) -> Self {
        Self {
            state: LoginState::Idle,
            portal,
            solver,
            credentials,
            config,
            attempt: 0,
            captcha_attempt: 0,
            pool: AttemptPool::new(solver.captcha_length()),
            report: LoginReport::default(),
        }
    }

    fn pause(&self, ms: u64) {
        if ms > 0 {
            std::thread::sleep(Duration::from_millis(ms));
        }
    }

    fn refresh_captcha(&mut self) {
        if let Err(e) = self.portal.refresh_captcha() {
            log::warn!("Captcha refresh failed: {:#}", e);
        }
        self.pause(self.config.refresh_delay_ms);
    }

    /// Advances the state machine by one step.
    ///
    /// Returns `true` while the loop should continue, `false` once it reached
    /// `Success` or `FatalError`.
    pub fn step(&mut self) -> bool {
        let state = std::mem::replace(&mut self.state, LoginState::Idle);

        self.state = match state {
            LoginState::Idle => {
                if self.attempt >= self.config.max_login_attempts {
                    LoginState::FatalError(ScraperError::LoginExhausted {
                        attempts: self.attempt,
                    })
                } else {
                    self.attempt += 1;
                    self.report.attempts = self.attempt;
                    self.captcha_attempt = 0;
                    self.pool = AttemptPool::new(self.solver.captcha_length());
                    log::info!(
                        "Login attempt {}/{}",
                        self.attempt,
                        self.config.max_login_attempts
                    );

                    match self.portal.open_login_page() {
                        Ok(()) => LoginState::Filling,
                        Err(e) => LoginState::AttemptFailed(ScraperError::portal(
                            e.context("Could not open login page"),
                        )),
                    }
                }
            }

            LoginState::Filling => match self.portal.fill_credentials(self.credentials) {
                Ok(()) => LoginState::CaptchaGuessing,
                Err(e) => LoginState::AttemptFailed(ScraperError::portal(
                    e.context("Could not fill credentials"),
                )),
            },

            LoginState::CaptchaGuessing => {
                if self.captcha_attempt >= self.config.max_captcha_attempts {
                    LoginState::AttemptFailed(ScraperError::CaptchaRejected(format!(
                        "no accepted captcha after {} tries",
                        self.captcha_attempt
                    )))
                } else {
                    self.captcha_attempt += 1;
                    log::info!(
                        "Captcha attempt {}/{}",
                        self.captcha_attempt,
                        self.config.max_captcha_attempts
                    );
                    self.guess_captcha()
                }
            }

            LoginState::Submitted { guess } => {
                self.report.submissions += 1;
                match self.portal.submit(guess.as_str()) {
                    Ok(SubmitOutcome::Success) => LoginState::Success,
                    Ok(SubmitOutcome::CaptchaError(message)) => {
                        log::warn!("Captcha {} rejected: {}", guess, message);
                        self.report.rejected.push((guess, message));
                        LoginState::CaptchaRejected
                    }
                    Ok(SubmitOutcome::OtherError(message)) => {
                        log::error!("Login rejected: {}", message);
                        LoginState::FatalError(ScraperError::CredentialRejected(message))
                    }
                    Err(e) => LoginState::AttemptFailed(ScraperError::portal(e.context("Submit failed"))),
                }
            }

            LoginState::CaptchaRejected => {
                if self.captcha_attempt < self.config.max_captcha_attempts {
                    self.refresh_captcha();
                    LoginState::CaptchaGuessing
                } else {
                    let message = self
                        .report
                        .rejected
                        .last()
                        .map(|(_, message)| message.clone())
                        .unwrap_or_default();
                    LoginState::AttemptFailed(ScraperError::CaptchaRejected(format!(
                        "{} ({} tries)",
                        message, self.captcha_attempt
                    )))
                }
            }

            LoginState::AttemptFailed(reason) => {
                log::warn!("Login attempt {} failed: {}", self.attempt, reason);
                if self.attempt < self.config.max_login_attempts {
                    self.pause(self.config.retry_delay_ms);
                }
                LoginState::Idle
            }

            done @ (LoginState::Success | LoginState::FatalError(_)) => {
                self.state = done;
                return false;
            }
        };

        !matches!(self.state, LoginState::Success | LoginState::FatalError(_))
    }

    fn guess_captcha(&mut self) -> LoginState {
        let png = match self.portal.capture_captcha() {
            Ok(png) => png,
            Err(e) => {
                return LoginState::AttemptFailed(ScraperError::portal(
                    e.context("Could not capture captcha"),
                ));
            }
        };

        match self.solver.solve(&png, &mut self.pool) {
            Some(result) => LoginState::Submitted {
                guess: result.guess,
            },
            None => {
                log::warn!("No usable captcha guess, refreshing");
                self.refresh_captcha();
                LoginState::CaptchaGuessing
            }
        }
    }

    /// Drives the loop to completion.
    pub fn run(&mut self) -> Result<LoginReport, ScraperError> {
        while self.step() {
            log::debug!("Login state: {}", self.state);
        }

        self.report.log_summary();
        match &self.state {
            LoginState::Success => {
                log::info!("Login successful");
                Ok(self.report.clone())
            }
            LoginState::FatalError(e) => Err(e.clone()),
            other => Err(ScraperError::Portal(format!("login loop stopped in state {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captcha::{
        ConsensusEngine, GuessNormalizer, ImageVariant, NormalizationPolicy, RawGuess, Recognizer,
        RecognizerKind,
    };
    use anyhow::{anyhow, Result};
    use std::collections::VecDeque;

    /// Answers every captcha with the same text.
    struct Constant(&'static str);

    impl Recognizer for Constant {
        fn kind(&self) -> RecognizerKind {
            RecognizerKind::Ocr
        }

        fn variants(&self, source: &[u8]) -> Vec<ImageVariant> {
            vec![ImageVariant::original(source)]
        }

        fn recognize(&self, _variant: &ImageVariant) -> Vec<RawGuess> {
            vec![self.0.to_string()]
        }
    }

    #[derive(Default)]
    struct FakePortal {
        outcomes: VecDeque<SubmitOutcome>,
        fail_open: bool,
        opens: u32,
        submits: Vec<String>,
        refreshes: u32,
    }

    impl FakePortal {
        fn with_outcomes(outcomes: Vec<SubmitOutcome>) -> Self {
            Self {
                outcomes: outcomes.into(),
                ..Self::default()
            }
        }
    }

    impl LoginPortal for FakePortal {
        fn open_login_page(&mut self) -> Result<()> {
            self.opens += 1;
            if self.fail_open {
                return Err(anyhow!("page did not load"));
            }
            Ok(())
        }

        fn fill_credentials(&mut self, _credentials: &Credentials) -> Result<()> {
            Ok(())
        }

        fn capture_captcha(&mut self) -> Result<Vec<u8>> {
            Ok(b"captcha".to_vec())
        }

        fn submit(&mut self, guess: &str) -> Result<SubmitOutcome> {
            self.submits.push(guess.to_string());
            Ok(self
                .outcomes
                .pop_front()
                .unwrap_or_else(|| SubmitOutcome::CaptchaError("Invalid captcha".into())))
        }

        fn refresh_captcha(&mut self) -> Result<()> {
            self.refreshes += 1;
            Ok(())
        }
    }

    fn solver(answer: &'static str) -> CaptchaSolver {
        CaptchaSolver::new(
            vec![Box::new(Constant(answer))],
            GuessNormalizer::new(3, NormalizationPolicy::Truncate),
            ConsensusEngine::default(),
        )
    }

    fn config(max_login_attempts: u32, max_captcha_attempts: u32) -> LoginConfig {
        LoginConfig {
            max_login_attempts,
            max_captcha_attempts,
            retry_delay_ms: 0,
            refresh_delay_ms: 0,
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            username: "student".into(),
            password: "secret".into(),
        }
    }

    #[test]
    fn test_success_on_first_submit() {
        let mut portal = FakePortal::with_outcomes(vec![SubmitOutcome::Success]);
        let solver = solver("482");
        let creds = credentials();

        let report = LoginContext::new(&mut portal, &solver, &creds, config(3, 3))
            .run()
            .unwrap();
        assert_eq!(report.attempts, 1);
        assert_eq!(report.submissions, 1);
        assert_eq!(portal.submits, ["482"]);
    }

    #[test]
    fn test_captcha_rejections_exhaust_login() {
        let mut portal = FakePortal::default();
        let solver = solver("111");
        let creds = credentials();

        let err = LoginContext::new(&mut portal, &solver, &creds, config(1, 3))
            .run()
            .unwrap_err();
        assert_eq!(err, ScraperError::LoginExhausted { attempts: 1 });
        assert_eq!(portal.submits.len(), 3);
        assert_eq!(portal.opens, 1);
        // refreshed after the first two rejections only
        assert_eq!(portal.refreshes, 2);
    }

    #[test]
    fn test_credential_rejection_stops_immediately() {
        let mut portal = FakePortal::with_outcomes(vec![SubmitOutcome::OtherError(
            "Invalid username or password".into(),
        )]);
        let solver = solver("111");
        let creds = credentials();

        let err = LoginContext::new(&mut portal, &solver, &creds, config(3, 3))
            .run()
            .unwrap_err();
        assert!(matches!(err, ScraperError::CredentialRejected(_)));
        assert_eq!(portal.submits.len(), 1);
        assert_eq!(portal.opens, 1);
    }

    #[test]
    fn test_pool_resets_between_attempts() {
        let mut portal = FakePortal::default();
        let solver = solver("222");
        let creds = credentials();

        let mut ctx = LoginContext::new(&mut portal, &solver, &creds, config(2, 2));
        let err = ctx.run().unwrap_err();
        assert_eq!(err, ScraperError::LoginExhausted { attempts: 2 });
        // Only the second attempt's two rounds remain
        assert_eq!(ctx.pool.len(), 2);
        assert_eq!(ctx.report.rejected.len(), 4);
        drop(ctx);
        assert_eq!(portal.opens, 2);
    }

    #[test]
    fn test_success_after_rejection_reuses_pool() {
        let mut portal = FakePortal::with_outcomes(vec![
            SubmitOutcome::CaptchaError("Invalid captcha".into()),
            SubmitOutcome::Success,
        ]);
        let solver = solver("305");
        let creds = credentials();

        let mut ctx = LoginContext::new(&mut portal, &solver, &creds, config(3, 3));
        let report = ctx.run().unwrap();
        assert_eq!(report.submissions, 2);
        assert_eq!(ctx.pool.len(), 2);
        assert_eq!(ctx.captcha_attempt, 2);
    }

    #[test]
    fn test_unusable_guesses_count_as_attempts() {
        let mut portal = FakePortal::default();
        let solver = solver("no digits");
        let creds = credentials();

        let err = LoginContext::new(&mut portal, &solver, &creds, config(1, 3))
            .run()
            .unwrap_err();
        assert_eq!(err, ScraperError::LoginExhausted { attempts: 1 });
        assert!(portal.submits.is_empty());
        assert_eq!(portal.refreshes, 3);
    }

    #[test]
    fn test_portal_error_abandons_attempt() {
        let mut portal = FakePortal {
            fail_open: true,
            ..FakePortal::default()
        };
        let solver = solver("111");
        let creds = credentials();

        let err = LoginContext::new(&mut portal, &solver, &creds, config(3, 3))
            .run()
            .unwrap_err();
        assert_eq!(err, ScraperError::LoginExhausted { attempts: 3 });
        assert_eq!(portal.opens, 3);
    }
}

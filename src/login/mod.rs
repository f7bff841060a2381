//! Automated portal login with captcha retries.

pub mod state;

pub use state::LoginContext;

use anyhow::Result;

use crate::config::Credentials;

/// What the portal said after a login submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Success,
    /// The error label mentioned the captcha
    CaptchaError(String),
    /// Any other error label (wrong password, locked account, ...)
    OtherError(String),
}

/// The login page operations the retry loop needs.
pub trait LoginPortal {
    fn open_login_page(&mut self) -> Result<()>;
    fn fill_credentials(&mut self, credentials: &Credentials) -> Result<()>;
    /// PNG bytes of the captcha element
    fn capture_captcha(&mut self) -> Result<Vec<u8>>;
    fn submit(&mut self, guess: &str) -> Result<SubmitOutcome>;
    fn refresh_captcha(&mut self) -> Result<()>;
}

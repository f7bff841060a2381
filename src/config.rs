//! Configuration types for the scraper.
//!
//! Loads settings from config.json at startup. Provides portal URLs, retry
//! budgets, consensus parameters and recognizer backend settings.
//! Credentials are never read from the file, only from the environment.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use crate::captcha::NormalizationPolicy;
use crate::error::ScraperError;

/// Global configuration instance, initialized once at startup.
static CONFIG: OnceLock<ScraperConfig> = OnceLock::new();

const USERNAME_ENV: &str = "SLCM_USERNAME";
const PASSWORD_ENV: &str = "SLCM_PASSWORD";

/// Complete scraper configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub portal: PortalConfig,
    pub login: LoginConfig,
    pub captcha: CaptchaConfig,
    pub ocr: OcrConfig,
    pub vision: VisionConfig,
    /// Wait for Enter before closing the browser at the end of a run
    pub keep_browser_open: bool,
}

/// Portal URLs and browser session settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub login_url: String,
    pub grade_sheet_url: String,
    /// Address of a running chromedriver (or any W3C WebDriver server)
    pub webdriver_url: String,
    /// Extra Chrome command line arguments
    pub browser_args: Vec<String>,
    /// Lowercase URL fragments that indicate a successful login
    pub success_url_markers: Vec<String>,
    /// Lowercase URL fragment of the student home page (manual login check)
    pub home_url_marker: String,
    /// Maximum wait for an element to appear (milliseconds)
    pub element_timeout_ms: u64,
    /// Maximum wait for the grade sheet tab to open (milliseconds)
    pub new_tab_timeout_ms: u64,
    /// Pause after page loads and clicks (milliseconds)
    pub page_settle_ms: u64,
    /// Wait after clicking the login button before checking the outcome (milliseconds)
    pub submit_wait_ms: u64,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            login_url: "https://slcm.manipal.edu/loginForm.aspx".to_string(),
            grade_sheet_url: "https://slcm.manipal.edu/GradeSheet.aspx".to_string(),
            webdriver_url: "http://localhost:9515".to_string(),
            browser_args: vec![
                "--start-maximized".to_string(),
                "--disable-notifications".to_string(),
                "--no-sandbox".to_string(),
                "--disable-dev-shm-usage".to_string(),
                "--disable-gpu".to_string(),
                "--disable-blink-features=AutomationControlled".to_string(),
            ],
            success_url_markers: vec![
                "studenthomepage.aspx".to_string(),
                "dashboard".to_string(),
                "home".to_string(),
                "welcome".to_string(),
                "student".to_string(),
            ],
            home_url_marker: "studenthomepage.aspx".to_string(),
            element_timeout_ms: 10_000,
            new_tab_timeout_ms: 15_000,
            page_settle_ms: 3_000,
            submit_wait_ms: 5_000,
        }
    }
}

/// Retry budget for the login state machine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    /// Top-level login attempts (each starts from a fresh login page)
    pub max_login_attempts: u32,
    /// Captcha guesses per login attempt
    pub max_captcha_attempts: u32,
    /// Delay before starting the next top-level attempt (milliseconds)
    pub retry_delay_ms: u64,
    /// Delay after refreshing the captcha image (milliseconds)
    pub refresh_delay_ms: u64,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            max_login_attempts: 3,
            max_captcha_attempts: 3,
            retry_delay_ms: 3_000,
            refresh_delay_ms: 2_000,
        }
    }
}

/// Captcha shape and consensus parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptchaConfig {
    /// Number of digits in the captcha
    pub length: usize,
    /// Extra weight per position in the attempt pool (later guesses weigh more)
    pub weight_step: f64,
    /// Summed weight a full-string value must exceed to win outright
    pub agreement_threshold: f64,
    /// What to do with recognizer output that has too many digits
    pub normalization: NormalizationPolicy,
    /// How many times the vision prompts are replayed per captcha image
    pub vision_passes: u32,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            length: 3,
            weight_step: 0.1,
            agreement_threshold: 1.5,
            normalization: NormalizationPolicy::Truncate,
            vision_passes: 2,
        }
    }
}

/// Tesseract settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub enabled: bool,
    /// Explicit tesseract executable, checked before any lookup
    pub tesseract_path: Option<String>,
    /// Profiles used on captcha variants (tesseract command line options)
    pub captcha_profiles: Vec<String>,
    /// Clip limits for the histogram-equalized captcha variants
    pub contrast_levels: Vec<f32>,
    /// Profile used on the full grade sheet screenshot
    pub page_profile: String,
    /// Contrast boost applied to the grade sheet screenshot before OCR
    pub page_contrast: f32,
    /// A tesseract run longer than this is killed (seconds)
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        let whitelist = "-c tessedit_char_whitelist=0123456789";
        Self {
            enabled: true,
            tesseract_path: None,
            captcha_profiles: vec![
                format!("--oem 3 --psm 8 {}", whitelist),
                format!("--oem 3 --psm 7 {}", whitelist),
                format!("--oem 1 --psm 8 {}", whitelist),
                format!("--psm 13 --oem 3 {}", whitelist),
            ],
            contrast_levels: vec![2.0, 3.0, 4.0, 5.0],
            page_profile: "--oem 3 --psm 6".to_string(),
            page_contrast: 2.0,
            timeout_secs: 30,
        }
    }
}

/// Ollama vision model settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub enabled: bool,
    pub base_url: String,
    /// Preferred models in order; the first one installed wins
    pub preferred_models: Vec<String>,
    /// Name fragments that mark an installed model as vision-capable
    pub vision_markers: Vec<String>,
    /// Per-request timeout (seconds)
    pub timeout_secs: u64,
    pub captcha_temperature: f32,
    pub captcha_top_p: f32,
    pub page_temperature: f32,
    pub fallback_temperature: f32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:11434".to_string(),
            preferred_models: vec![
                "llava:13b".to_string(),
                "llava:latest".to_string(),
                "llama3.2-vision".to_string(),
            ],
            vision_markers: vec![
                "llava".to_string(),
                "vision".to_string(),
                "moondream".to_string(),
            ],
            timeout_secs: 120,
            captcha_temperature: 0.1,
            captcha_top_p: 0.9,
            page_temperature: 0.1,
            fallback_temperature: 0.0,
        }
    }
}

/// Portal login credentials. `Debug` never prints the password.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Reads `SLCM_USERNAME` / `SLCM_PASSWORD` from the environment.
    pub fn from_env() -> Result<Self, ScraperError> {
        Self::from_values(
            std::env::var(USERNAME_ENV).ok(),
            std::env::var(PASSWORD_ENV).ok(),
        )
    }

    fn from_values(username: Option<String>, password: Option<String>) -> Result<Self, ScraperError> {
        let username = username
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ScraperError::Config(format!("{} is not set", USERNAME_ENV)))?;
        let password = password
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ScraperError::Config(format!("{} is not set", PASSWORD_ENV)))?;
        Ok(Self { username, password })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible: String = self.username.chars().take(3).collect();
        f.debug_struct("Credentials")
            .field("username", &format!("{}***", visible))
            .field("password", &"***")
            .finish()
    }
}

/// Parses a config file, returning `None` (and logging why) if it is unusable.
fn read_config_file(config_path: &Path) -> Option<ScraperConfig> {
    match fs::read_to_string(config_path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(config) => {
                log::info!("Config loaded from {}", config_path.display());
                Some(config)
            }
            Err(e) => {
                log::warn!("Failed to parse {}: {}. Using defaults.", config_path.display(), e);
                None
            }
        },
        Err(e) => {
            log::warn!("Failed to read {}: {}. Using defaults.", config_path.display(), e);
            None
        }
    }
}

/// Applies environment overrides on top of the file values.
fn apply_env_overrides(config: &mut ScraperConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup("SLCM_WEBDRIVER_URL") {
        config.portal.webdriver_url = url;
    }
    if let Some(host) = lookup("OLLAMA_HOST") {
        config.vision.base_url = if host.starts_with("http") {
            host
        } else {
            format!("http://{}", host)
        };
    }
    if let Some(path) = lookup("TESSERACT_PATH") {
        config.ocr.tesseract_path = Some(path);
    }
}

/// Loads configuration from config.json next to the executable, or defaults.
fn load_config() -> ScraperConfig {
    let config_path = crate::paths::get_config_path();
    log::info!("Looking for config at: {}", config_path.display());

    let mut config = if config_path.exists() {
        read_config_file(&config_path).unwrap_or_default()
    } else {
        log::info!("config.json not found. Using default config.");
        ScraperConfig::default()
    };

    apply_env_overrides(&mut config, |key| {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    });
    config
}

/// Initializes the global configuration. Call once at startup.
pub fn init_config() {
    let _ = CONFIG.set(load_config());
}

/// Returns a reference to the global configuration.
/// Panics if called before init_config().
pub fn get_config() -> &'static ScraperConfig {
    CONFIG
        .get()
        .expect("Config not initialized. Call init_config() first.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "login": { "max_captcha_attempts": 5 }, "captcha": { "normalization": "strict" } }"#,
        )
        .unwrap();

        let config = read_config_file(&path).unwrap();
        assert_eq!(config.login.max_captcha_attempts, 5);
        assert_eq!(config.login.max_login_attempts, 3);
        assert_eq!(config.captcha.normalization, NormalizationPolicy::Strict);
        assert_eq!(config.captcha.length, 3);
        assert_eq!(config.ocr.captcha_profiles.len(), 4);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(read_config_file(&path).is_none());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("OLLAMA_HOST", "127.0.0.1:11434"),
            ("TESSERACT_PATH", "/opt/tesseract/bin/tesseract"),
        ]);
        let mut config = ScraperConfig::default();
        apply_env_overrides(&mut config, |key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.vision.base_url, "http://127.0.0.1:11434");
        assert_eq!(
            config.ocr.tesseract_path.as_deref(),
            Some("/opt/tesseract/bin/tesseract")
        );
        assert_eq!(config.portal.webdriver_url, "http://localhost:9515");
    }

    #[test]
    fn test_credentials_required() {
        let err = Credentials::from_values(None, Some("secret".into())).unwrap_err();
        assert_eq!(err, ScraperError::Config("SLCM_USERNAME is not set".into()));

        let err = Credentials::from_values(Some("220911".into()), Some(String::new())).unwrap_err();
        assert_eq!(err, ScraperError::Config("SLCM_PASSWORD is not set".into()));
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = Credentials::from_values(Some("220911234".into()), Some("hunter2".into())).unwrap();
        let shown = format!("{:?}", creds);
        assert!(shown.contains("220***"));
        assert!(!shown.contains("hunter2"));
        assert!(!shown.contains("220911234"));

        // Password length does not show either
        let longer =
            Credentials::from_values(Some("220911234".into()), Some("correct horse battery".into()))
                .unwrap();
        assert_eq!(format!("{:?}", longer), shown);
    }
}

//! SLCM CGPA Scraper
//!
//! Logs into the SLCM student portal (reading the numeric captcha with OCR and
//! a local vision model), opens the grade sheet and extracts the CGPA.

mod captcha;
mod config;
mod error;
mod extract;
mod logging;
mod login;
mod ocr;
mod paths;
mod portal;
mod results;
mod vision;

use anyhow::Result;
use chrono::Local;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use captcha::{
    CaptchaSolver, ConsensusEngine, GuessNormalizer, OcrRecognizer, Recognizer, VisionRecognizer,
};
use config::{Credentials, ScraperConfig};
use error::ScraperError;
use extract::{
    DirectText, ExtractionCandidate, ExtractionCascade, PageOcr, Probe, TableScan, VisionFallback,
    VisionPrompts,
};
use login::{LoginContext, LoginPortal};
use ocr::{OcrProfile, TesseractEngine};
use portal::{SlcmPortal, WebDriver};
use vision::{OllamaClient, Sampling};

/// Recognizer backends that answered at startup.
struct Backends {
    ocr: Option<Arc<TesseractEngine>>,
    vision: Option<Arc<OllamaClient>>,
}

impl Backends {
    fn detect(config: &ScraperConfig) -> Self {
        let ocr = if config.ocr.enabled {
            match ocr::locate_tesseract(&config.ocr) {
                Ok(paths) => Some(Arc::new(TesseractEngine::new(
                    paths,
                    Duration::from_secs(config.ocr.timeout_secs),
                ))),
                Err(e) => {
                    log::warn!(
                        "{}",
                        ScraperError::CapabilityUnavailable {
                            backend: "ocr",
                            reason: format!("{:#}", e),
                        }
                    );
                    None
                }
            }
        } else {
            log::info!("OCR disabled in config");
            None
        };

        let vision = if config.vision.enabled {
            match OllamaClient::connect(&config.vision) {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    log::warn!("{}", e);
                    None
                }
            }
        } else {
            log::info!("Vision model disabled in config");
            None
        };

        Self { ocr, vision }
    }
}

/// Vision answers enter the pool before OCR answers.
fn build_solver(config: &ScraperConfig, backends: &Backends) -> CaptchaSolver {
    let mut recognizers: Vec<Box<dyn Recognizer>> = Vec::new();

    if let Some(model) = &backends.vision {
        recognizers.push(Box::new(VisionRecognizer::new(
            model.clone(),
            vision::captcha_prompts(config.captcha.length),
            Sampling {
                temperature: config.vision.captcha_temperature,
                top_p: Some(config.vision.captcha_top_p),
            },
            config.captcha.vision_passes,
        )));
    }

    if let Some(engine) = &backends.ocr {
        let profiles = config
            .ocr
            .captcha_profiles
            .iter()
            .enumerate()
            .map(|(i, flags)| OcrProfile::parse(format!("profile_{}", i + 1), flags))
            .collect();
        recognizers.push(Box::new(OcrRecognizer::new(
            engine.clone(),
            profiles,
            config.ocr.contrast_levels.clone(),
        )));
    }

    CaptchaSolver::new(
        recognizers,
        GuessNormalizer::new(config.captcha.length, config.captcha.normalization),
        ConsensusEngine::new(config.captcha.weight_step, config.captcha.agreement_threshold),
    )
}

fn build_cascade(config: &ScraperConfig, backends: &Backends) -> ExtractionCascade {
    let mut probes: Vec<Box<dyn Probe>> = vec![Box::new(DirectText), Box::new(TableScan)];

    if let Some(engine) = &backends.ocr {
        probes.push(Box::new(PageOcr::new(
            engine.clone(),
            OcrProfile::parse("page", &config.ocr.page_profile),
            config.ocr.page_contrast,
        )));
    }

    if let Some(model) = &backends.vision {
        probes.push(Box::new(VisionPrompts::new(
            model.clone(),
            vision::PAGE_PROMPTS.iter().map(|p| p.to_string()).collect(),
            Sampling::temperature(config.vision.page_temperature),
        )));
        probes.push(Box::new(VisionFallback::new(
            model.clone(),
            vision::FALLBACK_PROMPT,
            config.vision.fallback_temperature,
        )));
    }

    ExtractionCascade::new(probes)
}

fn wait_for_enter(prompt: &str) {
    print!("{}", prompt);
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);
}

/// Lets the user log in by hand in the open browser, then checks the result.
fn manual_login(portal: &SlcmPortal, reason: &ScraperError) -> Result<(), ScraperError> {
    log::warn!("Automated login failed: {}", reason);
    println!("=== MANUAL LOGIN REQUIRED ===");
    println!("Please log in manually in the browser window.");
    wait_for_enter("Press Enter once the student home page is showing...");

    match portal.is_logged_in() {
        Ok(true) => {
            log::info!("Manual login verified");
            Ok(())
        }
        Ok(false) => Err(reason.clone()),
        Err(e) => Err(ScraperError::portal(e)),
    }
}

fn sign_in(
    portal: &mut SlcmPortal,
    solver: &CaptchaSolver,
    credentials: &Credentials,
    config: &ScraperConfig,
) -> Result<(), ScraperError> {
    if !solver.has_recognizers() {
        let reason = ScraperError::CapabilityUnavailable {
            backend: "captcha",
            reason: "neither Tesseract nor a vision model is available".to_string(),
        };
        portal.open_login_page().map_err(ScraperError::portal)?;
        return manual_login(portal, &reason);
    }

    let result = LoginContext::new(&mut *portal, solver, credentials, config.login.clone()).run();
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.needs_manual_login() => manual_login(portal, &e),
        Err(e) => Err(e),
    }
}

fn run(
    portal: &mut SlcmPortal,
    solver: &CaptchaSolver,
    cascade: &ExtractionCascade,
    credentials: &Credentials,
    config: &ScraperConfig,
) -> Result<ExtractionCandidate, ScraperError> {
    sign_in(portal, solver, credentials, config)?;
    portal.open_grade_sheet().map_err(ScraperError::portal)?;

    let candidate = cascade.run(&*portal)?;

    let csv_path = paths::get_results_csv();
    let saved = results::init_csv(&csv_path)
        .and_then(|()| results::append_result(&csv_path, Local::now(), &candidate));
    match saved {
        Ok(()) => log::info!("Result appended to {}", csv_path.display()),
        Err(e) => log::warn!("Could not write {}: {:#}", csv_path.display(), e),
    }

    Ok(candidate)
}

/// The browser stays up for the user when asked to, or when a failure left
/// something they can still check by hand.
fn should_pause(outcome: &Result<ExtractionCandidate, ScraperError>, keep_browser_open: bool) -> bool {
    keep_browser_open
        || matches!(
            outcome,
            Err(ScraperError::ExtractionExhausted { .. } | ScraperError::Portal(_))
        )
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let msg = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        let location = panic_info
            .location()
            .map(|loc| format!(" at {}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_default();

        eprintln!("[PANIC]{} {}", location, msg);
        log::error!("[PANIC]{} {}", location, msg);
        log::logger().flush();
    }));
}

fn main() -> Result<()> {
    install_panic_hook();

    paths::ensure_directories()?;
    logging::init()?;
    config::init_config();
    let config = config::get_config();

    let credentials = Credentials::from_env()?;
    log::info!("Starting SLCM CGPA scraper for {:?}", credentials);

    let backends = Backends::detect(config);
    let solver = build_solver(config, &backends);
    let cascade = build_cascade(config, &backends);
    log::info!("{} extraction probe(s) available", cascade.len());

    let driver = WebDriver::start(&config.portal)?;
    let mut portal = SlcmPortal::new(driver, config.portal.clone());

    let outcome = run(&mut portal, &solver, &cascade, &credentials, config);

    if should_pause(&outcome, config.keep_browser_open) {
        if let Err(e) = &outcome {
            println!("=== MANUAL INTERVENTION REQUIRED ===");
            println!("{}", e);
            println!("The browser is still open; check the grade sheet by hand.");
        }
        wait_for_enter("Press Enter to close the browser...");
    }
    if let Err(e) = portal.quit() {
        log::warn!("{:#}", e);
    }

    match outcome {
        Ok(candidate) => {
            println!("CGPA: {:.2}", candidate.value);
            Ok(())
        }
        Err(e) => {
            log::error!("{}", e);
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::ProbeKind;

    #[test]
    fn test_pause_after_failed_extraction() {
        let outcome = Err(ScraperError::ExtractionExhausted { probes: 5 });
        assert!(should_pause(&outcome, false));

        let outcome = Err(ScraperError::Portal("grade sheet did not open".into()));
        assert!(should_pause(&outcome, false));
    }

    #[test]
    fn test_pause_follows_config_otherwise() {
        let found = ExtractionCandidate::new(8.5, ProbeKind::DirectText, "CGPA 8.50");
        let outcome = found.ok_or(ScraperError::ExtractionExhausted { probes: 1 });
        assert!(!should_pause(&outcome, false));
        assert!(should_pause(&outcome, true));

        let outcome = Err(ScraperError::Config("SLCM_USERNAME not set".into()));
        assert!(!should_pause(&outcome, false));
    }
}

//! SLCM login page and grade sheet, driven through WebDriver.

use anyhow::{anyhow, bail, Context, Result};
use chrono::Local;
use std::path::PathBuf;
use std::time::Duration;

use super::webdriver::{By, Element, WebDriver};
use crate::config::{Credentials, PortalConfig};
use crate::extract::{DomNode, DomQuery, PageTable, ResultsPage, TableCell};
use crate::login::{LoginPortal, SubmitOutcome};

const USERNAME_FIELD: &str = "txtUserid";
const PASSWORD_FIELD: &str = "txtpassword";
const CAPTCHA_IMAGE: &str = "imgCaptcha";
const CAPTCHA_FIELD: &str = "txtCaptcha";
const LOGIN_BUTTON: &str = "btnLogin";
const ERROR_LABEL: &str = "labelerror";
const REFRESH_CAPTCHA: &str = "txtRefreshCaptcha";
const ACADEMICS_MENU: &str = "rtpchkMenu_lnkbtn2_1";
const GRADE_SHEET_LINK: &str = "Grade Sheet/Mark Sheet";

/// Maps the login error label to a submit outcome.
///
/// Only a message mentioning the captcha is retryable. An empty label after a
/// failed submit is treated the same way, since nothing says the credentials
/// were wrong.
pub fn classify_login_error(label_text: &str) -> SubmitOutcome {
    let text = label_text.trim();
    if text.is_empty() {
        SubmitOutcome::CaptchaError("login did not complete and no error was shown".to_string())
    } else if text.to_lowercase().contains("captcha") {
        SubmitOutcome::CaptchaError(text.to_string())
    } else {
        SubmitOutcome::OtherError(text.to_string())
    }
}

/// Returns true if the URL contains any of the (lowercase) markers.
pub fn url_matches(url: &str, markers: &[String]) -> bool {
    let lower = url.to_lowercase();
    markers
        .iter()
        .any(|m| !m.is_empty() && lower.contains(&m.to_lowercase()))
}

/// Last path segment of a URL, lowercased: `.../GradeSheet.aspx` → `gradesheet.aspx`.
fn page_marker(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    path.rsplit('/').next().unwrap_or_default().to_lowercase()
}

fn dom_xpath(query: DomQuery) -> &'static str {
    match query {
        DomQuery::LabelText => "//*[contains(text(), 'CGPA') or contains(text(), 'cgpa')]",
        DomQuery::CellAfterLabel => "//td[contains(text(), 'CGPA')]/following-sibling::td",
        DomQuery::LastRowCells => "//tr[last()]//td",
        DomQuery::DecimalSpans => "//span[contains(text(), '.') and string-length(text()) < 10]",
    }
}

/// Saves an image to the captures directory. Failures are only logged.
pub fn save_capture(name: &str, png: &[u8]) -> Option<PathBuf> {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let path = crate::paths::get_captures_dir().join(format!("{}_{}.png", name, timestamp));
    match std::fs::write(&path, png) {
        Ok(()) => {
            log::debug!("Saved {}", path.display());
            Some(path)
        }
        Err(e) => {
            log::warn!("Could not save {}: {}", path.display(), e);
            None
        }
    }
}

/// Routine captures (every captcha, every grade sheet) pile up fast, so they
/// are only written when debug logging is on.
fn keeps_routine_captures(level: log::LevelFilter) -> bool {
    level >= log::LevelFilter::Debug
}

fn save_routine_capture(name: &str, png: &[u8]) {
    if keeps_routine_captures(log::max_level()) {
        save_capture(name, png);
    }
}

/// The SLCM portal in one browser session.
pub struct SlcmPortal {
    driver: WebDriver,
    config: PortalConfig,
}

impl SlcmPortal {
    pub fn new(driver: WebDriver, config: PortalConfig) -> Self {
        Self { driver, config }
    }

    fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.config.element_timeout_ms)
    }

    fn settle(&self) {
        std::thread::sleep(Duration::from_millis(self.config.page_settle_ms));
    }

    fn fill_field(&self, id: &str, text: &str) -> Result<()> {
        let field = self
            .driver
            .wait_for(&By::id(id), self.element_timeout())
            .with_context(|| format!("Field {} not found", id))?;
        self.driver.clear(&field)?;
        self.driver.send_keys(&field, text)
    }

    /// Screenshot of the current page into the captures directory.
    pub fn save_debug_screenshot(&self, name: &str) {
        match self.driver.screenshot() {
            Ok(png) => {
                save_capture(name, &png);
            }
            Err(e) => log::warn!("Debug screenshot failed: {:#}", e),
        }
    }

    /// True once the browser shows the student home page.
    pub fn is_logged_in(&self) -> Result<bool> {
        let url = self.driver.current_url()?;
        Ok(url_matches(&url, std::slice::from_ref(&self.config.home_url_marker)))
    }

    /// Opens the grade sheet from the student home page.
    ///
    /// The portal opens it in a new tab; if no tab appears but the current
    /// page already is the grade sheet, that page is used.
    pub fn open_grade_sheet(&mut self) -> Result<()> {
        let result = self.navigate_to_grade_sheet();
        if result.is_err() {
            self.save_debug_screenshot("navigation_error");
        }
        result
    }

    fn navigate_to_grade_sheet(&mut self) -> Result<()> {
        log::info!("Navigating to Academics Detail...");
        let handles_before = self.driver.window_handles()?;

        let menu = self
            .driver
            .wait_for(&By::id(ACADEMICS_MENU), self.element_timeout())
            .context("Academics Detail menu not found")?;
        self.driver.click(&menu)?;
        self.settle();

        log::info!("Clicking {}...", GRADE_SHEET_LINK);
        let link = self
            .driver
            .wait_for(&By::PartialLinkText(GRADE_SHEET_LINK.to_string()), self.element_timeout())
            .context("Grade sheet link not found")?;
        self.driver.click(&link)?;

        let marker = page_marker(&self.config.grade_sheet_url);
        let before = handles_before.len();
        let opened = self.driver.wait_until(
            Duration::from_millis(self.config.new_tab_timeout_ms),
            |driver| Ok(driver.window_handles()?.len() > before),
        );

        if !opened {
            let url = self.driver.current_url()?;
            if url.to_lowercase().contains(&marker) {
                log::info!("No new tab, but already on the grade sheet");
                return Ok(());
            }
            bail!("Grade sheet did not open in a new tab (current page: {})", url);
        }

        let new_handle = self
            .driver
            .window_handles()?
            .into_iter()
            .find(|h| !handles_before.contains(h))
            .ok_or_else(|| anyhow!("New tab disappeared before it could be selected"))?;
        self.driver.switch_to_window(&new_handle)?;
        self.driver.wait_for_page_load(self.element_timeout());
        self.settle();

        let url = self.driver.current_url()?;
        if url.to_lowercase().contains(&marker) {
            log::info!("Grade sheet opened: {}", url);
        } else {
            log::warn!("Expected {} but the new tab shows {}; continuing", marker, url);
        }
        Ok(())
    }

    fn dom_node(&self, element: &Element) -> Result<DomNode> {
        Ok(DomNode {
            text: self.driver.text(element)?,
            markup: self.driver.property(element, "outerHTML")?,
        })
    }

    fn read_table(&self, table: &Element) -> Result<PageTable> {
        let text = self.driver.text(table)?;
        let mut cells = Vec::new();

        for cell in self.driver.find_all_in(table, &By::xpath(".//td | .//th"))? {
            let row_text = self
                .driver
                .find_in(&cell, &By::xpath("./ancestor::tr[1]"))
                .and_then(|row| self.driver.text(&row))
                .unwrap_or_default();
            cells.push(TableCell {
                text: self.driver.text(&cell)?,
                row_text,
            });
        }
        Ok(PageTable { text, cells })
    }

    pub fn quit(self) -> Result<()> {
        self.driver.quit()
    }
}

impl LoginPortal for SlcmPortal {
    fn open_login_page(&mut self) -> Result<()> {
        log::info!("Opening login page {}", self.config.login_url);
        self.driver.goto(&self.config.login_url)?;
        if !self.driver.wait_for_page_load(self.element_timeout()) {
            log::warn!("Login page did not finish loading in time");
        }
        self.driver
            .wait_for(&By::id(USERNAME_FIELD), self.element_timeout())
            .context("Login form not found")?;
        Ok(())
    }

    fn fill_credentials(&mut self, credentials: &Credentials) -> Result<()> {
        self.fill_field(USERNAME_FIELD, &credentials.username)?;
        self.fill_field(PASSWORD_FIELD, &credentials.password)?;
        log::info!("Credentials entered");
        Ok(())
    }

    fn capture_captcha(&mut self) -> Result<Vec<u8>> {
        let image = self
            .driver
            .wait_for(&By::id(CAPTCHA_IMAGE), self.element_timeout())
            .context("Captcha image not found")?;
        let png = self.driver.element_screenshot(&image)?;
        save_routine_capture("captcha", &png);
        Ok(png)
    }

    fn submit(&mut self, guess: &str) -> Result<SubmitOutcome> {
        self.fill_field(CAPTCHA_FIELD, guess)?;
        let button = self
            .driver
            .wait_for(&By::id(LOGIN_BUTTON), self.element_timeout())
            .context("Login button not found")?;
        self.driver.click(&button)?;
        log::info!("Submitted captcha {}, waiting for response...", guess);
        std::thread::sleep(Duration::from_millis(self.config.submit_wait_ms));

        let url = self.driver.current_url()?;
        if url_matches(&url, &self.config.success_url_markers) {
            return Ok(SubmitOutcome::Success);
        }

        let label = match self.driver.find_all(&By::id(ERROR_LABEL))?.first() {
            Some(element) => self.driver.text(element)?,
            None => String::new(),
        };
        Ok(classify_login_error(&label))
    }

    fn refresh_captcha(&mut self) -> Result<()> {
        let button = self.driver.find(&By::id(REFRESH_CAPTCHA))?;
        self.driver.click(&button)
    }
}

impl ResultsPage for SlcmPortal {
    fn probe_dom(&self, query: DomQuery) -> Result<Vec<DomNode>> {
        let elements = self.driver.find_all(&By::xpath(dom_xpath(query)))?;
        Ok(elements
            .iter()
            .filter_map(|element| match self.dom_node(element) {
                Ok(node) => Some(node),
                Err(e) => {
                    log::debug!("Skipping stale element: {:#}", e);
                    None
                }
            })
            .collect())
    }

    fn tables(&self) -> Result<Vec<PageTable>> {
        let tables = self.driver.find_all(&By::TagName("table".to_string()))?;
        Ok(tables
            .iter()
            .filter_map(|table| match self.read_table(table) {
                Ok(table) => Some(table),
                Err(e) => {
                    log::debug!("Skipping unreadable table: {:#}", e);
                    None
                }
            })
            .collect())
    }

    fn screenshot(&self) -> Result<Vec<u8>> {
        let png = self.driver.screenshot()?;
        save_routine_capture("grade_sheet", &png);
        Ok(png)
    }
}

//! Minimal blocking W3C WebDriver client.
//!
//! Talks to a running chromedriver over HTTP. Only the commands the portal
//! adapter needs are implemented.

use anyhow::{anyhow, bail, Context, Result};
use base64::Engine;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

use crate::config::PortalConfig;

/// W3C element reference key.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Element locator.
#[derive(Debug, Clone, PartialEq)]
pub enum By {
    Id(String),
    XPath(String),
    TagName(String),
    PartialLinkText(String),
}

impl By {
    pub fn id(id: &str) -> Self {
        By::Id(id.to_string())
    }

    pub fn xpath(xpath: &str) -> Self {
        By::XPath(xpath.to_string())
    }

    /// The `{using, value}` body for find commands. W3C has no id strategy,
    /// so ids become attribute selectors.
    fn to_json(&self) -> Value {
        let (using, value) = match self {
            By::Id(id) => ("css selector", format!("[id=\"{}\"]", id.replace('"', "\\\""))),
            By::XPath(x) => ("xpath", x.clone()),
            By::TagName(t) => ("tag name", t.clone()),
            By::PartialLinkText(t) => ("partial link text", t.clone()),
        };
        json!({ "using": using, "value": value })
    }
}

/// Handle to an element in the current page.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    id: String,
}

/// An open browser session.
pub struct WebDriver {
    http: reqwest::blocking::Client,
    session_url: String,
}

impl WebDriver {
    /// Starts a new Chrome session on the WebDriver server from `config`.
    pub fn start(config: &PortalConfig) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        let base = config.webdriver_url.trim_end_matches('/').to_string();

        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": config.browser_args,
                        "excludeSwitches": ["enable-automation"],
                    }
                }
            }
        });

        let response = http
            .post(format!("{}/session", base))
            .json(&capabilities)
            .send()
            .with_context(|| format!("Cannot reach WebDriver at {}", base))?;
        let value = read_response(response)?;
        let session_id = value["sessionId"]
            .as_str()
            .ok_or_else(|| anyhow!("New session response has no sessionId"))?;

        log::info!("Browser session {} started", session_id);
        Ok(Self {
            http,
            session_url: format!("{}/session/{}", base, session_id),
        })
    }

    fn get(&self, path: &str) -> Result<Value> {
        let response = self
            .http
            .get(format!("{}{}", self.session_url, path))
            .send()
            .with_context(|| format!("GET {} failed", path))?;
        read_response(response)
    }

    fn post(&self, path: &str, body: Value) -> Result<Value> {
        let response = self
            .http
            .post(format!("{}{}", self.session_url, path))
            .json(&body)
            .send()
            .with_context(|| format!("POST {} failed", path))?;
        read_response(response)
    }

    pub fn goto(&self, url: &str) -> Result<()> {
        self.post("/url", json!({ "url": url }))?;
        Ok(())
    }

    pub fn current_url(&self) -> Result<String> {
        as_string(self.get("/url")?)
    }

    pub fn find(&self, by: &By) -> Result<Element> {
        element_from(&self.post("/element", by.to_json())?)
    }

    pub fn find_all(&self, by: &By) -> Result<Vec<Element>> {
        elements_from(&self.post("/elements", by.to_json())?)
    }

    pub fn find_in(&self, parent: &Element, by: &By) -> Result<Element> {
        element_from(&self.post(&format!("/element/{}/element", parent.id), by.to_json())?)
    }

    pub fn find_all_in(&self, parent: &Element, by: &By) -> Result<Vec<Element>> {
        elements_from(&self.post(&format!("/element/{}/elements", parent.id), by.to_json())?)
    }

    pub fn text(&self, element: &Element) -> Result<String> {
        as_string(self.get(&format!("/element/{}/text", element.id))?)
    }

    /// A DOM property such as `outerHTML`. Missing properties read as "".
    pub fn property(&self, element: &Element, name: &str) -> Result<String> {
        let value = self.get(&format!("/element/{}/property/{}", element.id, name))?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub fn clear(&self, element: &Element) -> Result<()> {
        self.post(&format!("/element/{}/clear", element.id), json!({}))?;
        Ok(())
    }

    pub fn send_keys(&self, element: &Element, text: &str) -> Result<()> {
        self.post(&format!("/element/{}/value", element.id), json!({ "text": text }))?;
        Ok(())
    }

    pub fn click(&self, element: &Element) -> Result<()> {
        self.post(&format!("/element/{}/click", element.id), json!({}))?;
        Ok(())
    }

    /// PNG bytes of one element.
    pub fn element_screenshot(&self, element: &Element) -> Result<Vec<u8>> {
        decode_png(self.get(&format!("/element/{}/screenshot", element.id))?)
    }

    /// PNG bytes of the visible viewport.
    pub fn screenshot(&self) -> Result<Vec<u8>> {
        decode_png(self.get("/screenshot")?)
    }

    pub fn window_handles(&self) -> Result<Vec<String>> {
        let value = self.get("/window/handles")?;
        let handles = value
            .as_array()
            .ok_or_else(|| anyhow!("Window handles are not a list: {}", value))?;
        Ok(handles
            .iter()
            .filter_map(|h| h.as_str().map(str::to_string))
            .collect())
    }

    pub fn switch_to_window(&self, handle: &str) -> Result<()> {
        self.post("/window", json!({ "handle": handle }))?;
        Ok(())
    }

    /// Runs a synchronous script and returns its result.
    pub fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        self.post("/execute/sync", json!({ "script": script, "args": args }))
    }

    /// Polls `condition` until it returns true or `timeout` elapses.
    /// Errors from the condition count as "not yet".
    pub fn wait_until(&self, timeout: Duration, mut condition: impl FnMut(&Self) -> Result<bool>) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(true) = condition(self) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Waits for an element to be present.
    pub fn wait_for(&self, by: &By, timeout: Duration) -> Result<Element> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.find(by) {
                Ok(element) => return Ok(element),
                Err(e) if Instant::now() >= deadline => {
                    return Err(e.context(format!("Timed out waiting for {:?}", by)));
                }
                Err(_) => std::thread::sleep(POLL_INTERVAL),
            }
        }
    }

    /// Waits until `document.readyState` is "complete".
    pub fn wait_for_page_load(&self, timeout: Duration) -> bool {
        self.wait_until(timeout, |driver| {
            let state = driver.execute("return document.readyState", Vec::new())?;
            Ok(state.as_str() == Some("complete"))
        })
    }

    /// Ends the session and closes the browser.
    pub fn quit(self) -> Result<()> {
        self.http
            .delete(&self.session_url)
            .send()
            .context("Failed to end browser session")?;
        log::info!("Browser session closed");
        Ok(())
    }
}

/// Unwraps the `{"value": ...}` envelope, turning W3C error payloads into errors.
fn read_response(response: reqwest::blocking::Response) -> Result<Value> {
    let status = response.status();
    let body: Value = response.json().context("WebDriver response is not JSON")?;
    unwrap_value(status.is_success(), body)
}

fn unwrap_value(success: bool, mut body: Value) -> Result<Value> {
    let value = body
        .get_mut("value")
        .map(Value::take)
        .ok_or_else(|| anyhow!("WebDriver response has no value: {}", body))?;

    if !success || value.get("error").is_some_and(|e| e.is_string()) {
        let error = value["error"].as_str().unwrap_or("unknown error");
        let message = value["message"].as_str().unwrap_or_default();
        bail!("WebDriver error: {}: {}", error, message.lines().next().unwrap_or_default());
    }
    Ok(value)
}

fn as_string(value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(anyhow!("Expected a string, got {}", other)),
    }
}

fn element_from(value: &Value) -> Result<Element> {
    value[ELEMENT_KEY]
        .as_str()
        .map(|id| Element { id: id.to_string() })
        .ok_or_else(|| anyhow!("Not an element reference: {}", value))
}

fn elements_from(value: &Value) -> Result<Vec<Element>> {
    value
        .as_array()
        .ok_or_else(|| anyhow!("Expected a list of elements: {}", value))?
        .iter()
        .map(element_from)
        .collect()
}

fn decode_png(value: Value) -> Result<Vec<u8>> {
    let encoded = as_string(value)?;
    Ok(base64::engine::general_purpose::STANDARD.decode(encoded.trim())?)
}

//! Chrome-backed page using the Chrome DevTools Protocol

use crate::page::{PageLauncher, PortalPage};
use async_trait::async_trait;
use autopilot_core::config::BrowserConfig;
use autopilot_core::{AutopilotError, Result};
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Sets an input's value the way a user would, so the portal's listeners fire
const SET_VALUE_JS: &str = r#"function(value) {
    this.focus();
    this.value = value;
    this.dispatchEvent(new Event('input', { bubbles: true }));
    this.dispatchEvent(new Event('change', { bubbles: true }));
    this.blur();
}"#;

const SELECT_LABEL_JS: &str = r#"function(label) {
    const wanted = label.trim();
    const option = Array.from(this.options || []).find(
        o => o.label.trim() === wanted || o.text.trim() === wanted
    );
    if (!option) { return false; }
    this.value = option.value;
    this.dispatchEvent(new Event('change', { bubbles: true }));
    return true;
}"#;

/// Launches a local Chrome/Chromium
#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher;

#[async_trait]
impl PageLauncher for ChromeLauncher {
    async fn launch(&self, config: &BrowserConfig) -> Result<Box<dyn PortalPage>> {
        Ok(Box::new(ChromePage::launch(config).await?))
    }
}

/// A single Chrome tab, together with the browser process that owns it
pub struct ChromePage {
    /// Dropping this ends the Chrome process
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromePage {
    /// Start Chrome with the configured window and open the tab the session
    /// drives. The idle timeout has to outlast a manual CAPTCHA and OTP login.
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let extra_args: Vec<String> = config
            .user_agent
            .iter()
            .map(|ua| format!("--user-agent={}", ua))
            .collect();
        let options = LaunchOptions::default_builder()
            .headless(config.headless)
            .window_size(Some((config.window_width, config.window_height)))
            .idle_browser_timeout(Duration::from_secs(config.idle_timeout_secs))
            .args(extra_args.iter().map(OsStr::new).collect())
            .build()
            .map_err(|e| AutopilotError::Browser(format!("Invalid Chrome options: {}", e)))?;

        debug!(
            "Starting Chrome: headless={} window={}x{} idle_timeout={}s",
            config.headless, config.window_width, config.window_height, config.idle_timeout_secs
        );
        let browser = Browser::new(options)
            .map_err(|e| AutopilotError::Browser(format!("Chrome did not start: {}", e)))?;
        let tab = browser
            .new_tab()
            .map_err(|e| AutopilotError::Browser(format!("Chrome started without a usable tab: {}", e)))?;
        info!("Chrome ready for the portal session");

        Ok(Self { _browser: browser, tab })
    }

    fn evaluate_string(&self, script: &str) -> Result<String> {
        let result = self
            .tab
            .evaluate(script, false)
            .map_err(|e| AutopilotError::Browser(format!("JavaScript evaluation failed: {}", e)))?;

        Ok(result
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }
}

/// XPath matching clickable elements by visible text
fn text_xpath(text: &str) -> String {
    let literal = xpath_literal(text);
    format!(
        "//*[self::button or self::a or self::span or self::label or self::li]\
         [contains(normalize-space(.), {lit})] \
         | //input[@type='button' or @type='submit'][contains(@value, {lit})]",
        lit = literal
    )
}

/// Quote a string for use inside an XPath expression
fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        format!("'{}'", text)
    } else if !text.contains('"') {
        format!("\"{}\"", text)
    } else {
        let parts: Vec<String> = text.split('\'').map(|p| format!("'{}'", p)).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

#[async_trait]
impl PortalPage for ChromePage {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        debug!("Navigating to {}", url);

        self.tab.set_default_timeout(timeout);
        self.tab
            .navigate_to(url)
            .map_err(|e| AutopilotError::Navigation(format!("Failed to navigate to {}: {}", url, e)))?;

        self.tab
            .wait_until_navigated()
            .map_err(|e| AutopilotError::Navigation(format!("Navigation timeout for {}: {}", url, e)))?;

        info!("Navigated to {}", url);
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.tab.get_url())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
        self.tab
            .wait_for_element_with_custom_timeout(selector, timeout)
            .map_err(|_e| AutopilotError::ElementNotFound {
                selector: selector.to_string(),
            })?;
        Ok(())
    }

    async fn click(&self, selector: &str, timeout: Duration) -> Result<()> {
        let element = self
            .tab
            .wait_for_element_with_custom_timeout(selector, timeout)
            .map_err(|_e| AutopilotError::ElementNotFound {
                selector: selector.to_string(),
            })?;
        element
            .click()
            .map_err(|e| AutopilotError::Browser(format!("Click on {} failed: {}", selector, e)))?;
        Ok(())
    }

    async fn click_text(&self, text: &str, timeout: Duration) -> Result<()> {
        let xpath = text_xpath(text);
        let element = self
            .tab
            .wait_for_xpath_with_custom_timeout(&xpath, timeout)
            .map_err(|_e| AutopilotError::ElementNotFound {
                selector: format!("text={}", text),
            })?;
        element
            .click()
            .map_err(|e| AutopilotError::Browser(format!("Click on text '{}' failed: {}", text, e)))?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> Result<()> {
        let element = self
            .tab
            .wait_for_element_with_custom_timeout(selector, timeout)
            .map_err(|_e| AutopilotError::ElementNotFound {
                selector: selector.to_string(),
            })?;
        element
            .call_js_fn(SET_VALUE_JS, vec![serde_json::json!(value)], false)
            .map_err(|e| AutopilotError::Browser(format!("Fill of {} failed: {}", selector, e)))?;
        Ok(())
    }

    async fn select_label(&self, selector: &str, label: &str, timeout: Duration) -> Result<()> {
        let element = self
            .tab
            .wait_for_element_with_custom_timeout(selector, timeout)
            .map_err(|_e| AutopilotError::ElementNotFound {
                selector: selector.to_string(),
            })?;
        let selected = element
            .call_js_fn(SELECT_LABEL_JS, vec![serde_json::json!(label)], false)
            .map_err(|e| AutopilotError::Browser(format!("Select on {} failed: {}", selector, e)))?
            .value
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        if selected {
            Ok(())
        } else {
            Err(AutopilotError::ElementNotFound {
                selector: format!("{} option '{}'", selector, label),
            })
        }
    }

    async fn wait_for_idle(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.evaluate_string("document.readyState")?;
            if state == "complete" {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AutopilotError::Navigation(format!(
                    "Page still '{}' after {:?}",
                    state, timeout
                )));
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    async fn table_rows(&self, row_selector: &str) -> Result<Vec<Vec<String>>> {
        let script = format!(
            "JSON.stringify(Array.from(document.querySelectorAll({})).map(\
             row => Array.from(row.querySelectorAll('td')).map(cell => cell.innerText.trim())))",
            serde_json::to_string(row_selector)?
        );
        let raw = self.evaluate_string(&script)?;
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    async fn screenshot_png(&self) -> Result<Vec<u8>> {
        self.tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(|e| AutopilotError::ScreenshotFailed(format!("CDP capture failed: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        info!("Closing browser tab");
        self.tab
            .close(true)
            .map_err(|e| AutopilotError::Browser(format!("Failed to close tab: {}", e)))?;
        Ok(())
    }
}

impl Drop for ChromePage {
    fn drop(&mut self) {
        debug!("ChromePage dropped, browser process will be cleaned up");
    }
}

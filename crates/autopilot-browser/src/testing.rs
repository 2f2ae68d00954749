//! In-memory page double
//!
//! `ScriptedPage` records every call and answers from a small script:
//! selectors and labels can be made to fail, addresses made unreachable,
//! tables pre-filled. Clones share the same script, so a test can keep a
//! handle while the session owns the boxed page.

use crate::page::{PageLauncher, PortalPage};
use async_trait::async_trait;
use autopilot_core::config::BrowserConfig;
use autopilot_core::{AutopilotError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// A recorded page interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCall {
    Navigate(String),
    Click(String),
    ClickText(String),
    Fill(String, String),
    Select(String, String),
    WaitFor(String),
    Idle,
    Table(String),
    Screenshot,
    Close,
}

#[derive(Debug, Default)]
struct Script {
    url: String,
    calls: Vec<PageCall>,
    failing_selectors: HashSet<String>,
    failing_texts: HashSet<String>,
    unreachable: HashSet<String>,
    tables: HashMap<String, Vec<Vec<String>>>,
    /// Navigating to the key lands on the value
    redirects: HashMap<String, String>,
    crashed: bool,
    /// `wait_for_idle` never sees the document finish loading
    stalled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedPage {
    script: Arc<Mutex<Script>>,
}

impl ScriptedPage {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn fail_selector(&self, selector: &str) {
        self.script().failing_selectors.insert(selector.to_string());
    }

    pub fn restore_selector(&self, selector: &str) {
        self.script().failing_selectors.remove(selector);
    }

    pub fn fail_text(&self, text: &str) {
        self.script().failing_texts.insert(text.to_string());
    }

    pub fn make_unreachable(&self, url: &str) {
        self.script().unreachable.insert(url.to_string());
    }

    pub fn redirect(&self, from: &str, to: &str) {
        self.script().redirects.insert(from.to_string(), to.to_string());
    }

    pub fn set_table(&self, row_selector: &str, rows: Vec<Vec<&str>>) {
        let rows = rows
            .into_iter()
            .map(|r| r.into_iter().map(String::from).collect())
            .collect();
        self.script().tables.insert(row_selector.to_string(), rows);
    }

    pub fn set_url(&self, url: &str) {
        self.script().url = url.to_string();
    }

    /// Every later call fails as if the browser process died
    pub fn crash(&self) {
        self.script().crashed = true;
    }

    pub fn stall_loading(&self) {
        self.script().stalled = true;
    }

    /// Answer calls again, as a relaunched browser would
    pub fn recover(&self) {
        self.script().crashed = false;
    }

    pub fn calls(&self) -> Vec<PageCall> {
        self.script().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.script().calls.clear();
    }

    /// Last value filled into `selector`
    pub fn filled(&self, selector: &str) -> Option<String> {
        self.script().calls.iter().rev().find_map(|c| match c {
            PageCall::Fill(s, v) if s == selector => Some(v.clone()),
            _ => None,
        })
    }

    pub fn count(&self, call: &PageCall) -> usize {
        self.script().calls.iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: PageCall) -> Result<()> {
        let mut script = self.script();
        script.calls.push(call);
        if script.crashed {
            return Err(AutopilotError::Session("browser process lost".to_string()));
        }
        Ok(())
    }

    fn check_selector(&self, selector: &str) -> Result<()> {
        if self.script().failing_selectors.contains(selector) {
            return Err(AutopilotError::ElementNotFound {
                selector: selector.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PortalPage for ScriptedPage {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<()> {
        self.record(PageCall::Navigate(url.to_string()))?;
        let mut script = self.script();
        if script.unreachable.contains(url) {
            return Err(AutopilotError::Navigation(format!("net::ERR_CONNECTION_RESET at {}", url)));
        }
        let landed = script.redirects.get(url).cloned().unwrap_or_else(|| url.to_string());
        script.url = landed;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let script = self.script();
        if script.crashed {
            return Err(AutopilotError::Session("browser process lost".to_string()));
        }
        Ok(script.url.clone())
    }

    async fn wait_for_selector(&self, selector: &str, _timeout: Duration) -> Result<()> {
        self.record(PageCall::WaitFor(selector.to_string()))?;
        self.check_selector(selector)
    }

    async fn click(&self, selector: &str, _timeout: Duration) -> Result<()> {
        self.record(PageCall::Click(selector.to_string()))?;
        self.check_selector(selector)
    }

    async fn click_text(&self, text: &str, _timeout: Duration) -> Result<()> {
        self.record(PageCall::ClickText(text.to_string()))?;
        if self.script().failing_texts.contains(text) {
            return Err(AutopilotError::ElementNotFound {
                selector: format!("text={}", text),
            });
        }
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str, _timeout: Duration) -> Result<()> {
        self.record(PageCall::Fill(selector.to_string(), value.to_string()))?;
        self.check_selector(selector)
    }

    async fn select_label(&self, selector: &str, label: &str, _timeout: Duration) -> Result<()> {
        self.record(PageCall::Select(selector.to_string(), label.to_string()))?;
        self.check_selector(selector)
    }

    async fn wait_for_idle(&self, _timeout: Duration) -> Result<()> {
        self.record(PageCall::Idle)?;
        if self.script().stalled {
            return Err(AutopilotError::Navigation("document still loading".to_string()));
        }
        Ok(())
    }

    async fn table_rows(&self, row_selector: &str) -> Result<Vec<Vec<String>>> {
        self.record(PageCall::Table(row_selector.to_string()))?;
        Ok(self.script().tables.get(row_selector).cloned().unwrap_or_default())
    }

    async fn screenshot_png(&self) -> Result<Vec<u8>> {
        self.record(PageCall::Screenshot)?;
        Ok(b"\x89PNG\r\n\x1a\n".to_vec())
    }

    async fn close(&self) -> Result<()> {
        self.script().calls.push(PageCall::Close);
        Ok(())
    }
}

/// Hands out clones of one `ScriptedPage`
#[derive(Debug, Clone, Default)]
pub struct ScriptedLauncher {
    page: ScriptedPage,
    fail: bool,
}

impl ScriptedLauncher {
    pub fn new(page: ScriptedPage) -> Self {
        Self { page, fail: false }
    }

    /// A launcher whose browser never starts
    pub fn failing() -> Self {
        Self {
            page: ScriptedPage::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl PageLauncher for ScriptedLauncher {
    async fn launch(&self, _config: &BrowserConfig) -> Result<Box<dyn PortalPage>> {
        if self.fail {
            return Err(AutopilotError::Browser("Failed to launch browser: no chrome binary".to_string()));
        }
        Ok(Box::new(self.page.clone()))
    }
}

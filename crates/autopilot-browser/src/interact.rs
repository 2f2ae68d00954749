//! Interaction primitives
//!
//! Every primitive is bounded by a timeout and never fails past its own
//! boundary: errors from the page become a `warn!` line and a falsy result,
//! and the caller decides whether the step was essential.
//!
//! A miss is not always the page's fault. After each failed call the
//! interactor asks the page for its address; if that fails too the browser
//! is gone, the shared flag is raised and every later primitive returns
//! straight away. Callers check [`Interactor::session_lost`].
//!
//! Targeting by visible text is the fallback for pages whose structural
//! selectors drift. Callers express the order they want with a list of
//! [`Strategy`] values and run it through [`Interactor::attempt`].

use crate::page::PortalPage;
use crate::screenshot::ScreenshotStore;
use autopilot_core::config::{ClickTarget, TimeoutConfig};
use autopilot_core::fail_open::fail_open;
use autopilot_core::AutopilotError;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// One way of reaching a page element or screen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Click a CSS selector
    Selector(String),
    /// Click the element showing this text
    Text(String),
    /// Go straight to a known address
    Navigate(String),
}

impl Strategy {
    /// Selector first, then the visible label
    pub fn click_chain(target: &ClickTarget) -> Vec<Strategy> {
        vec![
            Strategy::Selector(target.selector.clone()),
            Strategy::Text(target.label.clone()),
        ]
    }

    /// Selector, label, then direct navigation
    pub fn open_chain(target: &ClickTarget, url: &str) -> Vec<Strategy> {
        let mut chain = Self::click_chain(target);
        chain.push(Strategy::Navigate(url.to_string()));
        chain
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Selector(s) => write!(f, "selector {}", s),
            Self::Text(t) => write!(f, "text '{}'", t),
            Self::Navigate(u) => write!(f, "navigate {}", u),
        }
    }
}

/// Which strategy in a chain worked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyOutcome {
    /// The first strategy worked
    Primary,
    /// A later strategy worked
    Fallback { index: usize, strategy: Strategy },
    /// Nothing worked
    Exhausted,
}

impl StrategyOutcome {
    pub fn succeeded(&self) -> bool {
        !matches!(self, Self::Exhausted)
    }
}

/// Match a URL against a glob pattern; `*` spans `/`
pub fn url_matches(pattern: &str, url: &str) -> bool {
    match glob::Pattern::new(pattern) {
        Ok(p) => p.matches(url),
        Err(e) => {
            warn!("Invalid URL pattern '{}': {}", pattern, e);
            false
        }
    }
}

/// Borrowed view of the session page for the duration of one call
pub struct Interactor<'a> {
    page: &'a dyn PortalPage,
    timeouts: &'a TimeoutConfig,
    screenshots: &'a ScreenshotStore,
    lost: &'a AtomicBool,
}

impl<'a> Interactor<'a> {
    pub fn new(
        page: &'a dyn PortalPage,
        timeouts: &'a TimeoutConfig,
        screenshots: &'a ScreenshotStore,
        lost: &'a AtomicBool,
    ) -> Self {
        Self {
            page,
            timeouts,
            screenshots,
            lost,
        }
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        self.timeouts
    }

    /// The browser stopped answering during one of this session's calls
    pub fn session_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    fn mark_lost(&self, err: &AutopilotError) {
        if !self.lost.swap(true, Ordering::SeqCst) {
            warn!("Browser session lost: {}", err);
        }
    }

    /// Log a failed call and probe whether the page is still there
    async fn miss(&self, call: &str, err: AutopilotError) -> bool {
        warn!("{} failed: {}", call, err);
        if !self.session_lost() {
            if let Err(e) = self.page.current_url().await {
                self.mark_lost(&e);
            }
        }
        false
    }

    pub async fn navigate(&self, url: &str) -> bool {
        if self.session_lost() {
            return false;
        }
        match self.page.navigate(url, self.timeouts.navigation()).await {
            Ok(()) => true,
            Err(e) => self.miss(&format!("navigate({})", url), e).await,
        }
    }

    pub async fn click_by_selector(&self, selector: &str, timeout: Duration) -> bool {
        if self.session_lost() {
            return false;
        }
        debug!("click_by_selector({})", selector);
        match self.page.click(selector, timeout).await {
            Ok(()) => true,
            Err(e) => self.miss(&format!("click_by_selector({})", selector), e).await,
        }
    }

    pub async fn click_by_visible_text(&self, text: &str, timeout: Duration) -> bool {
        if self.session_lost() {
            return false;
        }
        debug!("click_by_visible_text({})", text);
        match self.page.click_text(text, timeout).await {
            Ok(()) => true,
            Err(e) => self.miss(&format!("click_by_visible_text({})", text), e).await,
        }
    }

    pub async fn fill_by_selector(&self, selector: &str, value: &str, timeout: Duration) -> bool {
        if self.session_lost() {
            return false;
        }
        debug!("fill_by_selector({})", selector);
        match self.page.fill(selector, value, timeout).await {
            Ok(()) => true,
            Err(e) => self.miss(&format!("fill_by_selector({})", selector), e).await,
        }
    }

    pub async fn select_by_label(&self, selector: &str, label: &str, timeout: Duration) -> bool {
        if self.session_lost() {
            return false;
        }
        debug!("select_by_label({}, {})", selector, label);
        match self.page.select_label(selector, label, timeout).await {
            Ok(()) => true,
            Err(e) => {
                self.miss(&format!("select_by_label({}, {})", selector, label), e)
                    .await
            }
        }
    }

    pub async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> bool {
        if self.session_lost() {
            return false;
        }
        match self.page.wait_for_selector(selector, timeout).await {
            Ok(()) => true,
            Err(e) => self.miss(&format!("wait_for_selector({})", selector), e).await,
        }
    }

    /// Wait for the document to load, then give late tables a moment
    pub async fn wait_for_idle(&self) -> bool {
        if self.session_lost() {
            return false;
        }
        match self.page.wait_for_idle(self.timeouts.navigation()).await {
            Ok(()) => {
                tokio::time::sleep(self.timeouts.settle()).await;
                true
            }
            Err(e) => self.miss("wait_for_idle", e).await,
        }
    }

    /// Poll the current URL until it matches `pattern` or `timeout` elapses
    pub async fn wait_for_url_matching(&self, pattern: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.page.current_url().await {
                Ok(url) if url_matches(pattern, &url) => return true,
                Ok(_) => {}
                Err(e) => {
                    self.mark_lost(&e);
                    return false;
                }
            }
            if Instant::now() >= deadline {
                debug!("URL never matched {} within {:?}", pattern, timeout);
                return false;
            }
            tokio::time::sleep(self.timeouts.poll_interval()).await;
        }
    }

    /// Cell texts per row, or `None` if the page could not be read
    pub async fn read_table(&self, row_selector: &str) -> Option<Vec<Vec<String>>> {
        if self.session_lost() {
            return None;
        }
        match self.page.table_rows(row_selector).await {
            Ok(rows) => Some(rows),
            Err(e) => {
                self.miss(&format!("read_table({})", row_selector), e).await;
                None
            }
        }
    }

    /// Screenshot of the whole page, stored on disk
    pub async fn capture_screenshot(&self, label: &str) -> Option<PathBuf> {
        fail_open("capture_screenshot", || async {
            let png = self.page.screenshot_png().await?;
            self.screenshots.save(label, &png).await
        })
        .await
    }

    /// Try each strategy in order until one succeeds
    pub async fn attempt(&self, strategies: &[Strategy]) -> StrategyOutcome {
        let timeout = self.timeouts.action();
        for (index, strategy) in strategies.iter().enumerate() {
            if self.session_lost() {
                break;
            }
            let ok = match strategy {
                Strategy::Selector(s) => self.click_by_selector(s, timeout).await,
                Strategy::Text(t) => self.click_by_visible_text(t, timeout).await,
                Strategy::Navigate(u) => self.navigate(u).await,
            };
            if ok {
                return if index == 0 {
                    StrategyOutcome::Primary
                } else {
                    debug!("Fell back to {}", strategy);
                    StrategyOutcome::Fallback {
                        index,
                        strategy: strategy.clone(),
                    }
                };
            }
        }
        StrategyOutcome::Exhausted
    }
}

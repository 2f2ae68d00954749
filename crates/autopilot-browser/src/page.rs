//! The browser automation surface the primitives compile down to

use async_trait::async_trait;
use autopilot_core::config::BrowserConfig;
use autopilot_core::Result;
use std::time::Duration;

/// One controllable page
///
/// Implementations report failures as errors; the
/// [`Interactor`](crate::interact::Interactor) turns them into warnings and
/// falsy results.
#[async_trait]
pub trait PortalPage: Send + Sync {
    /// Navigate and wait for the load to finish
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()>;

    async fn click(&self, selector: &str, timeout: Duration) -> Result<()>;

    /// Click the first clickable element whose visible text contains `text`
    async fn click_text(&self, text: &str, timeout: Duration) -> Result<()>;

    /// Replace the value of an input and fire input/change events
    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> Result<()>;

    /// Pick the `<option>` whose label matches
    async fn select_label(&self, selector: &str, label: &str, timeout: Duration) -> Result<()>;

    /// Wait until the document has finished loading
    async fn wait_for_idle(&self, timeout: Duration) -> Result<()>;

    /// Cell texts of every `<td>` in each row matched by `row_selector`
    async fn table_rows(&self, row_selector: &str) -> Result<Vec<Vec<String>>>;

    async fn screenshot_png(&self) -> Result<Vec<u8>>;

    /// Release the page and its browser
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Acquires a page for a new session
#[async_trait]
pub trait PageLauncher: Send + Sync {
    async fn launch(&self, config: &BrowserConfig) -> Result<Box<dyn PortalPage>>;
}

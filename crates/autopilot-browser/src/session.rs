//! Session controller: owns the browser page for one agent
//!
//! The page handle never leaves this type. Workflows borrow it through
//! [`SessionController::interactor`] for the duration of a call. A browser
//! that stops answering during one of those calls marks the session lost;
//! the next [`SessionController::start`] replaces it.

use crate::interact::Interactor;
use crate::page::{PageLauncher, PortalPage};
use crate::screenshot::ScreenshotStore;
use autopilot_core::config::{BrowserConfig, PortalConfig, TimeoutConfig};
use autopilot_core::{AutopilotConfig, AutopilotError, Result, SessionInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Portal login credentials
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read the password from the environment variable `password_env`
    pub fn from_env(username: impl Into<String>, password_env: &str) -> Result<Self> {
        let password = std::env::var(password_env).map_err(|_| {
            AutopilotError::Config(format!(
                "Portal password not set; export {} before launching",
                password_env
            ))
        })?;
        Ok(Self::new(username, password))
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Instruction returned once credentials are filled in
pub const LOGIN_INSTRUCTION: &str = "Please solve the CAPTCHA and click Login on the browser window. \
     Then enter OTP if prompted, and tell me when you are on the dashboard.";

pub struct SessionController {
    launcher: Box<dyn PageLauncher>,
    browser: BrowserConfig,
    timeouts: TimeoutConfig,
    portal: PortalConfig,
    screenshots: ScreenshotStore,
    page: Option<Box<dyn PortalPage>>,
    info: Option<SessionInfo>,
    lost: AtomicBool,
}

impl SessionController {
    pub fn new(launcher: Box<dyn PageLauncher>, config: &AutopilotConfig) -> Self {
        Self {
            launcher,
            browser: config.browser.clone(),
            timeouts: config.timeouts.clone(),
            portal: config.portal.clone(),
            screenshots: ScreenshotStore::new(config.browser.screenshot_dir.clone()),
            page: None,
            info: None,
            lost: AtomicBool::new(false),
        }
    }

    /// Acquire the browser page. A live session is reused, never replaced;
    /// a lost one is dropped and relaunched.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_lost() {
            warn!("Replacing lost browser session");
            self.close().await?;
        }
        if self.page.is_some() {
            return Ok(());
        }
        let page = self.launcher.launch(&self.browser).await?;
        self.page = Some(page);
        self.info = Some(SessionInfo::new());
        info!("Session started");
        Ok(())
    }

    /// Open the login page and fill the credential fields
    ///
    /// The CAPTCHA field is left alone: a human has to solve it. Failures are
    /// reported in the returned message.
    pub async fn login(&mut self, credentials: &Credentials) -> String {
        if let Err(e) = self.start().await {
            return format!("Error during login init: {}", e);
        }
        let Some(interactor) = self.interactor() else {
            return "Error during login init: no browser page".to_string();
        };

        info!("Navigating to portal login as {}", credentials.username);
        if !interactor.navigate(&self.portal.login_url).await {
            return format!("Error during login init: could not open {}", self.portal.login_url);
        }

        let action = self.timeouts.action();
        let selectors = &self.portal.selectors;
        let filled = interactor
            .fill_by_selector(&selectors.username, &credentials.username, action)
            .await
            && interactor
                .fill_by_selector(&selectors.password, credentials.password(), action)
                .await;
        if !filled {
            return "Error during login init: credential fields not found; \
                    fill them in the browser window, solve the CAPTCHA and log in."
                .to_string();
        }

        self.touch();
        LOGIN_INSTRUCTION.to_string()
    }

    /// Poll for the post-login address. Advisory only: `false` means
    /// "not detected", not "not logged in".
    pub async fn wait_for_login(&mut self, timeout: Duration) -> bool {
        let detected = match self.interactor() {
            Some(interactor) => {
                interactor
                    .wait_for_url_matching(&self.portal.dashboard_pattern, timeout)
                    .await
            }
            None => false,
        };
        if detected {
            info!("Dashboard detected");
            self.mark_authenticated();
        } else {
            warn!("Dashboard not detected within {:?}", timeout);
        }
        detected
    }

    /// Record the operator's login acknowledgment
    pub fn mark_authenticated(&mut self) {
        if let Some(info) = self.info.as_mut() {
            info.authenticated = true;
            info.touch();
        }
    }

    /// A page is held and has not stopped answering
    pub fn is_open(&self) -> bool {
        self.page.is_some() && !self.is_lost()
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    pub fn is_authenticated(&self) -> bool {
        self.info.as_ref().map(|i| i.authenticated).unwrap_or(false)
    }

    pub fn info(&self) -> Option<&SessionInfo> {
        self.info.as_ref()
    }

    pub fn touch(&mut self) {
        if let Some(info) = self.info.as_mut() {
            info.touch();
        }
    }

    pub fn portal(&self) -> &PortalConfig {
        &self.portal
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    /// Lend the page to the interaction primitives for one call. `None`
    /// once the session is closed or lost.
    pub fn interactor(&self) -> Option<Interactor<'_>> {
        if self.is_lost() {
            return None;
        }
        self.page
            .as_deref()
            .map(|page| Interactor::new(page, &self.timeouts, &self.screenshots, &self.lost))
    }

    /// Release the page and browser. Safe to call repeatedly.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                warn!("Browser did not close cleanly: {}", e);
            }
            info!("Session closed");
        }
        self.info = None;
        self.lost.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{PageCall, ScriptedLauncher, ScriptedPage};

    fn test_config() -> AutopilotConfig {
        let mut config = AutopilotConfig::default();
        config.timeouts.poll_interval_ms = 5;
        config.timeouts.settle_ms = 0;
        config.browser.screenshot_dir = std::env::temp_dir().join("autopilot-session-tests");
        config
    }

    #[tokio::test]
    async fn test_login_fills_credentials_but_not_captcha() {
        let page = ScriptedPage::new();
        let mut session = SessionController::new(Box::new(ScriptedLauncher::new(page.clone())), &test_config());

        let message = session.login(&Credentials::new("ACME2026", "s3cret")).await;

        assert_eq!(message, LOGIN_INSTRUCTION);
        assert!(session.is_open());
        assert!(!session.is_authenticated());
        assert_eq!(page.filled("#username").as_deref(), Some("ACME2026"));
        assert_eq!(page.filled("#user_pass").as_deref(), Some("s3cret"));
        assert!(page
            .calls()
            .iter()
            .all(|c| !matches!(c, PageCall::Fill(s, _) if s.contains("captcha"))));
    }

    #[tokio::test]
    async fn test_login_reports_launch_failure() {
        let mut session = SessionController::new(Box::new(ScriptedLauncher::failing()), &test_config());
        let message = session.login(&Credentials::new("u", "p")).await;
        assert!(message.starts_with("Error during login init"));
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_wait_for_login_detects_dashboard() {
        let page = ScriptedPage::new();
        let mut session = SessionController::new(Box::new(ScriptedLauncher::new(page.clone())), &test_config());
        session.start().await.unwrap();

        assert!(!session.wait_for_login(Duration::from_millis(20)).await);
        assert!(!session.is_authenticated());

        page.set_url("https://services.gst.gov.in/services/auth/dashboard");
        assert!(session.wait_for_login(Duration::from_millis(20)).await);
        assert!(session.is_authenticated());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let page = ScriptedPage::new();
        let mut session = SessionController::new(Box::new(ScriptedLauncher::new(page.clone())), &test_config());
        session.start().await.unwrap();

        session.close().await.unwrap();
        session.close().await.unwrap();

        assert!(!session.is_open());
        assert!(session.info().is_none());
        assert_eq!(page.count(&PageCall::Close), 1);
    }

    #[tokio::test]
    async fn test_lost_session_is_relaunched() {
        let page = ScriptedPage::new();
        let mut session = SessionController::new(Box::new(ScriptedLauncher::new(page.clone())), &test_config());
        session.start().await.unwrap();

        page.crash();
        let interactor = session.interactor().unwrap();
        assert!(!interactor.navigate("https://portal.test").await);
        assert!(session.is_lost());
        assert!(!session.is_open());
        assert!(session.interactor().is_none());

        page.recover();
        session.start().await.unwrap();
        assert!(session.is_open());
        assert!(!session.is_lost());
        assert_eq!(page.count(&PageCall::Close), 1);
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("user", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("user"));
        assert!(!debug.contains("hunter2"));
    }
}

//! Configuration management for the autopilot
//!
//! Repository-level settings live in `.autopilot/config.toml`: browser launch
//! options, per-operation timeouts, the portal's addresses and selectors,
//! credential sources and collaborator file locations. Every section has
//! defaults, so a missing file or a partial file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::Result;

/// Directory holding config, activity log and screenshots
pub const AUTOPILOT_DIR: &str = ".autopilot";

/// Repository-level autopilot configuration
///
/// Loaded from `.autopilot/config.toml` in the working directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutopilotConfig {
    /// Browser launch options
    #[serde(default)]
    pub browser: BrowserConfig,

    /// Per-operation timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Portal addresses and selectors
    #[serde(default)]
    pub portal: PortalConfig,

    /// Where credentials come from
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Collaborator file locations
    #[serde(default)]
    pub stores: StoresConfig,
}

/// Browser launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run without a window. Off by default so the operator can intervene.
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub user_agent: Option<String>,
    /// Seconds the browser may sit idle before it is torn down
    pub idle_timeout_secs: u64,
    /// Where screenshots are written
    pub screenshot_dir: PathBuf,
}

/// Timeouts for browser interactions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Individual clicks, fills and selections
    pub action_secs: u64,
    /// Page loads
    pub navigation_secs: u64,
    /// Long post-login URL poll
    pub login_detect_secs: u64,
    /// Short advisory check when the operator acknowledges login
    pub login_confirm_secs: u64,
    /// Wait for the portal's verification result
    pub verify_secs: u64,
    /// URL/ready-state polling interval
    pub poll_interval_ms: u64,
    /// Extra wait after a page goes idle (tables render late)
    pub settle_ms: u64,
    /// How often the console reminds the operator about an open question
    pub reminder_secs: u64,
}

impl TimeoutConfig {
    pub fn action(&self) -> Duration {
        Duration::from_secs(self.action_secs)
    }

    pub fn navigation(&self) -> Duration {
        Duration::from_secs(self.navigation_secs)
    }

    pub fn login_detect(&self) -> Duration {
        Duration::from_secs(self.login_detect_secs)
    }

    pub fn login_confirm(&self) -> Duration {
        Duration::from_secs(self.login_confirm_secs)
    }

    pub fn verify(&self) -> Duration {
        Duration::from_secs(self.verify_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn reminder(&self) -> Duration {
        Duration::from_secs(self.reminder_secs.max(1))
    }
}

/// A clickable element: structural selector first, visible label as fallback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickTarget {
    pub selector: String,
    pub label: String,
}

impl ClickTarget {
    pub fn new(selector: &str, label: &str) -> Self {
        Self {
            selector: selector.to_string(),
            label: label.to_string(),
        }
    }
}

/// Portal addresses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub login_url: String,
    /// Glob matched against the current URL; only reachable after login
    pub dashboard_pattern: String,
    pub notices_url: String,
    pub returns_url: String,
    /// Direct address of the outward-supply return preparation screen
    pub return_a_url: String,
    /// Direct address of the summary return preparation screen
    pub return_b_url: String,
    pub payment_url: String,
    pub selectors: PortalSelectors,
}

/// Selectors and labels for every element the workflows touch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalSelectors {
    // Login
    pub username: String,
    pub password: String,

    // Notices
    pub notice_rows: String,

    // Returns dashboard
    pub financial_year: String,
    pub period: String,
    pub search: ClickTarget,

    // Outward-supply return
    pub return_a_prepare: ClickTarget,
    pub grouped_add: ClickTarget,
    pub grouped_tax_id: String,
    pub grouped_number: String,
    pub grouped_value: String,
    pub grouped_save: ClickTarget,
    pub aggregate_add: ClickTarget,
    pub aggregate_taxable: String,
    pub aggregate_igst: String,
    pub aggregate_cgst: String,
    pub aggregate_sgst: String,
    pub aggregate_save: ClickTarget,
    pub return_a_preview: ClickTarget,

    // Summary return
    pub return_b_prepare: ClickTarget,
    pub liability_open: ClickTarget,
    pub liability_taxable: String,
    pub liability_igst: String,
    pub liability_cgst: String,
    pub liability_sgst: String,
    pub liability_confirm: ClickTarget,
    pub credit_open: ClickTarget,
    pub credit_igst: String,
    pub credit_cgst: String,
    pub credit_sgst: String,
    pub credit_confirm: ClickTarget,
    pub return_b_preview: ClickTarget,

    // Submission tail
    pub submit: ClickTarget,
    pub verify_method: ClickTarget,
    pub otp_input: String,
    pub verify: ClickTarget,
    pub verify_success: String,

    // Payment instrument
    pub payment_cgst: String,
    pub payment_sgst: String,
}

/// Credential sources
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Portal username (may also be given on the command line)
    pub username: Option<String>,
    /// Environment variable containing the portal password
    pub password_env: String,
}

/// Locations of the ledger and notification files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoresConfig {
    pub ledger_path: PathBuf,
    pub notices_path: PathBuf,
    /// Append the markdown audit trail to `.autopilot/activity.md`
    pub activity_log: bool,
}

impl AutopilotConfig {
    /// Load configuration from `.autopilot/config.toml` or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = root.join(AUTOPILOT_DIR).join("config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::AutopilotError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| crate::AutopilotError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Write default configuration to `.autopilot/config.toml`
    pub fn write_default(root: &Path) -> Result<PathBuf> {
        let config_dir = root.join(AUTOPILOT_DIR);
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        std::fs::write(&config_path, Self::default().to_toml()?)?;
        Ok(config_path)
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: false,
            window_width: 1280,
            window_height: 720,
            user_agent: None,
            idle_timeout_secs: 1800,
            screenshot_dir: PathBuf::from(AUTOPILOT_DIR).join("screenshots"),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            action_secs: 5,
            navigation_secs: 30,
            login_detect_secs: 300,
            login_confirm_secs: 5,
            verify_secs: 15,
            poll_interval_ms: 500,
            settle_ms: 2000,
            reminder_secs: 120,
        }
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            login_url: "https://services.gst.gov.in/services/login".to_string(),
            dashboard_pattern: "*/dashboard*".to_string(),
            notices_url: "https://services.gst.gov.in/services/auth/viewnotices".to_string(),
            returns_url: "https://services.gst.gov.in/services/auth/returns".to_string(),
            return_a_url: "https://return.gst.gov.in/returns/auth/gstr1".to_string(),
            return_b_url: "https://return.gst.gov.in/returns/auth/gstr3b".to_string(),
            payment_url: "https://payment.gst.gov.in/payment/auth/createchallan".to_string(),
            selectors: PortalSelectors::default(),
        }
    }
}

impl Default for PortalSelectors {
    fn default() -> Self {
        Self {
            username: "#username".to_string(),
            password: "#user_pass".to_string(),

            notice_rows: "table tbody tr".to_string(),

            financial_year: "select[id='finYear']".to_string(),
            period: "select[id='period']".to_string(),
            search: ClickTarget::new("button[type='submit']", "SEARCH"),

            return_a_prepare: ClickTarget::new("#gstr1-prepare-online", "PREPARE ONLINE"),
            grouped_add: ClickTarget::new("#b2b-add-record", "ADD RECORD"),
            grouped_tax_id: "#ctin".to_string(),
            grouped_number: "#inum".to_string(),
            grouped_value: "#ival".to_string(),
            grouped_save: ClickTarget::new("#b2b-save", "SAVE"),
            aggregate_add: ClickTarget::new("#b2cs-add-record", "ADD DETAILS"),
            aggregate_taxable: "#b2cs-txval".to_string(),
            aggregate_igst: "#b2cs-iamt".to_string(),
            aggregate_cgst: "#b2cs-camt".to_string(),
            aggregate_sgst: "#b2cs-samt".to_string(),
            aggregate_save: ClickTarget::new("#b2cs-save", "SAVE"),
            return_a_preview: ClickTarget::new("#gstr1-preview", "PREVIEW"),

            return_b_prepare: ClickTarget::new("#gstr3b-prepare-online", "PREPARE ONLINE"),
            liability_open: ClickTarget::new("#tile-3-1", "Tax on outward and reverse charge inward supplies"),
            liability_taxable: "#osup-txval".to_string(),
            liability_igst: "#osup-iamt".to_string(),
            liability_cgst: "#osup-camt".to_string(),
            liability_sgst: "#osup-samt".to_string(),
            liability_confirm: ClickTarget::new("#tile-3-1-confirm", "CONFIRM"),
            credit_open: ClickTarget::new("#tile-4", "Eligible ITC"),
            credit_igst: "#itc-iamt".to_string(),
            credit_cgst: "#itc-camt".to_string(),
            credit_sgst: "#itc-samt".to_string(),
            credit_confirm: ClickTarget::new("#tile-4-confirm", "CONFIRM"),
            return_b_preview: ClickTarget::new("#gstr3b-preview", "PREVIEW DRAFT"),

            submit: ClickTarget::new("#submit-return", "SUBMIT"),
            verify_method: ClickTarget::new("#file-with-evc", "FILE WITH EVC"),
            otp_input: "#otp".to_string(),
            verify: ClickTarget::new("#verify-otp", "VERIFY"),
            verify_success: ".alert-success".to_string(),

            payment_cgst: "#cgst-tax".to_string(),
            payment_sgst: "#sgst-tax".to_string(),
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            username: None,
            password_env: "PORTAL_PASSWORD".to_string(),
        }
    }
}

impl Default for StoresConfig {
    fn default() -> Self {
        Self {
            ledger_path: PathBuf::from(AUTOPILOT_DIR).join("ledger.json"),
            notices_path: PathBuf::from(AUTOPILOT_DIR).join("notifications.json"),
            activity_log: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_keep_browser_visible() {
        let config = AutopilotConfig::default();
        assert!(!config.browser.headless);
        assert_eq!(config.browser.window_width, 1280);
        assert_eq!(config.browser.window_height, 720);
        assert_eq!(config.timeouts.login_detect_secs, 300);
        assert!(config.timeouts.action_secs < 10);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config = AutopilotConfig::from_toml(
            r#"
            [timeouts]
            action_secs = 2

            [portal.selectors]
            username = "input[name='user']"
            "#,
        )
        .unwrap();

        assert_eq!(config.timeouts.action_secs, 2);
        assert_eq!(config.timeouts.navigation_secs, 30);
        assert_eq!(config.portal.selectors.username, "input[name='user']");
        assert_eq!(config.portal.selectors.password, "#user_pass");
        assert_eq!(config.portal.dashboard_pattern, "*/dashboard*");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = AutopilotConfig::from_toml("timeouts = [").unwrap_err();
        assert!(matches!(err, crate::AutopilotError::Config(_)));
    }

    #[test]
    fn test_load_or_default_reads_written_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AutopilotConfig::load_or_default(dir.path()).is_ok());

        let path = AutopilotConfig::write_default(dir.path()).unwrap();
        assert!(path.ends_with("config.toml"));

        let loaded = AutopilotConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.credentials.password_env, "PORTAL_PASSWORD");
    }
}

//! Browser session control for the portal filing autopilot
//!
//! This crate owns the one browser page an agent drives, and the small set
//! of interaction primitives workflows are written against.
//!
//! # Architecture
//!
//! - [`page`]: the [`PortalPage`] seam over a real or scripted tab
//! - [`chrome`]: Chrome DevTools Protocol implementation of that seam
//! - [`session`]: session lifecycle, login, and login detection
//! - [`interact`]: bounded, non-throwing primitives and fallback chains
//! - [`screenshot`]: screenshot files for the operator's review
//!
//! # Requirements
//!
//! - Chrome or Chromium installed for [`ChromeLauncher`]
//! - The `testing` feature for the in-memory [`testing::ScriptedPage`]

pub mod chrome;
pub mod interact;
pub mod page;
pub mod screenshot;
pub mod session;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use chrome::{ChromeLauncher, ChromePage};
pub use interact::{url_matches, Interactor, Strategy, StrategyOutcome};
pub use page::{PageLauncher, PortalPage};
pub use screenshot::ScreenshotStore;
pub use session::{Credentials, SessionController, LOGIN_INSTRUCTION};

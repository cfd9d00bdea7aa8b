//! pm-browser: shared headless browser for pm-crawler
//!
//! This crate owns the browser side of every operation.
//!
//! ## Features
//!
//! - Driver traits ([`PageDriver`], [`ElementHandle`]) with a headless Chrome
//!   implementation via the headless_chrome crate
//! - CSS and XPath element queries ([`Locator`])
//! - One lazily launched browser per [`SessionManager`], with a bounded pool
//!   of isolated pages
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pm_browser::{BrowserConfig, Locator, SessionManager};
//!
//! let sessions = SessionManager::chrome(BrowserConfig::default());
//! let session = sessions.acquire().await?;
//! let page = session.page();
//! page.navigate("https://example.com").await?;
//! let links = page.query_all(&Locator::parse("a")).await?;
//! sessions.release(session).await;
//! ```

pub mod chrome;
pub mod driver;
pub mod error;
pub mod session;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use chrome::ChromeLauncher;
pub use driver::{BrowserLauncher, BrowserProcess, ElementHandle, Locator, PageDriver};
pub use error::{BrowserError, Result};
pub use session::{BrowserConfig, BrowserConfigBuilder, PageSession, SessionManager, SessionStatus};

//! Browser driver abstraction
//!
//! The session manager and the operation executor only talk to these traits.
//! [`crate::chrome`] implements them on top of headless Chrome.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::session::BrowserConfig;

/// Element query: CSS selector or XPath expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Css(String),
    XPath(String),
}

impl Locator {
    /// Detect the query language.
    ///
    /// `xpath=...`, `//...` and `(//...` are XPath, everything else is CSS.
    pub fn parse(selector: &str) -> Self {
        let trimmed = selector.trim();
        if let Some(expr) = trimmed.strip_prefix("xpath=") {
            Locator::XPath(expr.to_string())
        } else if trimmed.starts_with("//") || trimmed.starts_with("(//") {
            Locator::XPath(trimmed.to_string())
        } else {
            Locator::Css(trimmed.to_string())
        }
    }

    pub fn query(&self) -> &str {
        match self {
            Locator::Css(q) | Locator::XPath(q) => q,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(q) => f.write_str(q),
            Locator::XPath(q) => write!(f, "xpath={}", q),
        }
    }
}

/// Handle to one matched element
#[async_trait]
pub trait ElementHandle: Send + Sync {
    /// `textContent`, `None` when the DOM reports null
    async fn text_content(&self) -> Result<Option<String>>;

    async fn inner_html(&self) -> Result<String>;

    async fn attribute(&self, name: &str) -> Result<Option<String>>;

    /// Matches below this element, in document order
    async fn query_all(&self, locator: &Locator) -> Result<Vec<Box<dyn ElementHandle>>>;

    /// PNG of the element
    async fn screenshot(&self) -> Result<Vec<u8>>;
}

/// One isolated page
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate and wait for the load to settle
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Matches in document order
    async fn query_all(&self, locator: &Locator) -> Result<Vec<Box<dyn ElementHandle>>>;

    /// Wait until the first match is visible. Fails with `Timeout`.
    async fn wait_for_visible(&self, locator: &Locator, timeout: Duration) -> Result<()>;

    /// PNG of the viewport or of the whole scrollable page
    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>>;

    /// Print the page to PDF
    async fn pdf(&self) -> Result<Vec<u8>>;

    /// Serialized DOM
    async fn content(&self) -> Result<String>;

    async fn close(&self) -> Result<()>;
}

/// A running browser process
#[async_trait]
pub trait BrowserProcess: Send + Sync {
    /// Open a fresh page that shares no navigation state with other pages
    async fn open_page(&self) -> Result<Arc<dyn PageDriver>>;

    async fn close(&self) -> Result<()>;
}

/// Starts browser processes
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, config: &BrowserConfig) -> Result<Arc<dyn BrowserProcess>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_detection() {
        assert_eq!(Locator::parse("div.item > a"), Locator::Css("div.item > a".into()));
        assert_eq!(Locator::parse("//ul/li"), Locator::XPath("//ul/li".into()));
        assert_eq!(Locator::parse("(//a)[1]"), Locator::XPath("(//a)[1]".into()));
        assert_eq!(Locator::parse("xpath=.//span"), Locator::XPath(".//span".into()));
        assert_eq!(Locator::parse("  h1 "), Locator::Css("h1".into()));
    }

    #[test]
    fn test_locator_display() {
        assert_eq!(Locator::parse("//a").to_string(), "xpath=//a");
        assert_eq!(Locator::parse("a[href]").to_string(), "a[href]");
        assert_eq!(Locator::parse("xpath=//b").query(), "//b");
    }
}

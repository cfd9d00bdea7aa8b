//! headless_chrome implementation of the driver traits
//!
//! headless_chrome is a blocking API, so every call runs on the blocking pool.
//! Element handles do not keep CDP node ids around: an element is addressed
//! by the chain of queries that found it and re-resolved inside the page on
//! every read.

use std::ffi::OsStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptionsBuilder, Tab};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::driver::{BrowserLauncher, BrowserProcess, ElementHandle, Locator, PageDriver};
use crate::error::{BrowserError, Result};
use crate::session::BrowserConfig;

const VISIBILITY_POLL: Duration = Duration::from_millis(100);

/// Run a blocking driver call off the async runtime
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BrowserError::Driver(format!("Browser task failed: {}", e)))?
}

/// Launches a local Chrome/Chromium
pub struct ChromeLauncher;

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self, config: &BrowserConfig) -> Result<Arc<dyn BrowserProcess>> {
        let navigation_timeout = Duration::from_secs(config.navigation_timeout);
        let config = config.clone();
        let browser = blocking(move || launch_browser(&config)).await?;

        Ok(Arc::new(ChromeProcess {
            browser: Mutex::new(Some(browser)),
            navigation_timeout,
        }))
    }
}

fn launch_browser(config: &BrowserConfig) -> Result<Browser> {
    let mut args: Vec<String> = vec![
        format!("--window-size={},{}", config.width, config.height),
        "--no-sandbox".to_string(),
        "--disable-setuid-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
    ];

    if !config.enable_gpu {
        args.push("--disable-gpu".to_string());
        args.push("--disable-software-rasterizer".to_string());
    }

    if let Some(ref ua) = config.user_agent {
        args.push(format!("--user-agent={}", ua));
    }

    let os_args: Vec<&OsStr> = args.iter().map(OsStr::new).collect();

    let launch_options = LaunchOptionsBuilder::default()
        .headless(config.headless)
        .path(config.chrome_path.clone())
        .idle_browser_timeout(Duration::from_secs(config.idle_timeout))
        .args(os_args)
        .build()
        .map_err(|e| {
            BrowserError::Initialization(format!("Failed to build launch options: {}", e))
        })?;

    let browser = Browser::new(launch_options).map_err(|e| {
        BrowserError::Initialization(format!("Failed to launch browser: {}", e))
    })?;

    info!("Chrome launched (headless: {})", config.headless);

    Ok(browser)
}

/// Running Chrome process
pub struct ChromeProcess {
    browser: Mutex<Option<Browser>>,
    navigation_timeout: Duration,
}

impl ChromeProcess {
    fn browser(&self) -> Result<Browser> {
        let guard = self
            .browser
            .lock()
            .map_err(|e| BrowserError::Driver(format!("Browser lock poisoned: {}", e)))?;
        guard
            .clone()
            .ok_or_else(|| BrowserError::Driver("Browser already closed".to_string()))
    }
}

#[async_trait]
impl BrowserProcess for ChromeProcess {
    async fn open_page(&self) -> Result<Arc<dyn PageDriver>> {
        let browser = self.browser()?;
        let timeout = self.navigation_timeout;

        let tab = blocking(move || {
            let tab = browser
                .new_tab()
                .map_err(|e| BrowserError::Driver(format!("Failed to create new tab: {}", e)))?;
            tab.set_default_timeout(timeout);
            Ok(tab)
        })
        .await?;

        debug!("Opened tab {}", tab.get_target_id());

        Ok(Arc::new(ChromePage { tab }))
    }

    async fn close(&self) -> Result<()> {
        let browser = self
            .browser
            .lock()
            .map_err(|e| BrowserError::Driver(format!("Browser lock poisoned: {}", e)))?
            .take();

        if let Some(browser) = browser {
            // dropping the last handle kills the process
            blocking(move || {
                drop(browser);
                Ok(())
            })
            .await?;
            info!("Chrome closed");
        }
        Ok(())
    }
}

/// One query step from the document root to an element
#[derive(Debug, Clone, Serialize)]
struct Step(&'static str, String, usize);

impl Step {
    fn new(locator: &Locator, index: usize) -> Self {
        match locator {
            Locator::Css(q) => Step("css", q.clone(), index),
            Locator::XPath(q) => Step("xpath", q.clone(), index),
        }
    }
}

const SCRIPT_HEAD: &str = r#"(() => {
  const pick = (root, kind, query) => {
    if (kind === 'xpath') {
      const snap = document.evaluate(query, root, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
      const out = [];
      for (let i = 0; i < snap.snapshotLength; i++) out.push(snap.snapshotItem(i));
      return out;
    }
    return Array.from(root.querySelectorAll(query));
  };
  const visible = (el) => {
    if (!el || !el.getBoundingClientRect) return false;
    const style = window.getComputedStyle(el);
    const rect = el.getBoundingClientRect();
    return style.visibility !== 'hidden' && style.display !== 'none' && rect.width > 0 && rect.height > 0;
  };
  let node = document;
  for (const [kind, query, index] of "#;

const SCRIPT_MID: &str = r#") {
    node = pick(node, kind, query)[index];
    if (!node) return JSON.stringify({ missing: true });
  }
  const value = ("#;

const SCRIPT_TAIL: &str = r#")(node);
  return JSON.stringify({ value: value === undefined ? null : value });
})()"#;

fn build_script(steps_json: &str, body: &str) -> String {
    let mut script = String::with_capacity(
        SCRIPT_HEAD.len() + steps_json.len() + SCRIPT_MID.len() + body.len() + SCRIPT_TAIL.len(),
    );
    script.push_str(SCRIPT_HEAD);
    script.push_str(steps_json);
    script.push_str(SCRIPT_MID);
    script.push_str(body);
    script.push_str(SCRIPT_TAIL);
    script
}

#[derive(Debug, Deserialize)]
struct ScriptOutcome {
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    value: Value,
}

/// Resolve `steps` in the page and apply `body` (a JS function of the node)
fn run_script(tab: &Tab, steps: &[Step], body: &str) -> Result<Value> {
    let steps_json = serde_json::to_string(steps)
        .map_err(|e| BrowserError::Driver(format!("Failed to encode query: {}", e)))?;
    let script = build_script(&steps_json, body);

    let remote = tab
        .evaluate(&script, false)
        .map_err(|e| BrowserError::Driver(format!("JavaScript execution failed: {}", e)))?;

    let raw = match remote.value {
        Some(Value::String(raw)) => raw,
        other => {
            return Err(BrowserError::Driver(format!(
                "Unexpected script result: {:?}",
                other
            )));
        }
    };

    let outcome: ScriptOutcome = serde_json::from_str(&raw)
        .map_err(|e| BrowserError::Driver(format!("Malformed script result: {}", e)))?;

    if outcome.missing {
        return Err(BrowserError::Detached(
            "element is no longer in the document".to_string(),
        ));
    }
    Ok(outcome.value)
}

fn js_string(value: &str) -> String {
    // a JSON string literal is a valid JS string literal
    Value::String(value.to_string()).to_string()
}

fn count_body(locator: &Locator) -> String {
    let step = Step::new(locator, 0);
    format!(
        "(node) => pick(node, {}, {}).length",
        js_string(step.0),
        js_string(&step.1)
    )
}

fn first_visible_body(locator: &Locator) -> String {
    let step = Step::new(locator, 0);
    format!(
        "(node) => visible(pick(node, {}, {})[0])",
        js_string(step.0),
        js_string(&step.1)
    )
}

const RECT_BODY: &str = r#"(node) => {
  if (node.scrollIntoView) node.scrollIntoView({ block: 'center' });
  const r = node.getBoundingClientRect();
  return { x: r.left + window.scrollX, y: r.top + window.scrollY, width: r.width, height: r.height };
}"#;

const PAGE_SIZE_BODY: &str = r#"() => {
  const root = document.documentElement;
  const body = document.body;
  return {
    x: 0,
    y: 0,
    width: Math.max(root.scrollWidth, body ? body.scrollWidth : 0),
    height: Math.max(root.scrollHeight, body ? body.scrollHeight : 0)
  };
}"#;

#[derive(Debug, Deserialize)]
struct Rect {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

fn clip_screenshot(tab: &Tab, rect: Rect) -> Result<Vec<u8>> {
    if rect.width <= 0.0 || rect.height <= 0.0 {
        return Err(BrowserError::Screenshot("element has no visible area".to_string()));
    }

    let clip = Page::Viewport {
        x: rect.x,
        y: rect.y,
        width: rect.width,
        height: rect.height,
        scale: 1.0,
    };

    tab.capture_screenshot(
        Page::CaptureScreenshotFormatOption::Png,
        None,
        Some(clip),
        true,
    )
    .map_err(|e| BrowserError::Screenshot(format!("Failed to capture screenshot: {}", e)))
}

fn handles(
    tab: &Arc<Tab>,
    parent: &[Step],
    locator: &Locator,
    count: usize,
) -> Vec<Box<dyn ElementHandle>> {
    (0..count)
        .map(|index| {
            let mut steps = parent.to_vec();
            steps.push(Step::new(locator, index));
            Box::new(ChromeElement {
                tab: Arc::clone(tab),
                steps,
            }) as Box<dyn ElementHandle>
        })
        .collect()
}

fn query_count(tab: &Tab, steps: &[Step], locator: &Locator) -> Result<usize> {
    let value = run_script(tab, steps, &count_body(locator))?;
    value
        .as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| BrowserError::Driver(format!("Unexpected match count: {}", value)))
}

/// Chrome tab
pub struct ChromePage {
    tab: Arc<Tab>,
}

#[async_trait]
impl PageDriver for ChromePage {
    async fn navigate(&self, url: &str) -> Result<()> {
        let tab = Arc::clone(&self.tab);
        let url = url.to_string();

        blocking(move || {
            info!("Navigating to: {}", url);

            tab.navigate_to(&url).map_err(|e| {
                BrowserError::Navigation(format!("Failed to navigate to {}: {}", url, e))
            })?;

            tab.wait_until_navigated().map_err(|e| {
                BrowserError::Navigation(format!("Navigation to {} did not finish: {}", url, e))
            })?;

            Ok(())
        })
        .await
    }

    async fn query_all(&self, locator: &Locator) -> Result<Vec<Box<dyn ElementHandle>>> {
        let tab = Arc::clone(&self.tab);
        let locator = locator.clone();

        blocking(move || {
            let count = query_count(&tab, &[], &locator)?;
            debug!("{} matches for {}", count, locator);
            Ok(handles(&tab, &[], &locator, count))
        })
        .await
    }

    async fn wait_for_visible(&self, locator: &Locator, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let body = first_visible_body(locator);

        loop {
            let tab = Arc::clone(&self.tab);
            let body = body.clone();
            let visible = blocking(move || run_script(&tab, &[], &body)).await?;

            if visible.as_bool() == Some(true) {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(BrowserError::Timeout(format!(
                    "'{}' not visible within {}ms",
                    locator,
                    timeout.as_millis()
                )));
            }
            tokio::time::sleep(VISIBILITY_POLL.min(deadline - now)).await;
        }
    }

    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>> {
        let tab = Arc::clone(&self.tab);

        blocking(move || {
            let bytes = if full_page {
                let size = run_script(&tab, &[], PAGE_SIZE_BODY)?;
                let rect: Rect = serde_json::from_value(size)
                    .map_err(|e| BrowserError::Screenshot(format!("Bad page size: {}", e)))?;
                clip_screenshot(&tab, rect)?
            } else {
                tab.capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, None, true)
                    .map_err(|e| {
                        BrowserError::Screenshot(format!("Failed to capture screenshot: {}", e))
                    })?
            };

            debug!("Screenshot captured: {} bytes", bytes.len());
            Ok(bytes)
        })
        .await
    }

    async fn pdf(&self) -> Result<Vec<u8>> {
        let tab = Arc::clone(&self.tab);
        blocking(move || {
            tab.print_to_pdf(None)
                .map_err(|e| BrowserError::Driver(format!("Failed to print PDF: {}", e)))
        })
        .await
    }

    async fn content(&self) -> Result<String> {
        let tab = Arc::clone(&self.tab);
        blocking(move || {
            tab.get_content()
                .map_err(|e| BrowserError::Driver(format!("Failed to get page source: {}", e)))
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        let tab = Arc::clone(&self.tab);
        blocking(move || {
            tab.close(true)
                .map_err(|e| BrowserError::Driver(format!("Failed to close tab: {}", e)))?;
            Ok(())
        })
        .await
    }
}

/// Element addressed by its query chain
pub struct ChromeElement {
    tab: Arc<Tab>,
    steps: Vec<Step>,
}

impl ChromeElement {
    async fn eval(&self, body: String) -> Result<Value> {
        let tab = Arc::clone(&self.tab);
        let steps = self.steps.clone();
        blocking(move || run_script(&tab, &steps, &body)).await
    }
}

fn optional_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        _ => None,
    }
}

#[async_trait]
impl ElementHandle for ChromeElement {
    async fn text_content(&self) -> Result<Option<String>> {
        let value = self.eval("(node) => node.textContent".to_string()).await?;
        Ok(optional_string(value))
    }

    async fn inner_html(&self) -> Result<String> {
        let value = self.eval("(node) => node.innerHTML".to_string()).await?;
        Ok(optional_string(value).unwrap_or_default())
    }

    async fn attribute(&self, name: &str) -> Result<Option<String>> {
        let body = format!(
            "(node) => node.getAttribute ? node.getAttribute({}) : null",
            js_string(name)
        );
        let value = self.eval(body).await?;
        Ok(optional_string(value))
    }

    async fn query_all(&self, locator: &Locator) -> Result<Vec<Box<dyn ElementHandle>>> {
        let tab = Arc::clone(&self.tab);
        let steps = self.steps.clone();
        let locator = locator.clone();

        blocking(move || {
            let count = query_count(&tab, &steps, &locator)?;
            Ok(handles(&tab, &steps, &locator, count))
        })
        .await
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let tab = Arc::clone(&self.tab);
        let steps = self.steps.clone();

        blocking(move || {
            let rect = run_script(&tab, &steps, RECT_BODY)?;
            let rect: Rect = serde_json::from_value(rect)
                .map_err(|e| BrowserError::Screenshot(format!("Bad element bounds: {}", e)))?;
            clip_screenshot(&tab, rect)
        })
        .await
    }
}

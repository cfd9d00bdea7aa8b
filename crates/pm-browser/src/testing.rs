//! Scripted in-memory browser for tests
//!
//! Pages are keyed by URL and hold a tree of [`FakeElement`]s. A query
//! matches an element when the query string equals one of the selectors the
//! element was declared with, so tests spell out exactly what each selector
//! finds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::driver::{BrowserLauncher, BrowserProcess, ElementHandle, Locator, PageDriver};
use crate::error::{BrowserError, Result};
use crate::session::BrowserConfig;

pub const FAKE_VIEWPORT_PNG: &[u8] = b"fake-png:viewport";
pub const FAKE_FULL_PAGE_PNG: &[u8] = b"fake-png:full";
pub const FAKE_ELEMENT_PNG: &[u8] = b"fake-png:element";

/// Element in a fake page
#[derive(Debug, Clone)]
pub struct FakeElement {
    selectors: Vec<String>,
    text: Option<String>,
    html: String,
    attributes: HashMap<String, String>,
    children: Vec<FakeElement>,
    visible: bool,
}

impl FakeElement {
    /// Element matched by `selector`
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selectors: vec![selector.into()],
            text: Some(String::new()),
            html: String::new(),
            attributes: HashMap::new(),
            children: Vec::new(),
            visible: true,
        }
    }

    /// Also matched by `selector`
    pub fn also(mut self, selector: impl Into<String>) -> Self {
        self.selectors.push(selector.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// `textContent` reports null
    pub fn null_text(mut self) -> Self {
        self.text = None;
        self
    }

    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.html = html.into();
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn child(mut self, child: FakeElement) -> Self {
        self.children.push(child);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    fn matches(&self, locator: &Locator) -> bool {
        self.selectors.iter().any(|s| s == locator.query())
    }
}

fn collect_matches(elements: &[FakeElement], locator: &Locator, out: &mut Vec<FakeElement>) {
    for element in elements {
        if element.matches(locator) {
            out.push(element.clone());
        }
        collect_matches(&element.children, locator, out);
    }
}

fn boxed(elements: Vec<FakeElement>) -> Vec<Box<dyn ElementHandle>> {
    elements
        .into_iter()
        .map(|element| Box::new(FakeElementHandle { element }) as Box<dyn ElementHandle>)
        .collect()
}

/// Content served for one URL
#[derive(Debug, Clone, Default)]
pub struct FakePage {
    elements: Vec<FakeElement>,
    html: String,
    pdf: Vec<u8>,
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn element(mut self, element: FakeElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.html = html.into();
        self
    }

    pub fn pdf(mut self, pdf: impl Into<Vec<u8>>) -> Self {
        self.pdf = pdf.into();
        self
    }
}

/// Every page the fake browser can load
#[derive(Debug, Clone)]
pub struct FakeSite {
    pages: HashMap<String, FakePage>,
    visibility_wait: bool,
}

impl Default for FakeSite {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSite {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            visibility_wait: true,
        }
    }

    pub fn page(mut self, url: impl Into<String>, page: FakePage) -> Self {
        self.pages.insert(url.into(), page);
        self
    }

    /// Make `wait_for_visible` fail immediately with a driver error
    pub fn without_visibility_wait(mut self) -> Self {
        self.visibility_wait = false;
        self
    }
}

#[derive(Default)]
struct Counters {
    launches: AtomicUsize,
    pages_opened: AtomicUsize,
    pages_closed: AtomicUsize,
    browsers_closed: AtomicUsize,
    navigations: Mutex<Vec<String>>,
}

/// Launcher for the fake browser, with counters for assertions
pub struct FakeLauncher {
    site: Arc<FakeSite>,
    counters: Arc<Counters>,
    failing_launches: AtomicUsize,
    launch_delay: Option<Duration>,
    alive_flags: Mutex<Vec<Arc<AtomicBool>>>,
}

impl FakeLauncher {
    pub fn new(site: FakeSite) -> Self {
        Self {
            site: Arc::new(site),
            counters: Arc::new(Counters::default()),
            failing_launches: AtomicUsize::new(0),
            launch_delay: None,
            alive_flags: Mutex::new(Vec::new()),
        }
    }

    /// The next `count` launches fail
    pub fn failing_launches(self, count: usize) -> Self {
        self.failing_launches.store(count, Ordering::SeqCst);
        self
    }

    pub fn launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = Some(delay);
        self
    }

    pub fn launch_count(&self) -> usize {
        self.counters.launches.load(Ordering::SeqCst)
    }

    pub fn pages_opened(&self) -> usize {
        self.counters.pages_opened.load(Ordering::SeqCst)
    }

    pub fn pages_closed(&self) -> usize {
        self.counters.pages_closed.load(Ordering::SeqCst)
    }

    pub fn browsers_closed(&self) -> usize {
        self.counters.browsers_closed.load(Ordering::SeqCst)
    }

    /// URLs navigated to, in order
    pub fn navigations(&self) -> Vec<String> {
        self.counters
            .navigations
            .lock()
            .map(|n| n.clone())
            .unwrap_or_default()
    }

    /// Simulate every launched browser crashing
    pub fn kill_browsers(&self) {
        if let Ok(flags) = self.alive_flags.lock() {
            for flag in flags.iter() {
                flag.store(false, Ordering::SeqCst);
            }
        }
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, _config: &BrowserConfig) -> Result<Arc<dyn BrowserProcess>> {
        if let Some(delay) = self.launch_delay {
            tokio::time::sleep(delay).await;
        }

        let should_fail = self
            .failing_launches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        self.counters.launches.fetch_add(1, Ordering::SeqCst);
        if should_fail {
            return Err(BrowserError::Initialization("fake launch failure".to_string()));
        }

        let alive = Arc::new(AtomicBool::new(true));
        if let Ok(mut flags) = self.alive_flags.lock() {
            flags.push(Arc::clone(&alive));
        }

        Ok(Arc::new(FakeProcess {
            site: Arc::clone(&self.site),
            counters: Arc::clone(&self.counters),
            alive,
        }))
    }
}

struct FakeProcess {
    site: Arc<FakeSite>,
    counters: Arc<Counters>,
    alive: Arc<AtomicBool>,
}

#[async_trait]
impl BrowserProcess for FakeProcess {
    async fn open_page(&self) -> Result<Arc<dyn PageDriver>> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(BrowserError::Driver("browser disconnected".to_string()));
        }
        self.counters.pages_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakePageDriver {
            site: Arc::clone(&self.site),
            counters: Arc::clone(&self.counters),
            current: Mutex::new(None),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        self.counters.browsers_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakePageDriver {
    site: Arc<FakeSite>,
    counters: Arc<Counters>,
    current: Mutex<Option<String>>,
}

impl FakePageDriver {
    fn loaded(&self) -> Result<FakePage> {
        let current = self
            .current
            .lock()
            .map_err(|_| BrowserError::Driver("page lock poisoned".to_string()))?
            .clone()
            .ok_or_else(|| BrowserError::Driver("no page loaded".to_string()))?;

        self.site
            .pages
            .get(&current)
            .cloned()
            .ok_or_else(|| BrowserError::Driver(format!("page vanished: {}", current)))
    }
}

#[async_trait]
impl PageDriver for FakePageDriver {
    async fn navigate(&self, url: &str) -> Result<()> {
        if let Ok(mut navigations) = self.counters.navigations.lock() {
            navigations.push(url.to_string());
        }
        if !self.site.pages.contains_key(url) {
            return Err(BrowserError::Navigation(format!(
                "net::ERR_NAME_NOT_RESOLVED at {}",
                url
            )));
        }
        let mut current = self
            .current
            .lock()
            .map_err(|_| BrowserError::Driver("page lock poisoned".to_string()))?;
        *current = Some(url.to_string());
        Ok(())
    }

    async fn query_all(&self, locator: &Locator) -> Result<Vec<Box<dyn ElementHandle>>> {
        let page = self.loaded()?;
        let mut matches = Vec::new();
        collect_matches(&page.elements, locator, &mut matches);
        Ok(boxed(matches))
    }

    async fn wait_for_visible(&self, locator: &Locator, timeout: Duration) -> Result<()> {
        if !self.site.visibility_wait {
            return Err(BrowserError::Driver("visibility wait unsupported".to_string()));
        }

        let page = self.loaded()?;
        let mut matches = Vec::new();
        collect_matches(&page.elements, locator, &mut matches);
        match matches.first() {
            Some(element) if element.visible => Ok(()),
            _ => {
                tokio::time::sleep(timeout).await;
                Err(BrowserError::Timeout(format!(
                    "'{}' not visible within {}ms",
                    locator,
                    timeout.as_millis()
                )))
            }
        }
    }

    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>> {
        self.loaded()?;
        Ok(if full_page {
            FAKE_FULL_PAGE_PNG.to_vec()
        } else {
            FAKE_VIEWPORT_PNG.to_vec()
        })
    }

    async fn pdf(&self) -> Result<Vec<u8>> {
        Ok(self.loaded()?.pdf)
    }

    async fn content(&self) -> Result<String> {
        Ok(self.loaded()?.html)
    }

    async fn close(&self) -> Result<()> {
        self.counters.pages_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeElementHandle {
    element: FakeElement,
}

#[async_trait]
impl ElementHandle for FakeElementHandle {
    async fn text_content(&self) -> Result<Option<String>> {
        Ok(self.element.text.clone())
    }

    async fn inner_html(&self) -> Result<String> {
        Ok(self.element.html.clone())
    }

    async fn attribute(&self, name: &str) -> Result<Option<String>> {
        Ok(self.element.attributes.get(name).cloned())
    }

    async fn query_all(&self, locator: &Locator) -> Result<Vec<Box<dyn ElementHandle>>> {
        let mut matches = Vec::new();
        collect_matches(&self.element.children, locator, &mut matches);
        Ok(boxed(matches))
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        Ok(FAKE_ELEMENT_PNG.to_vec())
    }
}

//! Browser session management
//!
//! One [`SessionManager`] owns the shared browser process. Operations borrow
//! an isolated page through [`SessionManager::acquire`] and give it back with
//! [`SessionManager::release`]. The number of open pages is bounded by a
//! semaphore, so a burst of requests queues instead of opening unbounded tabs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pm_core::BrowserSettings;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::chrome::ChromeLauncher;
use crate::driver::{BrowserLauncher, BrowserProcess, PageDriver};
use crate::error::{BrowserError, Result};

/// Browser session configuration
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Whether to run in headless mode
    pub headless: bool,
    /// Window width in pixels
    pub width: u32,
    /// Window height in pixels
    pub height: u32,
    /// Navigation timeout in seconds
    pub navigation_timeout: u64,
    /// Seconds `acquire()` waits for a free page
    pub acquire_timeout: u64,
    /// Seconds without driver traffic before the connection is dropped
    pub idle_timeout: u64,
    /// Pages open at the same time
    pub max_pages: usize,
    /// Enable GPU acceleration
    pub enable_gpu: bool,
    /// Custom user agent
    pub user_agent: Option<String>,
    /// Chrome binary, auto-detected when unset
    pub chrome_path: Option<PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            width: 1920,
            height: 1080,
            navigation_timeout: 30,
            acquire_timeout: 60,
            idle_timeout: 600,
            max_pages: 4,
            enable_gpu: false,
            user_agent: None,
            chrome_path: None,
        }
    }
}

impl BrowserConfig {
    /// Create a new configuration builder
    pub fn builder() -> BrowserConfigBuilder {
        BrowserConfigBuilder::default()
    }

    /// Create a headless configuration
    pub fn headless() -> Self {
        Self {
            headless: true,
            ..Default::default()
        }
    }

    /// Create a visible browser configuration
    pub fn visible() -> Self {
        Self {
            headless: false,
            ..Default::default()
        }
    }
}

impl From<&BrowserSettings> for BrowserConfig {
    fn from(settings: &BrowserSettings) -> Self {
        Self {
            headless: settings.headless,
            width: settings.width,
            height: settings.height,
            navigation_timeout: settings.navigation_timeout_secs,
            acquire_timeout: settings.acquire_timeout_secs,
            idle_timeout: settings.idle_timeout_secs,
            max_pages: settings.max_pages.max(1),
            enable_gpu: false,
            user_agent: settings.user_agent.clone(),
            chrome_path: settings.chrome_path.clone(),
        }
    }
}

/// Builder for BrowserConfig
#[derive(Default)]
pub struct BrowserConfigBuilder {
    config: BrowserConfig,
}

impl BrowserConfigBuilder {
    pub fn headless(mut self, headless: bool) -> Self {
        self.config.headless = headless;
        self
    }

    pub fn window_size(mut self, width: u32, height: u32) -> Self {
        self.config.width = width;
        self.config.height = height;
        self
    }

    pub fn navigation_timeout(mut self, seconds: u64) -> Self {
        self.config.navigation_timeout = seconds;
        self
    }

    pub fn acquire_timeout(mut self, seconds: u64) -> Self {
        self.config.acquire_timeout = seconds;
        self
    }

    pub fn max_pages(mut self, max_pages: usize) -> Self {
        self.config.max_pages = max_pages.max(1);
        self
    }

    pub fn enable_gpu(mut self, enable: bool) -> Self {
        self.config.enable_gpu = enable;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    pub fn chrome_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.chrome_path = Some(path.into());
        self
    }

    pub fn build(self) -> BrowserConfig {
        self.config
    }
}

/// Lifecycle of the shared browser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Uninitialized,
    Active,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Uninitialized => "uninitialized",
            SessionStatus::Active => "active",
            SessionStatus::Closed => "closed",
        }
    }
}

enum SessionState {
    Uninitialized,
    Active(Arc<dyn BrowserProcess>),
    Closed,
}

/// Owner of the shared browser process
pub struct SessionManager {
    launcher: Arc<dyn BrowserLauncher>,
    config: BrowserConfig,
    state: Mutex<SessionState>,
    pages: Arc<Semaphore>,
}

impl SessionManager {
    pub fn new(config: BrowserConfig, launcher: Arc<dyn BrowserLauncher>) -> Self {
        let max_pages = config.max_pages.max(1);
        Self {
            launcher,
            config,
            state: Mutex::new(SessionState::Uninitialized),
            pages: Arc::new(Semaphore::new(max_pages)),
        }
    }

    /// Session manager backed by headless Chrome
    pub fn chrome(config: BrowserConfig) -> Self {
        Self::new(config, Arc::new(ChromeLauncher))
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    pub async fn status(&self) -> SessionStatus {
        match &*self.state.lock().await {
            SessionState::Uninitialized => SessionStatus::Uninitialized,
            SessionState::Active(_) => SessionStatus::Active,
            SessionState::Closed => SessionStatus::Closed,
        }
    }

    /// Pages that can be acquired right now
    pub fn available_pages(&self) -> usize {
        self.pages.available_permits()
    }

    /// Launch the browser ahead of the first operation
    pub async fn warm_up(&self) -> Result<()> {
        self.ensure_browser().await.map(|_| ())
    }

    /// Borrow an isolated page, launching the browser if needed
    pub async fn acquire(&self) -> Result<PageSession> {
        let wait = Duration::from_secs(self.config.acquire_timeout);
        let permit = match tokio::time::timeout(wait, Arc::clone(&self.pages).acquire_owned()).await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(BrowserError::PoolExhausted("page pool is closed".to_string()));
            }
            Err(_) => {
                return Err(BrowserError::PoolExhausted(format!(
                    "all {} pages busy for {}s",
                    self.config.max_pages, self.config.acquire_timeout
                )));
            }
        };

        let browser = self.ensure_browser().await?;
        let page = match browser.open_page().await {
            Ok(page) => page,
            Err(e) => {
                // the process may have died underneath us; relaunch once
                warn!("Failed to open page, relaunching browser: {}", e);
                self.invalidate(&browser).await;
                let browser = self.ensure_browser().await?;
                browser.open_page().await?
            }
        };

        debug!(
            "Page acquired ({} of {} free)",
            self.pages.available_permits(),
            self.config.max_pages
        );

        Ok(PageSession::new(page, permit))
    }

    /// Close the page and free its slot. The browser stays up.
    pub async fn release(&self, session: PageSession) {
        session.close().await;
    }

    /// Close the browser. The next `acquire()` launches a new one.
    pub async fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, SessionState::Closed) {
            SessionState::Active(browser) => {
                info!("Shutting down browser");
                browser.close().await
            }
            SessionState::Uninitialized => {
                *state = SessionState::Uninitialized;
                Ok(())
            }
            SessionState::Closed => Ok(()),
        }
    }

    async fn ensure_browser(&self) -> Result<Arc<dyn BrowserProcess>> {
        let mut state = self.state.lock().await;
        if let SessionState::Active(browser) = &*state {
            return Ok(Arc::clone(browser));
        }

        info!("Launching browser (headless: {})", self.config.headless);

        match self.launcher.launch(&self.config).await {
            Ok(browser) => {
                *state = SessionState::Active(Arc::clone(&browser));
                info!("Browser launched");
                Ok(browser)
            }
            Err(e) => {
                *state = SessionState::Uninitialized;
                Err(match e {
                    BrowserError::Initialization(_) => e,
                    other => BrowserError::Initialization(other.to_string()),
                })
            }
        }
    }

    /// Drop `stale` if it is still the active browser
    async fn invalidate(&self, stale: &Arc<dyn BrowserProcess>) {
        let mut state = self.state.lock().await;
        let is_current = matches!(&*state, SessionState::Active(current) if Arc::ptr_eq(current, stale));
        if is_current {
            *state = SessionState::Closed;
            drop(state);
            if let Err(e) = stale.close().await {
                debug!("Closing stale browser failed: {}", e);
            }
        }
    }
}

/// A borrowed page. Holds one slot of the page pool until closed.
///
/// Prefer [`SessionManager::release`]; a session dropped without release
/// closes its page in the background.
pub struct PageSession {
    page: Arc<dyn PageDriver>,
    released: bool,
    _permit: OwnedSemaphorePermit,
}

impl PageSession {
    fn new(page: Arc<dyn PageDriver>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            page,
            released: false,
            _permit: permit,
        }
    }

    pub fn page(&self) -> Arc<dyn PageDriver> {
        Arc::clone(&self.page)
    }

    async fn close(mut self) {
        self.released = true;
        if let Err(e) = self.page.close().await {
            warn!("Failed to close page: {}", e);
        }
    }
}

impl Drop for PageSession {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let page = Arc::clone(&self.page);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = page.close().await {
                        warn!("Failed to close dropped page: {}", e);
                    }
                });
            }
            Err(_) => warn!("Page session dropped outside a runtime; page left open"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeLauncher, FakeSite};

    fn manager(launcher: Arc<FakeLauncher>, max_pages: usize) -> SessionManager {
        let config = BrowserConfig::builder()
            .max_pages(max_pages)
            .acquire_timeout(1)
            .build();
        SessionManager::new(config, launcher)
    }

    #[test]
    fn test_browser_config_default() {
        let config = BrowserConfig::default();
        assert!(config.headless);
        assert_eq!(config.width, 1920);
        assert_eq!(config.height, 1080);
        assert_eq!(config.max_pages, 4);
    }

    #[test]
    fn test_browser_config_builder() {
        let config = BrowserConfig::builder()
            .headless(false)
            .window_size(1280, 720)
            .navigation_timeout(60)
            .max_pages(0)
            .user_agent("Custom Agent")
            .build();

        assert!(!config.headless);
        assert_eq!(config.width, 1280);
        assert_eq!(config.height, 720);
        assert_eq!(config.navigation_timeout, 60);
        assert_eq!(config.max_pages, 1);
        assert_eq!(config.user_agent, Some("Custom Agent".to_string()));
    }

    #[test]
    fn test_browser_config_presets() {
        assert!(BrowserConfig::headless().headless);
        assert!(!BrowserConfig::visible().headless);
    }

    #[test]
    fn test_browser_config_from_settings() {
        let settings = BrowserSettings {
            max_pages: 0,
            headless: false,
            ..Default::default()
        };
        let config = BrowserConfig::from(&settings);
        assert_eq!(config.max_pages, 1);
        assert!(!config.headless);
        assert_eq!(config.navigation_timeout, settings.navigation_timeout_secs);
    }

    #[tokio::test]
    async fn test_lazy_launch_and_reuse() {
        let launcher = Arc::new(FakeLauncher::new(FakeSite::new()));
        let sessions = manager(Arc::clone(&launcher), 2);
        assert_eq!(sessions.status().await, SessionStatus::Uninitialized);
        assert_eq!(launcher.launch_count(), 0);

        let first = sessions.acquire().await.unwrap();
        sessions.release(first).await;
        let second = sessions.acquire().await.unwrap();
        sessions.release(second).await;

        assert_eq!(sessions.status().await, SessionStatus::Active);
        assert_eq!(launcher.launch_count(), 1);
        assert_eq!(launcher.pages_opened(), 2);
        assert_eq!(launcher.pages_closed(), 2);
    }

    #[tokio::test]
    async fn test_launch_failure_stays_uninitialized() {
        let launcher = Arc::new(FakeLauncher::new(FakeSite::new()).failing_launches(1));
        let sessions = manager(Arc::clone(&launcher), 1);

        let err = sessions.acquire().await.err().unwrap();
        assert!(matches!(err, BrowserError::Initialization(_)));
        assert_eq!(sessions.status().await, SessionStatus::Uninitialized);
        // the failed attempt must not leak its page slot
        assert_eq!(sessions.available_pages(), 1);

        let session = sessions.acquire().await.unwrap();
        sessions.release(session).await;
        assert_eq!(launcher.launch_count(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_then_relaunch() {
        let launcher = Arc::new(FakeLauncher::new(FakeSite::new()));
        let sessions = manager(Arc::clone(&launcher), 1);

        let session = sessions.acquire().await.unwrap();
        sessions.release(session).await;
        sessions.shutdown().await.unwrap();
        assert_eq!(sessions.status().await, SessionStatus::Closed);
        assert_eq!(launcher.browsers_closed(), 1);

        let session = sessions.acquire().await.unwrap();
        sessions.release(session).await;
        assert_eq!(sessions.status().await, SessionStatus::Active);
        assert_eq!(launcher.launch_count(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_before_launch_is_noop() {
        let launcher = Arc::new(FakeLauncher::new(FakeSite::new()));
        let sessions = manager(Arc::clone(&launcher), 1);

        sessions.shutdown().await.unwrap();
        assert_eq!(sessions.status().await, SessionStatus::Uninitialized);
        assert_eq!(launcher.browsers_closed(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_launches_once() {
        let launcher = Arc::new(
            FakeLauncher::new(FakeSite::new()).launch_delay(Duration::from_millis(50)),
        );
        let sessions = Arc::new(manager(Arc::clone(&launcher), 4));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let sessions = Arc::clone(&sessions);
            handles.push(tokio::spawn(async move {
                let session = sessions.acquire().await.unwrap();
                sessions.release(session).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(launcher.launch_count(), 1);
        assert_eq!(launcher.pages_opened(), 4);
    }

    #[tokio::test]
    async fn test_pool_exhaustion_times_out() {
        let launcher = Arc::new(FakeLauncher::new(FakeSite::new()));
        let sessions = manager(Arc::clone(&launcher), 1);

        let held = sessions.acquire().await.unwrap();
        let err = sessions.acquire().await.err().unwrap();
        assert!(matches!(err, BrowserError::PoolExhausted(_)));

        sessions.release(held).await;
        let session = sessions.acquire().await.unwrap();
        sessions.release(session).await;
    }

    #[tokio::test]
    async fn test_dropped_session_closes_page() {
        let launcher = Arc::new(FakeLauncher::new(FakeSite::new()));
        let sessions = manager(Arc::clone(&launcher), 1);

        let session = sessions.acquire().await.unwrap();
        drop(session);
        assert_eq!(sessions.available_pages(), 1);

        for _ in 0..50 {
            if launcher.pages_closed() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(launcher.pages_closed(), 1);
    }

    #[tokio::test]
    async fn test_dead_browser_is_replaced() {
        let launcher = Arc::new(FakeLauncher::new(FakeSite::new()));
        let sessions = manager(Arc::clone(&launcher), 1);

        sessions.warm_up().await.unwrap();
        launcher.kill_browsers();

        let session = sessions.acquire().await.unwrap();
        sessions.release(session).await;
        assert_eq!(launcher.launch_count(), 2);
    }
}

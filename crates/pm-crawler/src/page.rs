//! Scoped page access

use std::future::Future;
use std::sync::Arc;

use pm_browser::{PageDriver, SessionManager};
use tracing::debug;

use crate::error::Result;

/// Acquire a page, load `url`, run `work` and release the page.
///
/// The page is released on every path, including navigation failures and
/// errors returned by `work`.
pub async fn with_page<T, F, Fut>(sessions: &SessionManager, url: &str, work: F) -> Result<T>
where
    F: FnOnce(Arc<dyn PageDriver>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let session = sessions.acquire().await?;
    let page = session.page();

    debug!("Navigating to {}", url);
    let outcome = match page.navigate(url).await {
        Ok(()) => work(page).await,
        Err(e) => Err(e.into()),
    };

    sessions.release(session).await;
    outcome
}

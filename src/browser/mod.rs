//! Native browser management using `chromiumoxide`.
//!
//! One [`BrowserHandle`] per run: launch, CDP event pump, graceful close.
//! All page interaction helpers (JS evaluation, polling, humanized sleeps)
//! live in [`page`].

pub mod launcher;
pub mod page;

use anyhow::{anyhow, Result};
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub use launcher::{build_browser_config, find_chrome_executable};

/// A launched browser plus its CDP handler task.
pub struct BrowserHandle {
    browser: Option<Browser>,
    handler_task: Option<JoinHandle<()>>,
}

impl BrowserHandle {
    /// Launch a browser. `profile_dir` is the per-account user-data
    /// directory; passing it keeps the site's device fingerprint stable
    /// across runs.
    pub async fn launch(headless: bool, profile_dir: Option<&std::path::Path>) -> Result<Self> {
        let exe = find_chrome_executable().ok_or_else(|| {
            anyhow!("No browser found. Install Chrome or Chromium, or set CHROME_EXECUTABLE.")
        })?;

        info!(
            "🚀 launching browser ({}, {})",
            exe,
            if headless { "headless" } else { "headed" }
        );

        let config = launcher::build_browser_config(&exe, headless, profile_dir)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| anyhow!("Failed to launch browser ({}): {}", exe, e))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("CDP handler error: {}", e);
                }
            }
        });

        Ok(Self {
            browser: Some(browser),
            handler_task: Some(handler_task),
        })
    }

    pub async fn new_page(&self, url: &str) -> Result<Page> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| anyhow!("browser already closed"))?;
        browser
            .new_page(url)
            .await
            .map_err(|e| anyhow!("Failed to open page {}: {}", url, e))
    }

    /// Gracefully close the browser and stop the CDP pump.
    pub async fn close(&mut self) {
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                warn!("Browser close error (non-fatal): {}", e);
            }
        }
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
        info!("🛑 browser closed");
    }
}

impl Drop for BrowserHandle {
    fn drop(&mut self) {
        // Drop cannot await; if we're inside a tokio runtime, spawn a task to
        // close the browser to avoid zombie Chromium processes.
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
        let Some(mut browser) = self.browser.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        handle.spawn(async move {
            let _ = browser.close().await;
        });
    }
}

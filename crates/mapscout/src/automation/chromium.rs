// Copyright 2026 Mapscout Contributors
// SPDX-License-Identifier: Apache-2.0

//! Chromium backend using chromiumoxide.
//!
//! One browser process and one page per session. The CDP handler runs on
//! whichever runtime called [`ChromiumLauncher::launch`], which for sessions
//! is the session's own worker runtime.

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::element::Element as CdpElement;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Automation, AutomationLauncher, Element};
use crate::config::LaunchOptions;
use crate::error::{AutomationError, AutomationResult};

const VISIBLE_JS: &str = "function() { \
    const r = this.getBoundingClientRect(); \
    return !!(this.offsetParent !== null || r.width > 0 || r.height > 0); }";
const PARENT_TEXT_JS: &str =
    "function() { return this.parentElement ? (this.parentElement.innerText || '') : ''; }";
const SCROLL_TO_END_JS: &str = "function() { this.scrollTop = this.scrollHeight; }";
const SCROLL_PAGE_JS: &str = "window.scrollTo(0, document.body.scrollHeight);";

/// Executable names looked up on `PATH`, in order.
const PATH_NAMES: [&str; 3] = ["google-chrome", "chromium", "chromium-browser"];

/// Find a Chromium binary.
///
/// Checks `MAPSCOUT_CHROME_PATH`, then `~/.mapscout/chromium/chrome`, then `PATH`.
pub fn find_chromium() -> Option<PathBuf> {
    let from_env = std::env::var_os("MAPSCOUT_CHROME_PATH").map(PathBuf::from);
    locate_chromium(from_env, dirs::home_dir())
        .or_else(|| PATH_NAMES.iter().find_map(|name| which::which(name).ok()))
}

fn locate_chromium(from_env: Option<PathBuf>, home: Option<PathBuf>) -> Option<PathBuf> {
    let installed = home.map(|home| home.join(".mapscout").join("chromium").join("chrome"));
    [from_env, installed].into_iter().flatten().find(|path| path.exists())
}

/// Launches a fresh Chromium per session.
pub struct ChromiumLauncher {
    options: LaunchOptions,
    release_timeout: Duration,
}

impl ChromiumLauncher {
    pub fn new(options: LaunchOptions) -> Self {
        Self {
            options,
            release_timeout: Duration::from_secs(5),
        }
    }

    /// Bound on a graceful browser close before the process is killed.
    pub fn with_release_timeout(mut self, timeout: Duration) -> Self {
        self.release_timeout = timeout;
        self
    }

    fn browser_config(&self, headless: bool) -> AutomationResult<BrowserConfig> {
        let executable = self
            .options
            .executable
            .clone()
            .or_else(find_chromium)
            .ok_or_else(|| AutomationError::Launch("no Chromium executable found".to_string()))?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(executable)
            .args(self.options.args());
        builder = if headless {
            builder.new_headless_mode()
        } else {
            builder.with_head()
        };
        builder.build().map_err(AutomationError::Launch)
    }
}

#[async_trait]
impl AutomationLauncher for ChromiumLauncher {
    async fn launch(&self, headless: bool) -> AutomationResult<Arc<dyn Automation>> {
        let config = self.browser_config(headless)?;
        info!(headless, "launching Chromium");

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AutomationError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler_task.abort();
                return Err(AutomationError::Launch(format!("failed to open page: {e}")));
            }
        };

        Ok(Arc::new(ChromiumAutomation {
            browser: Mutex::new(Some(browser)),
            page,
            handler_task: StdMutex::new(Some(handler_task)),
            release_timeout: self.release_timeout,
        }))
    }
}

/// A Chromium page owned by one session.
pub struct ChromiumAutomation {
    browser: Mutex<Option<Browser>>,
    page: Page,
    handler_task: StdMutex<Option<JoinHandle<()>>>,
    release_timeout: Duration,
}

fn wrap(elements: Vec<CdpElement>) -> Vec<Box<dyn Element>> {
    elements
        .into_iter()
        .map(|inner| Box::new(ChromiumElement { inner }) as Box<dyn Element>)
        .collect()
}

#[async_trait]
impl Automation for ChromiumAutomation {
    async fn navigate(&self, url: &str) -> AutomationResult<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| AutomationError::Navigation(e.to_string()))?;
        if let Err(e) = self.page.wait_for_navigation().await {
            debug!(error = %e, "navigation did not settle");
        }
        Ok(())
    }

    async fn find_elements(&self, selector: &str) -> AutomationResult<Vec<Box<dyn Element>>> {
        match self.page.find_elements(selector).await {
            Ok(elements) => Ok(wrap(elements)),
            Err(e) => Err(AutomationError::Query(format!("{selector}: {e}"))),
        }
    }

    async fn current_url(&self) -> AutomationResult<String> {
        let url = self
            .page
            .url()
            .await
            .map_err(|e| AutomationError::Query(e.to_string()))?;
        Ok(url.map(|u| u.to_string()).unwrap_or_default())
    }

    async fn scroll_page_to_end(&self) -> AutomationResult<()> {
        self.page
            .evaluate(SCROLL_PAGE_JS)
            .await
            .map_err(|e| AutomationError::Interaction(e.to_string()))?;
        Ok(())
    }

    async fn capture_snapshot(&self) -> AutomationResult<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        self.page
            .screenshot(params)
            .await
            .map_err(|e| AutomationError::Snapshot(e.to_string()))
    }

    async fn release(&self) -> AutomationResult<()> {
        let Some(mut browser) = self.browser.lock().await.take() else {
            return Err(AutomationError::Released);
        };

        match tokio::time::timeout(self.release_timeout, browser.close()).await {
            Ok(Ok(_)) => info!("Chromium closed"),
            Ok(Err(e)) => warn!(error = %e, "failed to close Chromium gracefully"),
            Err(_) => warn!("Chromium close timed out"),
        }
        if let Some(Err(e)) = browser.kill().await {
            debug!(error = %e, "Chromium process kill reported error");
        }

        let task = self
            .handler_task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
        Ok(())
    }
}

struct ChromiumElement {
    inner: CdpElement,
}

impl ChromiumElement {
    async fn call(&self, function: &str) -> AutomationResult<Option<serde_json::Value>> {
        let returns = self
            .inner
            .call_js_fn(function, false)
            .await
            .map_err(|e| AutomationError::Query(e.to_string()))?;
        Ok(returns.result.value)
    }
}

#[async_trait]
impl Element for ChromiumElement {
    async fn find_elements(&self, selector: &str) -> AutomationResult<Vec<Box<dyn Element>>> {
        match self.inner.find_elements(selector).await {
            Ok(elements) => Ok(wrap(elements)),
            Err(e) => Err(AutomationError::Query(format!("{selector}: {e}"))),
        }
    }

    async fn text(&self) -> AutomationResult<String> {
        let text = self
            .inner
            .inner_text()
            .await
            .map_err(|e| AutomationError::Query(e.to_string()))?;
        Ok(text.unwrap_or_default())
    }

    async fn attribute(&self, name: &str) -> AutomationResult<Option<String>> {
        self.inner
            .attribute(name)
            .await
            .map_err(|e| AutomationError::Query(e.to_string()))
    }

    async fn parent_text(&self) -> AutomationResult<String> {
        let value = self.call(PARENT_TEXT_JS).await?;
        Ok(value
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default())
    }

    async fn is_visible(&self) -> AutomationResult<bool> {
        let value = self.call(VISIBLE_JS).await?;
        Ok(value.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    async fn click(&self) -> AutomationResult<()> {
        self.inner
            .click()
            .await
            .map_err(|e| AutomationError::Interaction(e.to_string()))?;
        Ok(())
    }

    async fn scroll_into_view(&self) -> AutomationResult<()> {
        self.inner
            .scroll_into_view()
            .await
            .map_err(|e| AutomationError::Interaction(e.to_string()))?;
        Ok(())
    }

    async fn scroll_to_end(&self) -> AutomationResult<()> {
        self.call(SCROLL_TO_END_JS).await?;
        Ok(())
    }
}

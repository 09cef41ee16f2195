// Copyright 2026 Mapscout Contributors
// SPDX-License-Identifier: Apache-2.0

//! Automation port: the browser capabilities the scraper relies on.
//!
//! Sessions only ever talk to a browser through these traits. The
//! [`chromium`] backend drives a real browser over CDP; the [`memory`]
//! backend serves a scripted results page for tests and offline runs.

pub mod chromium;
pub mod memory;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::AutomationResult;

/// Produces one exclusively owned automation handle per session.
#[async_trait]
pub trait AutomationLauncher: Send + Sync {
    /// Start a browser. Called from the session's own worker runtime.
    async fn launch(&self, headless: bool) -> AutomationResult<Arc<dyn Automation>>;
}

/// A live browser page.
#[async_trait]
pub trait Automation: Send + Sync {
    /// Load `url` in the page.
    async fn navigate(&self, url: &str) -> AutomationResult<()>;
    /// All elements in the document matching a CSS selector, in document order.
    async fn find_elements(&self, selector: &str) -> AutomationResult<Vec<Box<dyn Element>>>;
    /// URL the page currently shows.
    async fn current_url(&self) -> AutomationResult<String>;
    /// Scroll the whole window to the bottom.
    async fn scroll_page_to_end(&self) -> AutomationResult<()>;
    /// PNG of the current viewport.
    async fn capture_snapshot(&self) -> AutomationResult<Vec<u8>>;
    /// Tear the browser down. Callers guarantee this runs at most once.
    async fn release(&self) -> AutomationResult<()>;
}

/// A handle to one DOM element.
#[async_trait]
pub trait Element: Send + Sync {
    /// Descendants matching a CSS selector, in document order.
    async fn find_elements(&self, selector: &str) -> AutomationResult<Vec<Box<dyn Element>>>;
    /// Rendered text of the element.
    async fn text(&self) -> AutomationResult<String>;
    async fn attribute(&self, name: &str) -> AutomationResult<Option<String>>;
    /// Rendered text of the immediate parent element.
    async fn parent_text(&self) -> AutomationResult<String>;
    /// Whether the element currently takes up space on screen.
    async fn is_visible(&self) -> AutomationResult<bool>;
    async fn click(&self) -> AutomationResult<()>;
    async fn scroll_into_view(&self) -> AutomationResult<()>;
    /// Scroll this element's own content to the bottom.
    async fn scroll_to_end(&self) -> AutomationResult<()>;
}

/// Poll `predicate` every `interval` until it holds or `timeout` elapses.
///
/// The predicate is always evaluated at least once. Returns whether it held.
pub async fn wait_until<F, Fut>(timeout: Duration, interval: Duration, mut predicate: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if predicate().await {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_wait_until_returns_early() {
        let polls = AtomicUsize::new(0);
        let held = wait_until(Duration::from_secs(5), Duration::from_millis(1), || {
            let n = polls.fetch_add(1, Ordering::SeqCst);
            async move { n >= 2 }
        })
        .await;
        assert!(held);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_until_times_out() {
        let started = std::time::Instant::now();
        let held = wait_until(Duration::from_millis(30), Duration::from_millis(5), || async {
            false
        })
        .await;
        assert!(!held);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_wait_until_zero_timeout_checks_once() {
        let polls = AtomicUsize::new(0);
        let held = wait_until(Duration::ZERO, Duration::from_millis(10), || {
            polls.fetch_add(1, Ordering::SeqCst);
            async { false }
        })
        .await;
        assert!(!held);
        assert_eq!(polls.load(Ordering::SeqCst), 1);
    }
}

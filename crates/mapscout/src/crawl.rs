// Copyright 2026 Mapscout Contributors
// SPDX-License-Identifier: Apache-2.0

//! Crawl loop: scroll, discover, dedup, extract.
//!
//! Runs entirely on the session's worker. The only state shared with other
//! threads is the running flag, sampled at the top of every iteration and
//! before every item, and the processed-count gauge.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::automation::{wait_until, Automation, Element};
use crate::bridge::EventBridge;
use crate::config::ScraperConfig;
use crate::error::AutomationResult;
use crate::events::Event;
use crate::extraction::{self, selectors};

/// Longest error excerpt shown to the user for a failed item.
const ITEM_ERROR_EXCERPT: usize = 50;

// ── Processed set ───────────────────────────────────────────────────────────

/// Listing URLs a session has already handled. Only ever grows.
#[derive(Debug, Default, Clone)]
pub struct ProcessedSet {
    urls: HashSet<String>,
}

impl ProcessedSet {
    pub fn seeded<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    /// Returns `false` if the URL was already present.
    pub fn insert(&mut self, url: impl Into<String>) -> bool {
        self.urls.insert(url.into())
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

// ── Stall tracking ──────────────────────────────────────────────────────────

/// Counts consecutive scrolls that rendered nothing new.
#[derive(Debug, Clone)]
pub struct StallTracker {
    consecutive: u32,
    limit: u32,
}

impl StallTracker {
    pub fn new(limit: u32) -> Self {
        Self {
            consecutive: 0,
            limit,
        }
    }

    /// Record one scroll attempt. Returns `true` once the limit is exceeded.
    pub fn record(&mut self, grew: bool) -> bool {
        if grew {
            self.consecutive = 0;
            false
        } else {
            self.consecutive += 1;
            self.consecutive > self.limit
        }
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

// ── Pacing ──────────────────────────────────────────────────────────────────

/// Randomized pause between items.
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    min: Duration,
    max: Duration,
}

impl Pacer {
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn next_delay(&self) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    pub async fn pause(&self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

// ── Loop ────────────────────────────────────────────────────────────────────

/// Why the crawl loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlExit {
    /// The stall limit was exceeded: the list has no more entries.
    Exhausted,
    /// The running flag was cleared.
    Stopped,
}

/// Wait up to `feed_timeout` for the scrollable results container.
pub async fn locate_feed(
    automation: &dyn Automation,
    config: &ScraperConfig,
) -> Option<Box<dyn Element>> {
    let present = wait_until(config.feed_timeout, config.poll_interval, move || async move {
        automation
            .find_elements(selectors::FEED)
            .await
            .map(|found| !found.is_empty())
            .unwrap_or(false)
    })
    .await;
    if !present {
        return None;
    }
    automation
        .find_elements(selectors::FEED)
        .await
        .ok()
        .and_then(|found| found.into_iter().next())
}

/// One session's crawl over a loaded results page.
pub struct Crawl<'a> {
    automation: &'a dyn Automation,
    config: &'a ScraperConfig,
    events: &'a EventBridge,
    running: &'a AtomicBool,
    processed_gauge: &'a AtomicUsize,
    feed: Option<Box<dyn Element>>,
    processed: ProcessedSet,
    stalls: StallTracker,
    pacer: Pacer,
}

impl<'a> Crawl<'a> {
    pub fn new(
        automation: &'a dyn Automation,
        config: &'a ScraperConfig,
        events: &'a EventBridge,
        running: &'a AtomicBool,
        processed_gauge: &'a AtomicUsize,
        processed: ProcessedSet,
    ) -> Self {
        processed_gauge.store(processed.len(), Ordering::SeqCst);
        Self {
            automation,
            config,
            events,
            running,
            processed_gauge,
            feed: None,
            processed,
            stalls: StallTracker::new(config.stall_limit),
            pacer: Pacer::new(config.pacing_min, config.pacing_max),
        }
    }

    /// Scroll this container instead of the window.
    pub fn with_feed(mut self, feed: Option<Box<dyn Element>>) -> Self {
        self.feed = feed;
        self
    }

    pub fn processed(&self) -> &ProcessedSet {
        &self.processed
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run until the list is exhausted or the session is stopped.
    ///
    /// Per-item failures are reported and skipped; only failures to query
    /// or scroll the results list itself are returned.
    pub async fn run(&mut self) -> AutomationResult<CrawlExit> {
        while self.is_running() {
            let candidates = self.automation.find_elements(selectors::CANDIDATE_LINKS).await?;
            let rendered = candidates.len();

            let mut fresh = Vec::new();
            for candidate in candidates {
                match candidate.attribute("href").await {
                    Ok(Some(href)) if !self.processed.contains(&href) => {
                        fresh.push((candidate, href));
                    }
                    Ok(_) => {}
                    Err(e) => debug!(error = %e, "candidate href unreadable"),
                }
            }

            if fresh.is_empty() {
                let grew = self.scroll_to_load(rendered).await?;
                if self.stalls.record(grew) {
                    info!(processed = self.processed.len(), "results list exhausted");
                    self.events.log("> End of list reached or no new items found.");
                    return Ok(CrawlExit::Exhausted);
                }
                continue;
            }

            self.stalls.reset();
            for (candidate, href) in fresh {
                if !self.is_running() {
                    break;
                }
                // Mark before extracting so a resumed run never repeats a
                // listing, even one that failed or was interrupted.
                if !self.processed.insert(href.as_str()) {
                    continue;
                }
                self.processed_gauge
                    .store(self.processed.len(), Ordering::SeqCst);
                self.process_item(candidate.as_ref(), &href).await;
            }
        }
        Ok(CrawlExit::Stopped)
    }

    async fn process_item(&self, candidate: &dyn Element, href: &str) {
        if extraction::is_sponsored(candidate).await {
            debug!(url = %href, "skipping sponsored listing");
            self.events.log("Skipping Sponsored result");
            return;
        }

        if let Err(e) = extraction::activate(self.automation, candidate, self.config).await {
            if !self.is_running() {
                debug!(url = %href, error = %e, "activation interrupted by stop");
                return;
            }
            warn!(url = %href, error = %e, "failed to open listing");
            let excerpt: String = e.to_string().chars().take(ITEM_ERROR_EXCERPT).collect();
            self.events.log(format!("Error processing item: {excerpt}"));
            return;
        }
        self.snapshot().await;

        let record = extraction::extract_record(self.automation, self.config, Some(href)).await;
        if !self.is_running() {
            // Probes may have run against a released browser.
            debug!(url = %href, "stopped during extraction, record discarded");
            return;
        }
        info!(name = %record.name, url = %href, "listing extracted");
        let line = format!("Extracted: {}", record.name);
        self.events.emit(Event::Row(record));
        self.events.log(line);

        self.pacer.pause().await;
    }

    /// Scroll for more results and report whether the candidate count grew.
    async fn scroll_to_load(&self, rendered: usize) -> AutomationResult<bool> {
        self.events.log("> Scrolling to find new items...");
        let scrolled = match &self.feed {
            Some(feed) => feed.scroll_to_end().await,
            None => self.automation.scroll_page_to_end().await,
        };
        if let Err(e) = scrolled {
            debug!(error = %e, "feed scroll failed, scrolling window");
            self.automation.scroll_page_to_end().await?;
        }

        let automation = self.automation;
        let grew = wait_until(
            self.config.probe_timeout,
            self.config.poll_interval,
            move || async move {
                automation
                    .find_elements(selectors::CANDIDATE_LINKS)
                    .await
                    .map(|found| found.len() > rendered)
                    .unwrap_or(false)
            },
        )
        .await;
        if !grew && !self.config.scroll_settle.is_zero() {
            tokio::time::sleep(self.config.scroll_settle).await;
        }

        self.snapshot().await;
        Ok(grew)
    }

    /// Push a live preview while the session is running. Failures are ignored.
    pub async fn snapshot(&self) {
        if !self.is_running() {
            return;
        }
        match self.automation.capture_snapshot().await {
            Ok(png) => self.events.emit(Event::Snapshot(png)),
            Err(e) => debug!(error = %e, "snapshot failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processed_set_seed_and_insert() {
        let mut set = ProcessedSet::seeded(["u1", "u2"]);
        assert_eq!(set.len(), 2);
        assert!(set.contains("u1"));
        assert!(!set.insert("u1"));
        assert!(set.insert("u3"));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_fifth_stall_exceeds_limit() {
        let mut stalls = StallTracker::new(4);
        for _ in 0..4 {
            assert!(!stalls.record(false));
        }
        assert!(stalls.record(false));
    }

    #[test]
    fn test_growth_resets_stalls() {
        let mut stalls = StallTracker::new(4);
        for _ in 0..4 {
            stalls.record(false);
        }
        assert!(!stalls.record(true));
        assert_eq!(stalls.consecutive(), 0);
        assert!(!stalls.record(false));
    }

    #[test]
    fn test_pacer_stays_in_bounds() {
        let pacer = Pacer::new(Duration::from_millis(500), Duration::from_millis(1000));
        for _ in 0..200 {
            let delay = pacer.next_delay();
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(1000));
        }
        let fixed = Pacer::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(fixed.next_delay(), Duration::ZERO);
    }
}

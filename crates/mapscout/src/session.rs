// Copyright 2026 Mapscout Contributors
// SPDX-License-Identifier: Apache-2.0

//! Session orchestrator.
//!
//! A session owns one automation handle and runs one crawl on a dedicated
//! OS thread with its own current-thread runtime, so a slow or wedged
//! browser never holds up the server. The thread is the only writer of
//! crawl state; other threads only touch the running flag and the
//! once-only terminal and release guards.
//!
//! Everything the worker says goes through a bridge gated on the terminal
//! events. Once `Status(STOPPED)` has gone out, a worker that outlived its
//! `stop()` can no longer reach the connection.
//!
//! Lifecycle: `Created → Starting → Running → Stopped`. Sessions are
//! single-use; a new job gets a new session.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::automation::{Automation, AutomationLauncher};
use crate::bridge::{EventBridge, Gate};
use crate::config::ScraperConfig;
use crate::crawl::{self, Crawl, CrawlExit, ProcessedSet};
use crate::error::SessionError;
use crate::events::{Event, SessionStatus};
use crate::protocol::JobParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Starting,
    Running,
    Stopped,
}

/// Build the results URL for `keyword` under `base`.
pub fn search_url(base: &str, keyword: &str) -> Result<Url, SessionError> {
    let mut url = Url::parse(base)?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?;
        segments.pop_if_empty().push(keyword.trim());
    }
    Ok(url)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds the automation handle; hands it out for release exactly once.
#[derive(Default)]
struct HandleSlot {
    inner: Mutex<(Option<Arc<dyn Automation>>, bool)>,
}

impl HandleSlot {
    /// Store a freshly launched handle. Gives it back if the slot was
    /// already closed by a release.
    fn install(&self, handle: Arc<dyn Automation>) -> Result<(), Arc<dyn Automation>> {
        let mut slot = lock(&self.inner);
        if slot.1 {
            return Err(handle);
        }
        slot.0 = Some(handle);
        Ok(())
    }

    /// Close the slot and take the handle, if any. Later calls get `None`.
    fn take(&self) -> Option<Arc<dyn Automation>> {
        let mut slot = lock(&self.inner);
        slot.1 = true;
        slot.0.take()
    }
}

struct Worker {
    thread: JoinHandle<()>,
    done: oneshot::Receiver<()>,
}

struct Inner {
    id: Uuid,
    params: JobParams,
    config: Arc<ScraperConfig>,
    launcher: Arc<dyn AutomationLauncher>,
    /// Ungated; only the terminal pair goes through it.
    events: EventBridge,
    /// The worker's voice, silenced by the terminal pair.
    output: EventBridge,
    terminal: Gate,
    state: Mutex<SessionState>,
    running: AtomicBool,
    processed: AtomicUsize,
    handle: HandleSlot,
}

/// One scraping job bound to one connection.
pub struct Session {
    inner: Arc<Inner>,
    worker: Mutex<Option<Worker>>,
}

impl Session {
    pub fn new(
        params: JobParams,
        config: Arc<ScraperConfig>,
        launcher: Arc<dyn AutomationLauncher>,
        events: EventBridge,
    ) -> Self {
        let processed = params.ignore_urls.len();
        let terminal = Gate::default();
        let output = events.gated(&terminal);
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                params,
                config,
                launcher,
                events,
                output,
                terminal,
                state: Mutex::new(SessionState::Created),
                running: AtomicBool::new(false),
                processed: AtomicUsize::new(processed),
                handle: HandleSlot::default(),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn params(&self) -> &JobParams {
        &self.inner.params
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.inner.state)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Size of the processed set, exclusion list included.
    pub fn processed_count(&self) -> usize {
        self.inner.processed.load(Ordering::SeqCst)
    }

    /// Launch the worker thread and return without waiting for it.
    ///
    /// Only a `Created` session starts; anything else is a no-op.
    pub fn start(&self) -> Result<(), SessionError> {
        {
            let mut state = lock(&self.inner.state);
            match *state {
                SessionState::Created => *state = SessionState::Starting,
                SessionState::Starting | SessionState::Running => return Ok(()),
                SessionState::Stopped => {
                    warn!(session = %self.inner.id, "start on a finished session ignored");
                    return Ok(());
                }
            }
        }
        self.inner.running.store(true, Ordering::SeqCst);
        info!(
            session = %self.inner.id,
            keyword = %self.inner.params.keyword,
            headless = self.inner.params.headless,
            ignored = self.inner.params.ignore_urls.len(),
            "starting session"
        );

        let (done_tx, done_rx) = oneshot::channel();
        let inner = self.inner.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("scrape-{}", &self.inner.id.simple().to_string()[..8]))
            .spawn(move || {
                inner.work();
                let _ = done_tx.send(());
            });

        match spawned {
            Ok(thread) => {
                *lock(&self.worker) = Some(Worker {
                    thread,
                    done: done_rx,
                });
                Ok(())
            }
            Err(e) => {
                error!(session = %self.inner.id, error = %e, "failed to spawn worker");
                self.inner.output.log(format!("Worker error: {e}"));
                self.inner.finish_once();
                Err(SessionError::Spawn(e))
            }
        }
    }

    /// Stop the session and release its browser.
    ///
    /// Waits up to `join_timeout` for the worker, then releases the handle
    /// whether or not it finished. Safe to call any number of times: the
    /// handle is released once and the terminal events are sent once.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);

        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            match tokio::time::timeout(self.inner.config.join_timeout, worker.done).await {
                Ok(_) => {
                    let joined = tokio::task::spawn_blocking(move || worker.thread.join()).await;
                    if !matches!(joined, Ok(Ok(()))) {
                        debug!(session = %self.inner.id, "worker thread did not join cleanly");
                    }
                }
                Err(_) => warn!(
                    session = %self.inner.id,
                    timeout_ms = self.inner.config.join_timeout.as_millis() as u64,
                    "worker did not finish in time, forcing release"
                ),
            }
        }

        self.inner.release_handle().await;
        self.inner.finish_once();
    }
}

impl Inner {
    fn set_state(&self, next: SessionState) {
        let mut state = lock(&self.state);
        if *state != SessionState::Stopped {
            *state = next;
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Worker thread entry point.
    fn work(self: Arc<Self>) {
        match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime.block_on(self.run()),
            Err(e) => {
                error!(session = %self.id, error = %e, "failed to build worker runtime");
                self.output.log(format!("Worker error: {e}"));
                self.finish_once();
            }
        }
    }

    async fn run(&self) {
        let outcome = AssertUnwindSafe(self.run_body()).catch_unwind().await;
        match outcome {
            Ok(Ok(exit)) => info!(session = %self.id, ?exit, "crawl finished"),
            Ok(Err(e)) => {
                warn!(session = %self.id, error = %e, "session failed");
                self.output.log(format!("Worker error: {e}"));
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(session = %self.id, panic = %message, "session worker panicked");
                self.output.log(format!("Worker error: {message}"));
            }
        }

        self.release_handle().await;
        self.finish_once();
    }

    async fn run_body(&self) -> Result<CrawlExit, SessionError> {
        let events = &self.output;
        events.log("> [System] Launching browser...");
        let automation = self.launcher.launch(self.params.headless).await?;
        if let Err(orphan) = self.handle.install(automation.clone()) {
            // Stopped while launching; nobody else will release this one.
            debug!(session = %self.id, "released during launch");
            self.release(orphan).await;
            return Ok(CrawlExit::Stopped);
        }
        self.set_state(SessionState::Running);
        events.log("Browser initialized.");
        if !self.is_running() {
            return Ok(CrawlExit::Stopped);
        }

        let url = search_url(&self.config.search_base_url, &self.params.keyword)?;
        info!(session = %self.id, url = %url, "navigating");
        events.log(format!("> Navigating: {url}"));
        automation.navigate(url.as_str()).await?;

        let feed = crawl::locate_feed(automation.as_ref(), &self.config).await;
        if feed.is_some() {
            events.log("> Feed loaded.");
        } else {
            warn!(session = %self.id, "results feed not found, scrolling the page instead");
            events.log("Feed container not detected. Using fallback scroll.");
        }

        let processed = ProcessedSet::seeded(self.params.ignore_urls.iter().cloned());
        if !processed.is_empty() {
            events.log(format!(
                "> Resuming... Ignoring {} processed items.",
                processed.len()
            ));
        }

        let mut crawl = Crawl::new(
            automation.as_ref(),
            &self.config,
            events,
            &self.running,
            &self.processed,
            processed,
        )
        .with_feed(feed);
        crawl.snapshot().await;
        Ok(crawl.run().await?)
    }

    async fn release_handle(&self) {
        if let Some(handle) = self.handle.take() {
            self.release(handle).await;
        }
    }

    async fn release(&self, handle: Arc<dyn Automation>) {
        match tokio::time::timeout(self.config.release_timeout, handle.release()).await {
            Ok(Ok(())) => info!(session = %self.id, "browser released"),
            Ok(Err(e)) => warn!(session = %self.id, error = %e, "browser release failed"),
            Err(_) => warn!(session = %self.id, "browser release timed out"),
        }
    }

    /// Send the terminal status and log, once per session, and silence
    /// the worker for good.
    fn finish_once(&self) {
        self.running.store(false, Ordering::SeqCst);
        *lock(&self.state) = SessionState::Stopped;
        let last = [
            Event::Status(SessionStatus::Stopped),
            Event::log("Scraper stopped."),
        ];
        if !self.terminal.close_with(&self.events, last) {
            return;
        }
        info!(session = %self.id, processed = self.processed.load(Ordering::SeqCst), "session stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::memory::{sample_catalogue, MemoryLauncher};

    #[test]
    fn test_search_url_appends_keyword() {
        let url = search_url("https://www.google.com/maps/search/", "coffee shops").unwrap();
        assert_eq!(url.as_str(), "https://www.google.com/maps/search/coffee%20shops");

        let url = search_url("https://www.google.com/maps/search", "tacos").unwrap();
        assert_eq!(url.as_str(), "https://www.google.com/maps/search/tacos");
    }

    #[test]
    fn test_search_url_escapes_path_characters() {
        let url = search_url("https://www.google.com/maps/search/", "a/b?c").unwrap();
        assert_eq!(url.path(), "/maps/search/a%2Fb%3Fc");
        assert!(url.query().is_none());
    }

    #[test]
    fn test_search_url_rejects_bad_base() {
        assert!(search_url("not a url", "x").is_err());
        assert!(search_url("mailto:someone@example.com", "x").is_err());
    }

    #[test]
    fn test_handle_slot_releases_once() {
        let slot = HandleSlot::default();
        let launcher = MemoryLauncher::new(Vec::new());
        let handle = tokio_test::block_on(launcher.launch(true)).unwrap();

        assert!(slot.install(handle.clone()).is_ok());
        assert!(slot.take().is_some());
        assert!(slot.take().is_none());
        assert!(slot.install(handle).is_err());
    }

    #[tokio::test]
    async fn test_stop_before_start_emits_terminal_once() {
        let (bridge, mut stream) = EventBridge::channel();
        let launcher = Arc::new(MemoryLauncher::new(sample_catalogue(1)));
        let session = Session::new(
            JobParams::new("tea", true),
            Arc::new(ScraperConfig::default()),
            launcher.clone(),
            bridge,
        );

        session.stop().await;
        session.stop().await;

        assert_eq!(session.state(), SessionState::Stopped);
        let events = stream.drain();
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(events.last(), Some(&Event::log("Scraper stopped.")));
        assert_eq!(launcher.stats().launches(), 0);

        // A finished session never starts again.
        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(stream.drain().is_empty());
    }
}

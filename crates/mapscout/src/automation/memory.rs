// Copyright 2026 Mapscout Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-memory automation backend.
//!
//! Serves a scripted maps results page: a catalogue of listings rendered a
//! page at a time, growing on every scroll, with a detail pane that opens on
//! click. Used by the test suites and for running the server without a
//! browser. Every handle counts what was done to it so callers can check
//! resource ownership.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{Automation, AutomationLauncher, Element};
use crate::error::{AutomationError, AutomationResult};
use crate::extraction::selectors;

const PLACE_ORIGIN: &str = "https://www.google.com/maps/place/";

/// PNG signature; enough for anything that only forwards the bytes.
const SNAPSHOT_BYTES: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

/// How the detail pane renders a listing's website.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WebsiteShape {
    /// Authority link with an href and the bare host as text.
    #[default]
    Link,
    /// Authority control with text but no href.
    Text,
    /// Authority control whose text sits in a nested body node.
    Nested,
    /// Only a globe-icon button.
    Globe,
}

/// Which control carries an address or phone number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailShape {
    Icon,
    Item,
}

/// One listing on the scripted results page.
#[derive(Debug, Clone)]
pub struct ScriptedListing {
    pub slug: String,
    /// Detail heading. Empty means the heading never shows a usable name.
    pub name: String,
    /// Short visible rating text, e.g. `4,6`.
    pub rating: Option<String>,
    /// Accessibility label on the star widget, e.g. `4.6 stars`.
    pub rating_label: Option<String>,
    pub website: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub website_shape: WebsiteShape,
    pub address_shape: DetailShape,
    pub phone_shape: DetailShape,
    /// The detail heading is in the DOM but takes no space on screen.
    pub hidden_heading: bool,
    pub sponsored: bool,
    /// Clicking the listing fails.
    pub broken: bool,
}

impl Default for ScriptedListing {
    fn default() -> Self {
        Self {
            slug: String::new(),
            name: String::new(),
            rating: None,
            rating_label: None,
            website: None,
            address: None,
            phone: None,
            website_shape: WebsiteShape::default(),
            address_shape: DetailShape::Icon,
            phone_shape: DetailShape::Item,
            hidden_heading: false,
            sponsored: false,
            broken: false,
        }
    }
}

impl ScriptedListing {
    pub fn new(slug: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn rating(mut self, text: impl Into<String>) -> Self {
        self.rating = Some(text.into());
        self
    }

    pub fn rating_label(mut self, label: impl Into<String>) -> Self {
        self.rating_label = Some(label.into());
        self
    }

    pub fn website(mut self, url: impl Into<String>) -> Self {
        self.website = Some(url.into());
        self
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn website_as(mut self, shape: WebsiteShape) -> Self {
        self.website_shape = shape;
        self
    }

    pub fn address_as(mut self, shape: DetailShape) -> Self {
        self.address_shape = shape;
        self
    }

    pub fn phone_as(mut self, shape: DetailShape) -> Self {
        self.phone_shape = shape;
        self
    }

    pub fn hidden_heading(mut self) -> Self {
        self.hidden_heading = true;
        self
    }

    pub fn sponsored(mut self) -> Self {
        self.sponsored = true;
        self
    }

    pub fn broken(mut self) -> Self {
        self.broken = true;
        self
    }
}

/// `count` fully populated listings.
pub fn sample_catalogue(count: usize) -> Vec<ScriptedListing> {
    (0..count)
        .map(|i| {
            ScriptedListing::new(format!("place-{i}"), format!("Place {i}"))
                .rating(format!("4.{}", i % 10))
                .rating_label(format!("4.{} stars", i % 10))
                .website(format!("https://place-{i}.example.com/"))
                .address(format!("{i} Market Street"))
                .phone(format!("+1 555 01{:02}", i % 100))
        })
        .collect()
}

/// Listing URL the scripted page renders for `slug` under a search for `keyword`.
pub fn href_for(keyword: &str, slug: &str) -> String {
    format!("{PLACE_ORIGIN}{}+{slug}/", encode_segment(keyword))
}

fn encode_segment(raw: &str) -> String {
    match url::Url::parse(PLACE_ORIGIN) {
        Ok(mut url) => {
            if let Ok(mut segments) = url.path_segments_mut() {
                segments.clear().push(raw);
            }
            url.path().trim_start_matches('/').to_string()
        }
        Err(_) => raw.replace(' ', "%20"),
    }
}

/// Operation counters shared by every handle one launcher produces.
#[derive(Debug, Default)]
pub struct MemoryStats {
    launches: AtomicUsize,
    releases: AtomicUsize,
    navigations: AtomicUsize,
    clicks: AtomicUsize,
    scrolls: AtomicUsize,
    snapshots: AtomicUsize,
}

impl MemoryStats {
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> usize {
        self.navigations.load(Ordering::SeqCst)
    }

    pub fn clicks(&self) -> usize {
        self.clicks.load(Ordering::SeqCst)
    }

    pub fn scrolls(&self) -> usize {
        self.scrolls.load(Ordering::SeqCst)
    }

    pub fn snapshots(&self) -> usize {
        self.snapshots.load(Ordering::SeqCst)
    }
}

/// Launches handles onto a scripted results page.
#[derive(Debug, Clone)]
pub struct MemoryLauncher {
    catalogue: Arc<Vec<ScriptedListing>>,
    page_size: usize,
    has_feed: bool,
    launch_error: Option<String>,
    click_delay: Duration,
    pane_failures: Arc<AtomicUsize>,
    stats: Arc<MemoryStats>,
}

impl MemoryLauncher {
    pub fn new(catalogue: Vec<ScriptedListing>) -> Self {
        Self {
            catalogue: Arc::new(catalogue),
            page_size: 5,
            has_feed: true,
            launch_error: None,
            click_delay: Duration::ZERO,
            pane_failures: Arc::new(AtomicUsize::new(0)),
            stats: Arc::new(MemoryStats::default()),
        }
    }

    /// Listings rendered initially and added per scroll.
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Render the results without a scrollable feed container.
    pub fn without_feed(mut self) -> Self {
        self.has_feed = false;
        self
    }

    /// Make every launch fail with `message`.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.launch_error = Some(message.into());
        self
    }

    /// Delay every click, simulating a slow or hung page.
    pub fn click_delay(mut self, delay: Duration) -> Self {
        self.click_delay = delay;
        self
    }

    /// Fail the next `count` main-pane queries on every handle of this launcher.
    pub fn fail_pane_queries(&self, count: usize) {
        self.pane_failures.store(count, Ordering::SeqCst);
    }

    pub fn stats(&self) -> Arc<MemoryStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl AutomationLauncher for MemoryLauncher {
    async fn launch(&self, _headless: bool) -> AutomationResult<Arc<dyn Automation>> {
        self.stats.launches.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.launch_error {
            return Err(AutomationError::Launch(message.clone()));
        }
        Ok(Arc::new(MemoryAutomation {
            page: Arc::new(Page {
                catalogue: self.catalogue.clone(),
                page_size: self.page_size,
                has_feed: self.has_feed,
                click_delay: self.click_delay,
                pane_failures: self.pane_failures.clone(),
                stats: self.stats.clone(),
                state: Mutex::new(PageState::default()),
            }),
        }))
    }
}

#[derive(Debug, Default)]
struct PageState {
    url: String,
    term: String,
    rendered: usize,
    selected: Option<usize>,
    released: bool,
}

#[derive(Debug)]
struct Page {
    catalogue: Arc<Vec<ScriptedListing>>,
    page_size: usize,
    has_feed: bool,
    click_delay: Duration,
    pane_failures: Arc<AtomicUsize>,
    stats: Arc<MemoryStats>,
    state: Mutex<PageState>,
}

impl Page {
    fn state(&self) -> AutomationResult<MutexGuard<'_, PageState>> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.released {
            return Err(AutomationError::Released);
        }
        Ok(state)
    }

    fn href(&self, term: &str, index: usize) -> String {
        let slug = self
            .catalogue
            .get(index)
            .map(|l| l.slug.as_str())
            .unwrap_or_default();
        format!("{PLACE_ORIGIN}{term}+{slug}/")
    }

    fn grow(&self) -> AutomationResult<()> {
        let mut state = self.state()?;
        state.rendered = (state.rendered + self.page_size).min(self.catalogue.len());
        self.stats.scrolls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn nodes(self: &Arc<Self>, nodes: Vec<Node>) -> Vec<Box<dyn Element>> {
        nodes
            .into_iter()
            .map(|node| {
                Box::new(MemoryElement {
                    page: self.clone(),
                    node,
                }) as Box<dyn Element>
            })
            .collect()
    }

    fn query_document(&self, selector: &str) -> AutomationResult<Vec<Node>> {
        let state = self.state()?;
        let nodes = match selector {
            selectors::CANDIDATE_LINKS => (0..state.rendered).map(Node::Candidate).collect(),
            selectors::FEED if self.has_feed => vec![Node::Feed],
            selectors::MAIN_PANE => {
                let failing = self
                    .pane_failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if failing {
                    return Err(AutomationError::Query(format!("{selector}: node detached")));
                }
                let mut panes = vec![Node::Main(None)];
                panes.extend(state.selected.map(|i| Node::Main(Some(i))));
                panes
            }
            _ => match state.selected {
                Some(index) => self.query_detail(index, selector),
                None => Vec::new(),
            },
        };
        Ok(nodes)
    }

    fn query_detail(&self, index: usize, selector: &str) -> Vec<Node> {
        let Some(listing) = self.catalogue.get(index) else {
            return Vec::new();
        };
        let text = |value: &str| Node::Text {
            text: value.to_string(),
            href: None,
            aria: None,
            body: None,
        };
        let host = listing.website.as_deref().map(|url| {
            url.trim_start_matches("https://")
                .trim_end_matches('/')
                .to_string()
        });
        match selector {
            selectors::HEADING => vec![Node::Heading(index)],
            // A bare filter value precedes the real rating in render order.
            selectors::SHORT_TEXT => std::iter::once(text("5"))
                .chain(listing.rating.as_deref().map(text))
                .chain(std::iter::once(text(&listing.name)))
                .collect(),
            selectors::STAR_LABELS | selectors::IMG_ROLE => listing
                .rating_label
                .iter()
                .map(|label| Node::Text {
                    text: String::new(),
                    href: None,
                    aria: Some(label.clone()),
                    body: None,
                })
                .collect(),
            selectors::WEBSITE_ITEM => {
                let (Some(url), Some(host)) = (&listing.website, host) else {
                    return Vec::new();
                };
                let (text, href, body) = match listing.website_shape {
                    WebsiteShape::Link => (host, Some(url.clone()), None),
                    WebsiteShape::Text => (host, None, None),
                    WebsiteShape::Nested => (String::new(), None, Some(host)),
                    WebsiteShape::Globe => return Vec::new(),
                };
                vec![Node::Text {
                    text,
                    href,
                    aria: None,
                    body,
                }]
            }
            selectors::WEBSITE_GLOBE if listing.website_shape == WebsiteShape::Globe => {
                host.as_deref().map(text).into_iter().collect()
            }
            selectors::ADDRESS_BY_ICON if listing.address_shape == DetailShape::Icon => {
                listing.address.as_deref().map(text).into_iter().collect()
            }
            selectors::ADDRESS_BY_ITEM if listing.address_shape == DetailShape::Item => {
                listing.address.as_deref().map(text).into_iter().collect()
            }
            selectors::PHONE_BY_ICON if listing.phone_shape == DetailShape::Icon => {
                listing.phone.as_deref().map(text).into_iter().collect()
            }
            selectors::PHONE_BY_ITEM if listing.phone_shape == DetailShape::Item => {
                listing.phone.as_deref().map(text).into_iter().collect()
            }
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Candidate(usize),
    Feed,
    /// A main pane; `None` is the results list, `Some` a listing's detail.
    Main(Option<usize>),
    Heading(usize),
    Text {
        text: String,
        href: Option<String>,
        aria: Option<String>,
        /// Text of a nested body node.
        body: Option<String>,
    },
}

/// Handle onto one scripted page.
pub struct MemoryAutomation {
    page: Arc<Page>,
}

#[async_trait]
impl Automation for MemoryAutomation {
    async fn navigate(&self, url: &str) -> AutomationResult<()> {
        let parsed =
            url::Url::parse(url).map_err(|e| AutomationError::Navigation(format!("{url}: {e}")))?;
        let term = parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .unwrap_or_default()
            .to_string();

        let mut state = self.page.state()?;
        state.url = url.to_string();
        state.term = term;
        state.rendered = self.page.page_size.min(self.page.catalogue.len());
        state.selected = None;
        self.page.stats.navigations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn find_elements(&self, selector: &str) -> AutomationResult<Vec<Box<dyn Element>>> {
        let nodes = self.page.query_document(selector)?;
        Ok(self.page.nodes(nodes))
    }

    async fn current_url(&self) -> AutomationResult<String> {
        Ok(self.page.state()?.url.clone())
    }

    async fn scroll_page_to_end(&self) -> AutomationResult<()> {
        self.page.grow()
    }

    async fn capture_snapshot(&self) -> AutomationResult<Vec<u8>> {
        self.page.state()?;
        self.page.stats.snapshots.fetch_add(1, Ordering::SeqCst);
        Ok(SNAPSHOT_BYTES.to_vec())
    }

    async fn release(&self) -> AutomationResult<()> {
        let mut state = self.page.state()?;
        state.released = true;
        self.page.stats.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryElement {
    page: Arc<Page>,
    node: Node,
}

impl MemoryElement {
    fn listing(&self, index: usize) -> Option<&ScriptedListing> {
        self.page.catalogue.get(index)
    }

    fn candidate_text(&self, index: usize) -> String {
        let Some(listing) = self.listing(index) else {
            return String::new();
        };
        let mut text = listing.name.clone();
        if let Some(rating) = &listing.rating {
            text.push('\n');
            text.push_str(rating);
        }
        if listing.sponsored {
            text.push_str("\nSponsored");
        }
        text
    }
}

#[async_trait]
impl Element for MemoryElement {
    async fn find_elements(&self, selector: &str) -> AutomationResult<Vec<Box<dyn Element>>> {
        self.page.state()?;
        let nodes = match &self.node {
            Node::Main(Some(index)) => self.page.query_detail(*index, selector),
            Node::Text {
                body: Some(body), ..
            } if selector == selectors::BODY_TEXT => vec![Node::Text {
                text: body.clone(),
                href: None,
                aria: None,
                body: None,
            }],
            _ => Vec::new(),
        };
        Ok(self.page.nodes(nodes))
    }

    async fn text(&self) -> AutomationResult<String> {
        self.page.state()?;
        Ok(match &self.node {
            Node::Candidate(index) => self.candidate_text(*index),
            Node::Main(Some(index)) | Node::Heading(index) => self
                .listing(*index)
                .map(|l| l.name.clone())
                .unwrap_or_default(),
            Node::Text { text, .. } => text.clone(),
            Node::Feed | Node::Main(None) => String::new(),
        })
    }

    async fn attribute(&self, name: &str) -> AutomationResult<Option<String>> {
        let state = self.page.state()?;
        Ok(match (&self.node, name) {
            (Node::Candidate(index), "href") => Some(self.page.href(&state.term, *index)),
            (Node::Text { href, .. }, "href") => href.clone(),
            (Node::Text { aria, .. }, "aria-label") => aria.clone(),
            _ => None,
        })
    }

    async fn parent_text(&self) -> AutomationResult<String> {
        self.page.state()?;
        Ok(match &self.node {
            Node::Candidate(index) => self.candidate_text(*index),
            _ => String::new(),
        })
    }

    async fn is_visible(&self) -> AutomationResult<bool> {
        self.page.state()?;
        Ok(match &self.node {
            Node::Main(None) => false,
            Node::Heading(index) => !self.listing(*index).is_some_and(|l| l.hidden_heading),
            _ => true,
        })
    }

    async fn click(&self) -> AutomationResult<()> {
        if !self.page.click_delay.is_zero() {
            tokio::time::sleep(self.page.click_delay).await;
        }
        let mut state = self.page.state()?;
        if let Node::Candidate(index) = self.node {
            if self.listing(index).is_some_and(|l| l.broken) {
                return Err(AutomationError::Interaction(
                    "element click intercepted".to_string(),
                ));
            }
            state.selected = Some(index);
            state.url = self.page.href(&state.term, index);
        }
        self.page.stats.clicks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn scroll_into_view(&self) -> AutomationResult<()> {
        self.page.state()?;
        Ok(())
    }

    async fn scroll_to_end(&self) -> AutomationResult<()> {
        match self.node {
            Node::Feed => self.page.grow(),
            _ => self.page.state().map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scroll_renders_next_page() {
        let launcher = MemoryLauncher::new(sample_catalogue(7)).page_size(3);
        let page = launcher.launch(true).await.unwrap();
        page.navigate("https://www.google.com/maps/search/bakery").await.unwrap();

        assert_eq!(page.find_elements(selectors::CANDIDATE_LINKS).await.unwrap().len(), 3);
        let feed = page.find_elements(selectors::FEED).await.unwrap();
        feed[0].scroll_to_end().await.unwrap();
        assert_eq!(page.find_elements(selectors::CANDIDATE_LINKS).await.unwrap().len(), 6);
        page.scroll_page_to_end().await.unwrap();
        assert_eq!(page.find_elements(selectors::CANDIDATE_LINKS).await.unwrap().len(), 7);
        assert_eq!(launcher.stats().scrolls(), 2);
    }

    #[tokio::test]
    async fn test_links_follow_search_term() {
        let launcher = MemoryLauncher::new(sample_catalogue(1));
        let page = launcher.launch(true).await.unwrap();
        page.navigate("https://www.google.com/maps/search/coffee%20shops").await.unwrap();

        let candidates = page.find_elements(selectors::CANDIDATE_LINKS).await.unwrap();
        let href = candidates[0].attribute("href").await.unwrap();
        assert_eq!(href.as_deref(), Some(href_for("coffee shops", "place-0").as_str()));
    }

    #[tokio::test]
    async fn test_click_opens_detail_pane() {
        let launcher = MemoryLauncher::new(sample_catalogue(2));
        let page = launcher.launch(true).await.unwrap();
        page.navigate("https://www.google.com/maps/search/tea").await.unwrap();
        assert!(page.find_elements(selectors::HEADING).await.unwrap().is_empty());

        let candidates = page.find_elements(selectors::CANDIDATE_LINKS).await.unwrap();
        candidates[1].click().await.unwrap();

        let panes = page.find_elements(selectors::MAIN_PANE).await.unwrap();
        assert_eq!(panes.len(), 2);
        let heading = panes[1].find_elements(selectors::HEADING).await.unwrap();
        assert_eq!(heading[0].text().await.unwrap(), "Place 1");
        assert_eq!(page.current_url().await.unwrap(), href_for("tea", "place-1"));
    }

    #[tokio::test]
    async fn test_released_handle_rejects_everything() {
        let launcher = MemoryLauncher::new(sample_catalogue(1));
        let page = launcher.launch(true).await.unwrap();
        page.release().await.unwrap();

        assert!(matches!(page.release().await, Err(AutomationError::Released)));
        assert!(matches!(
            page.find_elements(selectors::FEED).await,
            Err(AutomationError::Released)
        ));
        assert_eq!(launcher.stats().releases(), 1);
    }

    #[tokio::test]
    async fn test_failing_launcher() {
        let launcher = MemoryLauncher::new(Vec::new()).failing("no display");
        assert!(matches!(
            launcher.launch(false).await,
            Err(AutomationError::Launch(_))
        ));
        assert_eq!(launcher.stats().launches(), 1);
    }
}

// Copyright 2026 Mapscout Contributors
// SPDX-License-Identifier: Apache-2.0

//! Extraction engine: turns one activated candidate into an [`ExtractedRecord`].
//!
//! The detail DOM is unreliable; any probe may find nothing, find a stale
//! panel, or fail outright. Each field is therefore resolved through a
//! [`Fallback`] chain of strategies, where a strategy either finds a value,
//! reports it missing, or errors. Errors and misses both move on to the next
//! strategy; an exhausted chain yields the field's sentinel. Nothing here
//! fails the item except activation.

pub mod fields;
pub mod selectors;

use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::debug;

use crate::automation::{wait_until, Automation, Element};
use crate::config::ScraperConfig;
use crate::error::AutomationResult;
use crate::events::ExtractedRecord;

// ── Fallback chains ─────────────────────────────────────────────────────────

/// Outcome of one probing strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Found(String),
    Missing,
}

impl Probe {
    /// `Found` for non-blank text (trimmed), otherwise `Missing`.
    pub fn text(value: impl AsRef<str>) -> Self {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            Probe::Missing
        } else {
            Probe::Found(trimmed.to_string())
        }
    }

    pub fn from_option(value: Option<String>) -> Self {
        value.map_or(Probe::Missing, Probe::text)
    }
}

type Strategy<'a> = BoxFuture<'a, AutomationResult<Probe>>;

/// Ordered strategies for one field; the first `Found` wins.
///
/// Strategies are lazy: a later one never runs once an earlier one succeeds.
pub struct Fallback<'a> {
    field: &'static str,
    strategies: Vec<(&'static str, Strategy<'a>)>,
}

impl<'a> Fallback<'a> {
    pub fn new(field: &'static str) -> Self {
        Self {
            field,
            strategies: Vec::new(),
        }
    }

    pub fn or<F>(mut self, label: &'static str, strategy: F) -> Self
    where
        F: Future<Output = AutomationResult<Probe>> + Send + 'a,
    {
        self.strategies.push((label, strategy.boxed()));
        self
    }

    /// Run strategies in order, returning the first value found or `sentinel`.
    pub async fn resolve(self, sentinel: &str) -> String {
        for (label, strategy) in self.strategies {
            match strategy.await {
                Ok(Probe::Found(value)) => return value,
                Ok(Probe::Missing) => {}
                Err(e) => debug!(field = self.field, strategy = label, error = %e, "probe failed"),
            }
        }
        sentinel.to_string()
    }
}

// ── Active context ──────────────────────────────────────────────────────────

/// Where field probes look.
pub enum Scope {
    Element(Box<dyn Element>),
    Document,
}

/// The part of the page that holds the listing currently shown.
pub struct Context<'a> {
    automation: &'a dyn Automation,
    scope: Scope,
}

impl<'a> Context<'a> {
    /// Locate the live detail pane.
    ///
    /// Maps keeps the results pane in the DOM next to the detail pane, and
    /// the detail pane is appended last. Scan main panes newest first for
    /// one whose heading is visible; otherwise take the last pane, then the
    /// first, then the whole document.
    pub async fn resolve(automation: &'a dyn Automation) -> Context<'a> {
        let scope = match automation.find_elements(selectors::MAIN_PANE).await {
            Ok(mut panes) => {
                let mut chosen = None;
                for index in (0..panes.len()).rev() {
                    if heading_visible(panes[index].as_ref()).await {
                        chosen = Some(index);
                        break;
                    }
                }
                match chosen {
                    Some(index) => Some(Scope::Element(panes.swap_remove(index))),
                    None => panes.pop().map(Scope::Element),
                }
            }
            Err(e) => {
                debug!(error = %e, "main pane scan failed");
                None
            }
        };

        let scope = match scope {
            Some(scope) => scope,
            None => match automation.find_elements(selectors::MAIN_PANE).await {
                Ok(mut panes) if !panes.is_empty() => Scope::Element(panes.swap_remove(0)),
                _ => Scope::Document,
            },
        };
        Context { automation, scope }
    }

    pub fn is_document(&self) -> bool {
        matches!(self.scope, Scope::Document)
    }

    pub async fn find(&self, selector: &str) -> AutomationResult<Vec<Box<dyn Element>>> {
        match &self.scope {
            Scope::Element(element) => element.find_elements(selector).await,
            Scope::Document => self.automation.find_elements(selector).await,
        }
    }

    pub async fn first(&self, selector: &str) -> AutomationResult<Option<Box<dyn Element>>> {
        Ok(self.find(selector).await?.into_iter().next())
    }
}

async fn heading_visible(pane: &dyn Element) -> bool {
    match pane.find_elements(selectors::HEADING).await {
        Ok(headings) => match headings.first() {
            Some(heading) => heading.is_visible().await.unwrap_or(false),
            None => false,
        },
        Err(_) => false,
    }
}

// ── Item handling ───────────────────────────────────────────────────────────

/// Whether a candidate is an advertisement.
///
/// Looks at the candidate's own text and its container's. A probe that
/// fails counts as not sponsored.
pub async fn is_sponsored(candidate: &dyn Element) -> bool {
    let own = candidate.text().await.unwrap_or_default();
    let parent = candidate.parent_text().await.unwrap_or_default();
    own.contains(selectors::SPONSORED_MARKER) || parent.contains(selectors::SPONSORED_MARKER)
}

/// Open a candidate's detail pane.
///
/// Waits a bounded time for a heading to appear but proceeds either way.
pub async fn activate(
    automation: &dyn Automation,
    candidate: &dyn Element,
    config: &ScraperConfig,
) -> AutomationResult<()> {
    candidate.scroll_into_view().await?;
    candidate.click().await?;

    let appeared = wait_until(config.probe_timeout, config.poll_interval, move || async move {
        automation
            .find_elements(selectors::HEADING)
            .await
            .map(|headings| !headings.is_empty())
            .unwrap_or(false)
    })
    .await;
    if !appeared {
        debug!("detail heading did not appear, extracting anyway");
    }
    Ok(())
}

/// Extract all six fields of the activated listing.
///
/// Always returns a fully populated record.
pub async fn extract_record(
    automation: &dyn Automation,
    config: &ScraperConfig,
    href: Option<&str>,
) -> ExtractedRecord {
    let name = fields::name(automation, config).await;
    let context = Context::resolve(automation).await;

    ExtractedRecord {
        name,
        rating: fields::rating(&context).await,
        link: fields::link(automation, href).await,
        website: fields::website(&context).await,
        address: fields::detail(
            &context,
            "address",
            selectors::ADDRESS_BY_ICON,
            selectors::ADDRESS_BY_ITEM,
        )
        .await,
        phone: fields::detail(
            &context,
            "phone",
            selectors::PHONE_BY_ICON,
            selectors::PHONE_BY_ITEM,
        )
        .await,
    }
}

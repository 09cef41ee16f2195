// Copyright 2026 Mapscout Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-field probing strategies.

use std::sync::OnceLock;

use regex::Regex;
use tokio::time::Instant;

use super::{selectors, Context, Fallback, Probe};
use crate::automation::Automation;
use crate::config::ScraperConfig;
use crate::error::AutomationResult;
use crate::events::{NOT_AVAILABLE, UNKNOWN_NAME};

// ── Name ────────────────────────────────────────────────────────────────────

/// Headings like "Results" or "Showing results for…" that belong to the list.
pub fn is_placeholder_heading(text: &str) -> bool {
    selectors::PLACEHOLDER_HEADINGS
        .iter()
        .any(|marker| text.contains(marker))
}

/// Poll the active pane for a real listing heading.
///
/// The detail pane renders asynchronously after a click, so the heading is
/// re-probed every `poll_interval` until `probe_timeout`.
pub async fn name(automation: &dyn Automation, config: &ScraperConfig) -> String {
    Fallback::new("name")
        .or("heading", async {
            let deadline = Instant::now() + config.probe_timeout;
            loop {
                if let Ok(Some(name)) = heading_name(automation).await {
                    return Ok(Probe::Found(name));
                }
                let now = Instant::now();
                if now >= deadline {
                    return Ok(Probe::Missing);
                }
                tokio::time::sleep(config.poll_interval.min(deadline - now)).await;
            }
        })
        .resolve(UNKNOWN_NAME)
        .await
}

async fn heading_name(automation: &dyn Automation) -> AutomationResult<Option<String>> {
    let context = Context::resolve(automation).await;
    for heading in context.find(selectors::HEADING).await? {
        let text = heading.text().await?;
        let text = text.trim();
        if !text.is_empty() && !is_placeholder_heading(text) {
            return Ok(Some(text.to_string()));
        }
    }
    Ok(None)
}

// ── Rating ──────────────────────────────────────────────────────────────────

fn rating_text_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d[.,]\d$").expect("rating regex is valid"))
}

fn rating_label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d[.,]\d) stars|Rated (\d[.,]\d)").expect("rating label regex is valid")
    })
}

/// Accept exactly one digit, a separator and one digit, within `[1.0, 5.0]`.
///
/// Returns the value with a `.` separator. Bare integers such as a "5"
/// filter chip are rejected.
pub fn parse_rating(text: &str) -> Option<String> {
    let text = text.trim();
    if !rating_text_re().is_match(text) {
        return None;
    }
    let normalized = text.replace(',', ".");
    let value: f64 = normalized.parse().ok()?;
    (1.0..=5.0).contains(&value).then_some(normalized)
}

/// Rating from an accessibility label such as "4.5 stars" or "Rated 4,5".
pub fn rating_from_label(label: &str) -> Option<String> {
    let caps = rating_label_re().captures(label)?;
    let value = caps.get(1).or_else(|| caps.get(2))?;
    Some(value.as_str().replace(',', "."))
}

pub async fn rating(context: &Context<'_>) -> String {
    Fallback::new("rating")
        // Strategy 1: short visible text
        .or("visible text", async {
            for node in context.find(selectors::SHORT_TEXT).await? {
                if let Some(rating) = parse_rating(&node.text().await?) {
                    return Ok(Probe::Found(rating));
                }
            }
            Ok(Probe::Missing)
        })
        // Strategy 2: accessibility labels
        .or("aria label", async {
            for selector in [selectors::STAR_LABELS, selectors::IMG_ROLE] {
                let Ok(nodes) = context.find(selector).await else {
                    continue;
                };
                for node in nodes {
                    let label = node.attribute("aria-label").await.ok().flatten();
                    if let Some(rating) = label.as_deref().and_then(rating_from_label) {
                        return Ok(Probe::Found(rating));
                    }
                }
            }
            Ok(Probe::Missing)
        })
        .resolve(NOT_AVAILABLE)
        .await
}

// ── Link ────────────────────────────────────────────────────────────────────

/// Whether `url` has the shape of a listing link.
pub fn is_place_link(url: &str) -> bool {
    url.contains(selectors::PLACE_MARKER)
}

/// The candidate's own href when it is a listing link, else the page URL.
pub async fn link(automation: &dyn Automation, href: Option<&str>) -> String {
    let href = href.filter(|h| is_place_link(h)).map(str::to_string);
    Fallback::new("link")
        .or("candidate href", async move { Ok(Probe::from_option(href)) })
        .or("current url", async {
            let current = automation.current_url().await?;
            Ok(if is_place_link(&current) {
                Probe::text(current)
            } else {
                Probe::Missing
            })
        })
        .resolve(NOT_AVAILABLE)
        .await
}

// ── Website ─────────────────────────────────────────────────────────────────

pub async fn website(context: &Context<'_>) -> String {
    Fallback::new("website")
        .or("authority href", async {
            match context.first(selectors::WEBSITE_ITEM).await? {
                Some(item) => Ok(Probe::from_option(item.attribute("href").await?)),
                None => Ok(Probe::Missing),
            }
        })
        .or("authority text", async {
            match context.first(selectors::WEBSITE_ITEM).await? {
                Some(item) => Ok(Probe::text(item.text().await?)),
                None => Ok(Probe::Missing),
            }
        })
        .or("authority body", async {
            let Some(item) = context.first(selectors::WEBSITE_ITEM).await? else {
                return Ok(Probe::Missing);
            };
            match item.find_elements(selectors::BODY_TEXT).await?.first() {
                Some(body) => Ok(Probe::text(body.text().await?)),
                None => Ok(Probe::Missing),
            }
        })
        .or("globe button", async {
            match context.first(selectors::WEBSITE_GLOBE).await? {
                Some(button) => Ok(Probe::text(button.text().await?)),
                None => Ok(Probe::Missing),
            }
        })
        .resolve(NOT_AVAILABLE)
        .await
}

// ── Address / phone ─────────────────────────────────────────────────────────

/// Text next to an icon-marked control, else the text of a data-attribute control.
pub async fn detail(
    context: &Context<'_>,
    field: &'static str,
    by_icon: &'static str,
    by_item: &'static str,
) -> String {
    Fallback::new(field)
        .or("icon", text_of_first(context, by_icon))
        .or("data item", text_of_first(context, by_item))
        .resolve(NOT_AVAILABLE)
        .await
}

async fn text_of_first(context: &Context<'_>, selector: &str) -> AutomationResult<Probe> {
    match context.first(selector).await? {
        Some(node) => Ok(Probe::text(node.text().await?)),
        None => Ok(Probe::Missing),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rating_accepts_single_decimal() {
        assert_eq!(parse_rating("4.7").as_deref(), Some("4.7"));
        assert_eq!(parse_rating("3.0").as_deref(), Some("3.0"));
        assert_eq!(parse_rating(" 4,2 ").as_deref(), Some("4.2"));
        assert_eq!(parse_rating("1.0").as_deref(), Some("1.0"));
        assert_eq!(parse_rating("5.0").as_deref(), Some("5.0"));
    }

    #[test]
    fn test_parse_rating_rejects_noise() {
        assert_eq!(parse_rating("5"), None);
        assert_eq!(parse_rating("9.9"), None);
        assert_eq!(parse_rating("0.5"), None);
        assert_eq!(parse_rating("4.75"), None);
        assert_eq!(parse_rating("(120)"), None);
        assert_eq!(parse_rating(""), None);
    }

    #[test]
    fn test_rating_from_label() {
        assert_eq!(rating_from_label("4.5 stars").as_deref(), Some("4.5"));
        assert_eq!(rating_from_label("Rated 3,9 out of 5").as_deref(), Some("3.9"));
        assert_eq!(rating_from_label("  4,1 stars 230 reviews").as_deref(), Some("4.1"));
        assert_eq!(rating_from_label("5 stars"), None);
        assert_eq!(rating_from_label("Directions"), None);
    }

    #[test]
    fn test_placeholder_headings() {
        assert!(is_placeholder_heading("Results"));
        assert!(is_placeholder_heading("Showing results 1 - 20"));
        assert!(!is_placeholder_heading("Blue Bottle Coffee"));
    }

    #[test]
    fn test_place_link_shape() {
        assert!(is_place_link("https://www.google.com/maps/place/Blue+Bottle/@37.7,-122.4"));
        assert!(!is_place_link("https://www.google.com/maps/search/coffee"));
        assert!(!is_place_link(""));
    }
}

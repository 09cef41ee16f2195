// Copyright 2026 Mapscout Contributors
// SPDX-License-Identifier: Apache-2.0

//! CSS selectors and markers for the maps results page.

/// Path fragment every listing URL carries.
pub const PLACE_MARKER: &str = "/maps/place/";

/// Listing anchors in the results list.
pub const CANDIDATE_LINKS: &str = "a[href*=\"/maps/place/\"]";

/// Scrollable results container.
pub const FEED: &str = "div[role=\"feed\"]";

/// Main content panes; the detail view is one of them.
pub const MAIN_PANE: &str = "div[role=\"main\"]";

pub const HEADING: &str = "h1";

/// Short text nodes that may hold a numeric rating.
pub const SHORT_TEXT: &str = "span, div";

/// Star widgets described by an aria label.
pub const STAR_LABELS: &str = "span[aria-label*=\"stars\"]";
pub const IMG_ROLE: &str = "span[role=\"img\"]";

/// Website entry in the detail pane.
pub const WEBSITE_ITEM: &str = "[data-item-id=\"authority\"]";
pub const BODY_TEXT: &str = "div[class*=\"fontBodyMedium\"]";
pub const WEBSITE_GLOBE: &str = "button:has(img[src*=\"public_gm\"])";

pub const ADDRESS_BY_ICON: &str = "button:has(img[src*=\"place_gm\"]) div[class*=\"fontBodyMedium\"]";
pub const ADDRESS_BY_ITEM: &str = "button[data-item-id*=\"address\"]";

pub const PHONE_BY_ICON: &str = "button:has(img[src*=\"phone_gm\"]) div[class*=\"fontBodyMedium\"]";
pub const PHONE_BY_ITEM: &str = "button[data-item-id*=\"phone\"]";

/// Text that marks an advertised listing.
pub const SPONSORED_MARKER: &str = "Sponsored";

/// Headings that belong to the results list rather than a listing.
pub const PLACEHOLDER_HEADINGS: [&str; 2] = ["Result", "Showing"];

// Copyright 2026 Mapscout Contributors
// SPDX-License-Identifier: Apache-2.0

//! Inbound command protocol.
//!
//! Clients send JSON objects discriminated by `action`:
//!
//! ```json
//! {"action": "start", "keyword": "coffee shops", "headless": true, "ignoreUrls": []}
//! {"action": "stop"}
//! ```

use serde::Deserialize;

/// A command received from a client connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Command {
    Start(JobParams),
    Stop,
}

/// Immutable parameters of one scraping job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct JobParams {
    #[serde(default)]
    pub keyword: String,
    #[serde(default)]
    pub headless: bool,
    /// Listing URLs already handled in an earlier run; seeds the processed set.
    #[serde(
        default,
        rename = "ignoreUrls",
        alias = "ignore_urls",
        alias = "excludeUrls"
    )]
    pub ignore_urls: Vec<String>,
}

impl JobParams {
    pub fn new(keyword: impl Into<String>, headless: bool) -> Self {
        Self {
            keyword: keyword.into(),
            headless,
            ignore_urls: Vec::new(),
        }
    }

    pub fn with_ignore_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Whether this job continues an earlier one.
    pub fn is_resume(&self) -> bool {
        !self.ignore_urls.is_empty()
    }
}

/// Parse one inbound text frame.
pub fn parse_command(text: &str) -> serde_json::Result<Command> {
    serde_json::from_str(text)
}

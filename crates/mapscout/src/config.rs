// Copyright 2026 Mapscout Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tuning knobs for sessions and browser launch.
//!
//! Defaults reproduce the timings the scraper has always used. Every value
//! can be overridden through a `MAPSCOUT_*` environment variable; values
//! that fail to parse are ignored with a warning.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

/// Default search endpoint; the keyword is appended as a path segment.
pub const DEFAULT_SEARCH_URL: &str = "https://www.google.com/maps/search/";

/// Desktop user agent presented by launched browsers.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Timing and threshold parameters for one scraping session.
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    /// Base URL the search keyword is appended to.
    pub search_base_url: String,
    /// Consecutive stalled scrolls tolerated before the list is considered exhausted.
    pub stall_limit: u32,
    /// Upper bound for a single probe wait (detail heading, name polling, list growth).
    pub probe_timeout: Duration,
    /// Interval between polls inside a bounded wait.
    pub poll_interval: Duration,
    /// How long to look for the scrollable results container after navigation.
    pub feed_timeout: Duration,
    /// Extra pause after a scroll that produced no new candidates.
    pub scroll_settle: Duration,
    /// Lower bound of the randomized pause between items.
    pub pacing_min: Duration,
    /// Upper bound of the randomized pause between items.
    pub pacing_max: Duration,
    /// How long `stop()` waits for the worker before force-releasing.
    pub join_timeout: Duration,
    /// How long a release may take before the browser process is killed.
    pub release_timeout: Duration,
    /// Pause after stopping a replaced session before starting its successor.
    pub replace_grace: Duration,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            search_base_url: DEFAULT_SEARCH_URL.to_string(),
            stall_limit: 4,
            probe_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_millis(150),
            feed_timeout: Duration::from_secs(15),
            scroll_settle: Duration::from_millis(1500),
            pacing_min: Duration::from_millis(500),
            pacing_max: Duration::from_millis(1000),
            join_timeout: Duration::from_secs(2),
            release_timeout: Duration::from_secs(5),
            replace_grace: Duration::from_millis(500),
        }
    }
}

impl ScraperConfig {
    /// Defaults overlaid with `MAPSCOUT_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("MAPSCOUT_SEARCH_URL") {
            let url = url.trim();
            if !url.is_empty() {
                config.search_base_url = url.to_string();
            }
        }
        if let Some(limit) = parse_env(&lookup, "MAPSCOUT_STALL_LIMIT") {
            config.stall_limit = limit;
        }

        let millis = [
            ("MAPSCOUT_PROBE_TIMEOUT_MS", &mut config.probe_timeout),
            ("MAPSCOUT_POLL_INTERVAL_MS", &mut config.poll_interval),
            ("MAPSCOUT_FEED_TIMEOUT_MS", &mut config.feed_timeout),
            ("MAPSCOUT_SCROLL_SETTLE_MS", &mut config.scroll_settle),
            ("MAPSCOUT_PACING_MIN_MS", &mut config.pacing_min),
            ("MAPSCOUT_PACING_MAX_MS", &mut config.pacing_max),
            ("MAPSCOUT_JOIN_TIMEOUT_MS", &mut config.join_timeout),
            ("MAPSCOUT_RELEASE_TIMEOUT_MS", &mut config.release_timeout),
            ("MAPSCOUT_REPLACE_GRACE_MS", &mut config.replace_grace),
        ];
        for (key, slot) in millis {
            if let Some(ms) = parse_env::<u64, _>(&lookup, key) {
                *slot = Duration::from_millis(ms);
            }
        }

        if config.pacing_min > config.pacing_max {
            std::mem::swap(&mut config.pacing_min, &mut config.pacing_max);
        }
        config
    }
}

fn parse_env<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable config override");
            None
        }
    }
}

/// How a browser is launched for a session.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Explicit browser executable; discovered when `None`.
    pub executable: Option<PathBuf>,
    pub window_width: u32,
    pub window_height: u32,
    pub user_agent: String,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            executable: None,
            window_width: 1280,
            window_height: 800,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl LaunchOptions {
    /// Command-line switches for a browser launched with these options.
    ///
    /// Headless mode is not among them; backends select it themselves.
    pub fn args(&self) -> Vec<String> {
        vec![
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-blink-features=AutomationControlled".to_string(),
            format!("--window-size={},{}", self.window_width, self.window_height),
            format!("--user-agent={}", self.user_agent),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_source_timings() {
        let config = ScraperConfig::default();
        assert_eq!(config.stall_limit, 4);
        assert_eq!(config.probe_timeout, Duration::from_secs(3));
        assert_eq!(config.poll_interval, Duration::from_millis(150));
        assert_eq!(config.join_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_overrides_applied() {
        let config = ScraperConfig::from_lookup(lookup_from(&[
            ("MAPSCOUT_STALL_LIMIT", "7"),
            ("MAPSCOUT_POLL_INTERVAL_MS", "20"),
            ("MAPSCOUT_SEARCH_URL", "http://127.0.0.1:9/maps/search/"),
        ]));
        assert_eq!(config.stall_limit, 7);
        assert_eq!(config.poll_interval, Duration::from_millis(20));
        assert_eq!(config.search_base_url, "http://127.0.0.1:9/maps/search/");
    }

    #[test]
    fn test_bad_override_keeps_default() {
        let config = ScraperConfig::from_lookup(lookup_from(&[
            ("MAPSCOUT_STALL_LIMIT", "many"),
            ("MAPSCOUT_FEED_TIMEOUT_MS", "-5"),
        ]));
        assert_eq!(config.stall_limit, 4);
        assert_eq!(config.feed_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_inverted_pacing_is_swapped() {
        let config = ScraperConfig::from_lookup(lookup_from(&[
            ("MAPSCOUT_PACING_MIN_MS", "900"),
            ("MAPSCOUT_PACING_MAX_MS", "100"),
        ]));
        assert!(config.pacing_min <= config.pacing_max);
    }

    #[test]
    fn test_launch_args() {
        let args = LaunchOptions::default().args();
        assert!(args.contains(&"--window-size=1280,800".to_string()));
        assert!(args.contains(&"--disable-blink-features=AutomationControlled".to_string()));
        assert!(args.iter().any(|a| a.starts_with("--user-agent=Mozilla/5.0")));
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
    }
}

//! Shared helpers for the mapscout integration tests.

#![allow(dead_code)]

use std::time::Duration;

use mapscout::{Event, EventStream, ExtractedRecord, ScraperConfig};

/// Timings shrunk so a full crawl over the memory backend takes milliseconds.
pub fn fast_config() -> ScraperConfig {
    ScraperConfig {
        probe_timeout: Duration::from_millis(30),
        poll_interval: Duration::from_millis(2),
        feed_timeout: Duration::from_millis(30),
        scroll_settle: Duration::ZERO,
        pacing_min: Duration::ZERO,
        pacing_max: Duration::ZERO,
        join_timeout: Duration::from_secs(2),
        release_timeout: Duration::from_secs(1),
        replace_grace: Duration::ZERO,
        ..ScraperConfig::default()
    }
}

/// Next event, failing the test if none arrives within ten seconds.
pub async fn next_event(stream: &mut EventStream) -> Event {
    tokio::time::timeout(Duration::from_secs(10), stream.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream closed")
}

/// Everything up to and including the terminal STOPPED status.
pub async fn collect_until_stopped(stream: &mut EventStream) -> Vec<Event> {
    let mut events = Vec::new();
    loop {
        let event = next_event(stream).await;
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            return events;
        }
    }
}

/// Wait until an event matching `pred` arrives; returns everything seen so far.
pub async fn collect_until<F>(stream: &mut EventStream, mut pred: F) -> Vec<Event>
where
    F: FnMut(&Event) -> bool,
{
    let mut events = Vec::new();
    loop {
        let event = next_event(stream).await;
        let done = pred(&event);
        events.push(event);
        if done {
            return events;
        }
    }
}

pub fn rows(events: &[Event]) -> Vec<&ExtractedRecord> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Row(record) => Some(record),
            _ => None,
        })
        .collect()
}

pub fn logs(events: &[Event]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Log(line) => Some(line.as_str()),
            _ => None,
        })
        .collect()
}

pub fn terminal_count(events: &[Event]) -> usize {
    events.iter().filter(|e| e.is_terminal()).count()
}

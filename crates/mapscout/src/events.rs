// Copyright 2026 Mapscout Contributors
// SPDX-License-Identifier: Apache-2.0

//! Events a session sends to its connection.
//!
//! Serialized as `{"type": ..., "payload": ...}` frames. Events carry no
//! session identity; the bridge they travel through is already bound to
//! one connection.

use base64::Engine as _;
use serde::{Serialize, Serializer};

/// Placeholder for a field that could not be determined.
pub const NOT_AVAILABLE: &str = "N/A";

/// Placeholder for a listing whose name never appeared.
pub const UNKNOWN_NAME: &str = "Unknown Name";

/// Externally visible lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Running,
    Stopped,
}

/// One extracted business listing. Every field is either a real value or a sentinel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExtractedRecord {
    pub name: String,
    pub rating: String,
    pub link: String,
    pub website: String,
    pub address: String,
    pub phone: String,
}

/// Everything a session can tell its client.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum Event {
    Status(SessionStatus),
    Log(String),
    /// Live preview of the browser viewport; base64 on the wire.
    #[serde(rename = "image", serialize_with = "serialize_base64")]
    Snapshot(Vec<u8>),
    Row(ExtractedRecord),
}

impl Event {
    pub fn log(message: impl Into<String>) -> Self {
        Event::Log(message.into())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Status(SessionStatus::Stopped))
    }
}

fn serialize_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> ExtractedRecord {
        ExtractedRecord {
            name: "Blue Bottle".to_string(),
            rating: "4.6".to_string(),
            link: "https://www.google.com/maps/place/blue-bottle/".to_string(),
            website: "bluebottlecoffee.com".to_string(),
            address: "1 Ferry Building".to_string(),
            phone: NOT_AVAILABLE.to_string(),
        }
    }

    #[test]
    fn test_status_wire_format() {
        let value = serde_json::to_value(Event::Status(SessionStatus::Running)).unwrap();
        assert_eq!(value, json!({"type": "status", "payload": "RUNNING"}));
        let value = serde_json::to_value(Event::Status(SessionStatus::Stopped)).unwrap();
        assert_eq!(value, json!({"type": "status", "payload": "STOPPED"}));
    }

    #[test]
    fn test_log_wire_format() {
        let value = serde_json::to_value(Event::log("> Feed loaded.")).unwrap();
        assert_eq!(value, json!({"type": "log", "payload": "> Feed loaded."}));
    }

    #[test]
    fn test_snapshot_is_base64_image() {
        let value = serde_json::to_value(Event::Snapshot(vec![0x89, b'P', b'N', b'G'])).unwrap();
        assert_eq!(value, json!({"type": "image", "payload": "iVBORw=="}));
    }

    #[test]
    fn test_row_carries_six_fields() {
        let value = serde_json::to_value(Event::Row(record())).unwrap();
        assert_eq!(value["type"], "row");
        let payload = value["payload"].as_object().unwrap();
        assert_eq!(payload.len(), 6);
        for key in ["name", "rating", "link", "website", "address", "phone"] {
            assert!(payload[key].is_string(), "{key} should be a string");
        }
    }

    #[test]
    fn test_only_stopped_is_terminal() {
        assert!(Event::Status(SessionStatus::Stopped).is_terminal());
        assert!(!Event::Status(SessionStatus::Running).is_terminal());
        assert!(!Event::log("Scraper stopped.").is_terminal());
    }
}

// Copyright 2026 Mapscout Contributors
// SPDX-License-Identifier: Apache-2.0

//! Mapscout streams business listings out of a map search UI.
//!
//! A client connection starts a [`session::Session`], which drives a browser
//! through the [`automation`] port on its own thread, walks the results list
//! with the [`crawl`] loop, pulls each listing apart with the [`extraction`]
//! engine, and pushes [`events::Event`]s back through the [`bridge`] to the
//! connection that asked for them. The [`registry::ConnectionRegistry`] keeps
//! at most one session per connection.

pub mod automation;
pub mod bridge;
pub mod config;
pub mod crawl;
pub mod error;
pub mod events;
pub mod extraction;
pub mod protocol;
pub mod registry;
pub mod session;

pub use bridge::{EventBridge, EventStream, Gate};
pub use config::{LaunchOptions, ScraperConfig};
pub use error::{AutomationError, AutomationResult, RegistryError, SessionError};
pub use events::{Event, ExtractedRecord, SessionStatus};
pub use protocol::{Command, JobParams};
pub use registry::{ConnectionId, ConnectionRegistry};
pub use session::{Session, SessionState};

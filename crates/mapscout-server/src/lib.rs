// Copyright 2026 Mapscout Contributors
// SPDX-License-Identifier: Apache-2.0

//! Mapscout server: WebSocket front end for scraping sessions.

pub mod config;
pub mod transport;

pub use config::ServeArgs;
pub use transport::{router, run, AppState};

// Copyright 2026 Mapscout Contributors
// SPDX-License-Identifier: Apache-2.0

//! Client-facing transport.

pub mod ws;

pub use ws::{router, run, AppState};

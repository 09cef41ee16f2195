// Copyright 2026 Mapscout Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error types for the automation port, sessions and the registry.

use crate::registry::ConnectionId;

/// Failures reported by an automation backend.
#[derive(thiserror::Error, Debug)]
pub enum AutomationError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("element query failed: {0}")]
    Query(String),

    #[error("element interaction failed: {0}")]
    Interaction(String),

    #[error("snapshot failed: {0}")]
    Snapshot(String),

    /// The handle was released while an operation was in flight.
    #[error("automation handle already released")]
    Released,

    #[error("timed out after {0}ms")]
    Timeout(u64),
}

pub type AutomationResult<T> = Result<T, AutomationError>;

/// Failures that end a session's run body.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Automation(#[from] AutomationError),

    #[error("failed to spawn session worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("invalid search url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("connection not registered: {0}")]
    UnknownConnection(ConnectionId),
}

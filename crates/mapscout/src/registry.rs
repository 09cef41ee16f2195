// Copyright 2026 Mapscout Contributors
// SPDX-License-Identifier: Apache-2.0

//! Connection registry: one live connection, at most one session.
//!
//! The registry map is locked only long enough to look a connection up.
//! Each connection has its own lock, held for the whole of a command, so
//! commands on one connection are serialized (a replacement session never
//! overlaps its predecessor) while other connections proceed untouched.
//! The current session of every connection is also kept in a directory
//! behind a short-lived lock, so status queries never wait on a command.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::automation::AutomationLauncher;
use crate::bridge::EventBridge;
use crate::config::ScraperConfig;
use crate::error::RegistryError;
use crate::events::SessionStatus;
use crate::protocol::{Command, JobParams};
use crate::session::{Session, SessionState};

/// Identity of one real-time connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Connection {
    events: EventBridge,
    /// Set once unregistered; later commands are refused.
    closed: bool,
}

/// Routes commands from connections to their sessions.
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, Arc<Mutex<Connection>>>>,
    sessions: StdMutex<HashMap<ConnectionId, Arc<Session>>>,
    launcher: Arc<dyn AutomationLauncher>,
    config: Arc<ScraperConfig>,
}

impl ConnectionRegistry {
    pub fn new(launcher: Arc<dyn AutomationLauncher>, config: ScraperConfig) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            sessions: StdMutex::new(HashMap::new()),
            launcher,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    fn directory(&self) -> MutexGuard<'_, HashMap<ConnectionId, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_session(&self, conn: ConnectionId) -> Option<Arc<Session>> {
        self.directory().remove(&conn)
    }

    /// Track a new connection whose events go through `events`.
    pub async fn register(&self, conn: ConnectionId, events: EventBridge) {
        let connection = Arc::new(Mutex::new(Connection {
            events,
            closed: false,
        }));
        let previous = self.connections.lock().await.insert(conn, connection);
        if previous.is_some() {
            warn!(connection = %conn, "connection registered twice, replacing");
        }
        debug!(connection = %conn, "connection registered");
    }

    /// Forget a connection, stopping its session. Returns whether it was known.
    pub async fn unregister(&self, conn: ConnectionId) -> bool {
        let Some(connection) = self.connections.lock().await.remove(&conn) else {
            return false;
        };
        let session = {
            let mut connection = connection.lock().await;
            connection.closed = true;
            self.take_session(conn)
        };
        if let Some(session) = session {
            info!(connection = %conn, session = %session.id(), "connection closed, stopping session");
            session.stop().await;
        }
        debug!(connection = %conn, "connection unregistered");
        true
    }

    /// Apply one command from `conn`.
    pub async fn dispatch(&self, conn: ConnectionId, command: Command) -> Result<(), RegistryError> {
        let connection = self
            .connections
            .lock()
            .await
            .get(&conn)
            .cloned()
            .ok_or(RegistryError::UnknownConnection(conn))?;
        let connection = connection.lock().await;
        if connection.closed {
            return Err(RegistryError::UnknownConnection(conn));
        }

        match command {
            Command::Start(params) => self.start(conn, &connection, params).await,
            Command::Stop => {
                info!(connection = %conn, "stop requested");
                connection.events.log("> Stop requested.");
                match self.take_session(conn) {
                    Some(session) => session.stop().await,
                    None => connection.events.status(SessionStatus::Stopped),
                }
            }
        }
        Ok(())
    }

    async fn start(&self, conn: ConnectionId, connection: &Connection, params: JobParams) {
        if let Some(previous) = self.take_session(conn) {
            let was_active = previous.state() != SessionState::Stopped;
            info!(connection = %conn, session = %previous.id(), "replacing session");
            previous.stop().await;
            if was_active && !self.config.replace_grace.is_zero() {
                tokio::time::sleep(self.config.replace_grace).await;
            }
        }

        let events = &connection.events;
        events.status(SessionStatus::Running);
        if params.is_resume() {
            events.log(format!("> Resuming '{}'...", params.keyword));
        } else {
            events.log(format!("> Starting '{}'...", params.keyword));
        }

        let session = Arc::new(Session::new(
            params,
            self.config.clone(),
            self.launcher.clone(),
            events.clone(),
        ));
        if let Err(e) = session.start() {
            warn!(connection = %conn, error = %e, "session failed to start");
        }
        self.directory().insert(conn, session);
    }

    /// The session currently bound to `conn`, if any.
    pub async fn session(&self, conn: ConnectionId) -> Option<Arc<Session>> {
        self.directory().get(&conn).cloned()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Sessions that have not yet stopped.
    pub async fn active_sessions(&self) -> usize {
        self.directory()
            .values()
            .filter(|s| s.state() != SessionState::Stopped)
            .count()
    }

    /// Drop every connection and stop every session concurrently.
    pub async fn shutdown(&self) {
        let connections: Vec<_> = self.connections.lock().await.drain().collect();
        info!(connections = connections.len(), "stopping all sessions");
        let stops = connections.into_iter().map(|(conn, connection)| async move {
            let session = {
                let mut connection = connection.lock().await;
                connection.closed = true;
                self.take_session(conn)
            };
            if let Some(session) = session {
                session.stop().await;
            }
        });
        futures::future::join_all(stops).await;
    }
}

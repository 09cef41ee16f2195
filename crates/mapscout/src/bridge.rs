// Copyright 2026 Mapscout Contributors
// SPDX-License-Identifier: Apache-2.0

//! Event bridge between a session worker and its connection.
//!
//! The worker thread calls [`EventBridge::emit`] synchronously; the
//! connection side drains the paired [`EventStream`] from its own task.
//! The channel is unbounded so the producer never waits on the consumer,
//! and FIFO so a connection sees events in emission order. Once the
//! stream is dropped, emitting is a silent no-op.
//!
//! A bridge can be bound to a [`Gate`]. After the gate closes, that bridge
//! drops everything it is given; the closing call's own events are the last
//! ones it delivers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::trace;

use crate::events::{Event, SessionStatus};

/// Producer half, cloned into every session started for one connection.
#[derive(Clone, Debug)]
pub struct EventBridge {
    sender: mpsc::UnboundedSender<Event>,
    gate: Option<Gate>,
}

/// One-way switch that cuts off every bridge bound to it.
#[derive(Clone, Debug, Default)]
pub struct Gate {
    closed: Arc<Mutex<bool>>,
}

impl Gate {
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_closed(&self) -> bool {
        *self.lock()
    }

    /// Close the gate and send `last` through `bridge`'s channel.
    ///
    /// Returns `false`, sending nothing, if the gate was already closed.
    /// A gated emit racing with this call lands either before `last` or
    /// not at all.
    pub fn close_with<I>(&self, bridge: &EventBridge, last: I) -> bool
    where
        I: IntoIterator<Item = Event>,
    {
        let mut closed = self.lock();
        if *closed {
            return false;
        }
        *closed = true;
        for event in last {
            bridge.send(event);
        }
        true
    }
}

/// Consumer half, owned by the connection's message-sending side.
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<Event>,
}

impl EventBridge {
    /// Create a bridge bound to one connection's delivery path.
    pub fn channel() -> (EventBridge, EventStream) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let bridge = EventBridge { sender, gate: None };
        (bridge, EventStream { receiver })
    }

    /// A bridge onto the same connection that goes quiet once `gate` closes.
    pub fn gated(&self, gate: &Gate) -> EventBridge {
        EventBridge {
            sender: self.sender.clone(),
            gate: Some(gate.clone()),
        }
    }

    /// Queue an event for delivery. Never blocks, never fails.
    pub fn emit(&self, event: Event) {
        match &self.gate {
            Some(gate) => {
                let closed = gate.lock();
                if *closed {
                    trace!("bridge gated off, event dropped");
                    return;
                }
                self.send(event);
            }
            None => self.send(event),
        }
    }

    fn send(&self, event: Event) {
        if self.sender.send(event).is_err() {
            trace!("connection gone, event dropped");
        }
    }

    pub fn log(&self, message: impl Into<String>) {
        self.emit(Event::Log(message.into()));
    }

    pub fn status(&self, status: SessionStatus) {
        self.emit(Event::Status(status));
    }

    /// Whether the consuming side has gone away.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl EventStream {
    /// Next event, or `None` once every bridge clone is dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }

    /// Drain everything currently queued.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

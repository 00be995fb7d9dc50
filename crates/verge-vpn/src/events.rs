//! Session event bus.
//!
//! Triggers, the traffic poller and the status surfaces publish typed
//! events here; the orchestrator's dispatch loop consumes them. Every
//! subscriber receives every event published after it subscribed.

use crate::engine::TrafficSnapshot;
use crate::status::StatusAction;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::trace;

/// Events driving the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Device finished booting and auto-start is enabled
    BootCompleted,
    /// Network availability changed
    ConnectivityChanged { connected: bool },
    /// Fresh traffic rates from the engine
    EngineStatus(TrafficSnapshot),
    /// User tapped a notification action
    Action(StatusAction),
    /// Quick-settings tile tapped; toggles on actual tunnel state
    TileClicked,
    /// Tunnel permission revoked by the OS
    Revoked,
    /// Stop dispatching
    Shutdown,
}

/// Fan-out bus over crossbeam channels.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<SessionEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Deliver to every live subscriber. Returns how many received it;
    /// subscribers whose receiver was dropped are removed.
    pub fn publish(&self, event: SessionEvent) -> usize {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        trace!("Published {:?} to {} subscribers", event, subscribers.len());
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

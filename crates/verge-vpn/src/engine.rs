//! Proxy engine collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Unexpected status: {0}")]
    Status(u16),

    #[error("Body read error: {0}")]
    Body(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Engine timeout")]
    Timeout,
}

/// Where the engine should send tunneled traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub server_address: String,
    pub server_port: u16,
    pub interface_name: String,
}

/// Current traffic rates in bytes per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSnapshot {
    pub up: u64,
    pub down: u64,
}

/// Outcome of a best-effort engine signal. Never changes tunnel state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineSignal {
    Acknowledged,
    Failed(String),
    TimedOut,
}

impl EngineSignal {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, EngineSignal::Acknowledged)
    }
}

/// The proxy engine as seen from the session controller.
#[async_trait]
pub trait ProxyEngine: Send + Sync {
    /// Load the config document at `path`.
    async fn load_config(&self, path: &Path) -> Result<(), EngineError>;

    /// Begin routing tunneled traffic via `target`.
    async fn start_routing(&self, target: &RouteTarget) -> Result<(), EngineError>;

    /// Stop routing and drop open connections.
    async fn stop_routing(&self) -> Result<(), EngineError>;

    async fn query_traffic(&self) -> Result<TrafficSnapshot, EngineError>;
}

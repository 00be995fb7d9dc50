//! Verge VPN - Session Controller
//!
//! Owns the lifecycle of the device tunnel and keeps the status surfaces
//! in step with it.
//!
//! # Architecture
//!
//! ```text
//!  BootTrigger ─┐                      ┌──────────────────────┐
//!  NetworkTrigger ─▶ EventBus ──────▶  │ SessionOrchestrator  │
//!  TrafficPoller ─┘   (crossbeam)      │                      │
//!                                      │  ConfigValidator     │ pre-flight
//!                                      │  TunnelController ───┼──▶ VpnPlatform (OS interface)
//!                                      │                   ───┼──▶ ProxyEngine (control API)
//!                                      │  StatusPresenter  ───┼──▶ StatusSink (notification, tile)
//!                                      └──────────────────────┘
//! ```
//!
//! # Features
//!
//! - **Serialized transitions**: start/stop never interleave; a stop issued
//!   mid-start waits for it
//! - **No leaked interfaces**: the interface handle is closed on every
//!   teardown path
//! - **Partial-failure tolerance**: engine signal failures are reported but
//!   never take the tunnel down

mod control_api;
mod engine;
mod events;
mod orchestrator;
mod platform;
mod poller;
mod status;
mod triggers;
mod tunnel;

#[cfg(test)]
mod fakes;

pub use control_api::ControlApiClient;
pub use engine::{EngineError, EngineSignal, ProxyEngine, RouteTarget, TrafficSnapshot};
pub use events::{EventBus, SessionEvent};
pub use orchestrator::{
    DispatchFlow, SessionError, SessionOrchestrator, SessionReport, SessionStatus, SessionTiming,
    spawn_dispatcher,
};
pub use platform::{
    ForegroundHost, InterfaceSpec, PlatformError, TunInterface, VpnPlatform, INTERFACE_ADDRESS,
    INTERFACE_MTU, SESSION_NAME,
};
pub use poller::TrafficPoller;
pub use status::{
    NotificationContent, RenderedStatus, StatusAction, StatusPresenter, StatusSink, StatusView,
    TileContent, TileState, NOTIFICATION_CHANNEL, NOTIFICATION_ID, format_rate,
};
pub use triggers::{BootBroadcast, BootTrigger, NetworkTrigger};
pub use tunnel::{
    SessionInfo, StartOutcome, TunnelController, TunnelError, TunnelSession, TunnelState,
};

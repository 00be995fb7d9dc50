//! Tunnel Controller
//!
//! Owns the single tunnel session and its interface handle. Transitions
//! are serialized by an async mutex: a `stop()` issued while a `start()`
//! is establishing waits behind it instead of interrupting it.
//!
//! ```text
//!            start                 established
//! Stopped ─────────▶ Starting ───────────────▶ Running
//!    ▲                  │ no interface             │ stop / revoke
//!    │                  ▼                          ▼
//!    └──── stop ──── Failed              Stopping ──▶ Stopped
//! ```

use crate::engine::{EngineSignal, ProxyEngine, RouteTarget};
use crate::platform::{ForegroundHost, InterfaceSpec, PlatformError, TunInterface, VpnPlatform};
use crate::status::{StatusPresenter, StatusView};
use chrono::{DateTime, Local};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Tunnel state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl TunnelState {
    /// Check if the tunnel is up
    pub fn is_running(&self) -> bool {
        matches!(self, TunnelState::Running)
    }

    /// Check if a session is in progress
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TunnelState::Starting | TunnelState::Running | TunnelState::Stopping
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TunnelState::Failed)
    }
}

/// Tunnel errors
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("OS returned no tunnel interface")]
    NoInterface,

    #[error("Interface establishment aborted: {0}")]
    Aborted(String),
}

/// Result of a `start()` call that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Interface established; carries the engine's answer to the routing signal
    Started(EngineSignal),
    /// A session was already in progress in the given state
    AlreadyActive(TunnelState),
}

impl StartOutcome {
    pub fn engine_signal(&self) -> Option<&EngineSignal> {
        match self {
            StartOutcome::Started(signal) => Some(signal),
            StartOutcome::AlreadyActive(_) => None,
        }
    }
}

/// The one tunnel session. Only [`TunnelController`] constructs it.
pub struct TunnelSession {
    state: TunnelState,
    interface: Option<Box<dyn TunInterface>>,
    server_address: String,
    server_port: u16,
    dns_servers: Vec<IpAddr>,
    started_at: Option<DateTime<Local>>,
}

impl TunnelSession {
    fn new() -> Self {
        Self {
            state: TunnelState::Stopped,
            interface: None,
            server_address: String::new(),
            server_port: 0,
            dns_servers: Vec::new(),
            started_at: None,
        }
    }
}

/// Read-only view of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub state: TunnelState,
    pub interface_name: Option<String>,
    pub server_address: String,
    pub server_port: u16,
    pub dns_servers: Vec<IpAddr>,
    pub started_at: Option<DateTime<Local>>,
}

/// Closes the held interface when dropped, including during unwinding.
struct InterfaceGuard(Option<Box<dyn TunInterface>>);

impl InterfaceGuard {
    fn is_held(&self) -> bool {
        self.0.is_some()
    }

    fn close(mut self) {
        Self::close_interface(self.0.take());
    }

    fn close_interface(interface: Option<Box<dyn TunInterface>>) {
        if let Some(mut interface) = interface {
            let name = interface.name().to_string();
            match interface.close() {
                Ok(()) => debug!("Closed tunnel interface {}", name),
                Err(e) => error!("Failed to close tunnel interface {}: {}", name, e),
            }
        }
    }
}

impl Drop for InterfaceGuard {
    fn drop(&mut self) {
        Self::close_interface(self.0.take());
    }
}

/// Tunnel Controller
///
/// Sole owner of the [`TunnelSession`]:
/// - establishes the interface through the [`VpnPlatform`]
/// - promotes the process to foreground while running
/// - signals the [`ProxyEngine`] to start and stop routing
pub struct TunnelController {
    platform: Arc<dyn VpnPlatform>,
    engine: Arc<dyn ProxyEngine>,
    foreground: Arc<dyn ForegroundHost>,
    /// Excluded from routing
    package_name: String,
    /// Bound on each engine signal
    engine_timeout: Duration,
    /// Held for the whole of each transition
    session: Mutex<TunnelSession>,
    /// Mirror of the session state, readable mid-transition
    state: Arc<RwLock<TunnelState>>,
}

impl TunnelController {
    pub fn new(
        platform: Arc<dyn VpnPlatform>,
        engine: Arc<dyn ProxyEngine>,
        foreground: Arc<dyn ForegroundHost>,
        package_name: impl Into<String>,
        engine_timeout: Duration,
    ) -> Self {
        Self {
            platform,
            engine,
            foreground,
            package_name: package_name.into(),
            engine_timeout,
            session: Mutex::new(TunnelSession::new()),
            state: Arc::new(RwLock::new(TunnelState::Stopped)),
        }
    }

    /// Get current state
    pub async fn state(&self) -> TunnelState {
        *self.state.read().await
    }

    /// Shared handle to the state, for background tasks that must stop
    /// when the tunnel leaves `Running`.
    pub fn state_handle(&self) -> Arc<RwLock<TunnelState>> {
        self.state.clone()
    }

    /// Session details; waits for any in-flight transition.
    pub async fn session_info(&self) -> SessionInfo {
        let session = self.session.lock().await;
        SessionInfo {
            state: session.state,
            interface_name: session.interface.as_ref().map(|i| i.name().to_string()),
            server_address: session.server_address.clone(),
            server_port: session.server_port,
            dns_servers: session.dns_servers.clone(),
            started_at: session.started_at,
        }
    }

    /// Bring the tunnel up.
    ///
    /// A no-op returning [`StartOutcome::AlreadyActive`] while the tunnel
    /// runs; a call made during another transition waits for it first. Establishment failure leaves the controller `Failed`
    /// with every resource released. Engine signal failure is reported in
    /// the outcome and leaves the tunnel `Running`.
    pub async fn start(
        &self,
        server_address: &str,
        server_port: u16,
        dns_servers: &[IpAddr],
    ) -> Result<StartOutcome, TunnelError> {
        let mut session = self.session.lock().await;
        match session.state {
            TunnelState::Running => {
                warn!("Tunnel start ignored, session already {:?}", session.state);
                return Ok(StartOutcome::AlreadyActive(session.state));
            }
            // Every transition holds the session lock until it finishes, so
            // a mid-way state seen here belongs to a dropped start or stop.
            TunnelState::Starting | TunnelState::Stopping => {
                warn!("Recovering from abandoned {:?} transition", session.state);
                self.teardown(&mut session, TunnelState::Stopped).await;
            }
            TunnelState::Stopped | TunnelState::Failed => {}
        }

        info!("Starting tunnel via {}:{}", server_address, server_port);
        session.server_address = server_address.to_string();
        session.server_port = server_port;
        session.dns_servers = dns_servers.to_vec();
        self.set_state(&mut session, TunnelState::Starting).await;

        let interface = match self.establish(dns_servers).await {
            Ok(interface) => interface,
            Err(e) => {
                error!("Tunnel establishment failed: {}", e);
                self.teardown(&mut session, TunnelState::Failed).await;
                return Err(e);
            }
        };

        let target = RouteTarget {
            server_address: server_address.to_string(),
            server_port,
            interface_name: interface.name().to_string(),
        };
        info!("Tunnel interface {} established", target.interface_name);

        session.interface = Some(interface);
        session.started_at = Some(Local::now());
        self.set_state(&mut session, TunnelState::Running).await;

        let connected = StatusPresenter::render(&StatusView::connected(Default::default()));
        self.foreground.promote(&connected.notification);

        let signal = self.signal_start_routing(&target).await;
        Ok(StartOutcome::Started(signal))
    }

    /// Tear the tunnel down. Valid from any state.
    pub async fn stop(&self) {
        let mut session = self.session.lock().await;
        if session.state == TunnelState::Stopped && session.interface.is_none() {
            debug!("Tunnel already stopped");
            self.foreground.release();
            return;
        }

        info!("Stopping tunnel");
        self.teardown(&mut session, TunnelState::Stopped).await;
        info!("Tunnel stopped");
    }

    /// The OS revoked our tunnel permission.
    pub async fn revoke(&self) {
        warn!("Tunnel permission revoked by the system");
        self.stop().await;
    }

    async fn establish(
        &self,
        dns_servers: &[IpAddr],
    ) -> Result<Box<dyn TunInterface>, TunnelError> {
        let spec = InterfaceSpec::for_session(dns_servers, &self.package_name);
        let platform = self.platform.clone();
        let (tx, rx) = oneshot::channel();

        tokio::task::spawn_blocking(move || {
            // Nobody is left to own an interface that arrives after the
            // caller went away.
            if let Err(Ok(Some(interface))) = tx.send(platform.establish(&spec)) {
                warn!("Start abandoned during establishment, closing {}", interface.name());
                InterfaceGuard(Some(interface)).close();
            }
        });

        let established = rx.await.map_err(|e| TunnelError::Aborted(e.to_string()))?;
        established?.ok_or(TunnelError::NoInterface)
    }

    /// Engine stop, interface close, foreground release, then `final_state`.
    /// The interface is closed even if the engine signal panics or times out.
    async fn teardown(&self, session: &mut TunnelSession, final_state: TunnelState) {
        let guard = InterfaceGuard(session.interface.take());

        if guard.is_held() {
            self.set_state(session, TunnelState::Stopping).await;
            self.signal_stop_routing().await;
        }
        guard.close();

        self.foreground.release();
        session.started_at = None;
        self.set_state(session, final_state).await;
    }

    async fn signal_start_routing(&self, target: &RouteTarget) -> EngineSignal {
        match timeout(self.engine_timeout, self.engine.start_routing(target)).await {
            Ok(Ok(())) => {
                info!("Engine routing via {}:{}", target.server_address, target.server_port);
                EngineSignal::Acknowledged
            }
            Ok(Err(e)) => {
                warn!("Engine did not start routing, tunnel stays up: {}", e);
                EngineSignal::Failed(e.to_string())
            }
            Err(_) => {
                warn!(
                    "Engine start signal timed out after {:?}, tunnel stays up",
                    self.engine_timeout
                );
                EngineSignal::TimedOut
            }
        }
    }

    async fn signal_stop_routing(&self) {
        match timeout(self.engine_timeout, self.engine.stop_routing()).await {
            Ok(Ok(())) => debug!("Engine stopped routing"),
            Ok(Err(e)) => warn!("Engine stop signal failed: {}", e),
            Err(_) => warn!("Engine stop signal timed out after {:?}", self.engine_timeout),
        }
    }

    async fn set_state(&self, session: &mut TunnelSession, state: TunnelState) {
        session.state = state;
        *self.state.write().await = state;
    }
}

//! Session Orchestrator
//!
//! The facade every outer layer talks to. Composes config pre-flight,
//! the tunnel controller, status presentation and traffic polling, and
//! consumes the event bus.
//!
//! # Usage
//!
//! ```rust,ignore
//! let orchestrator = Arc::new(SessionOrchestrator::new(
//!     tunnel, engine, sink, preferences, bus.clone(), timing,
//! ));
//! let dispatcher = spawn_dispatcher(orchestrator.clone(), bus.subscribe(), Handle::current())?;
//!
//! orchestrator.start(SessionParams::default().with_config(config_path)).await?;
//! let status = orchestrator.current_status().await;
//! orchestrator.stop().await;
//! ```

use crate::engine::{EngineSignal, ProxyEngine};
use crate::events::{EventBus, SessionEvent};
use crate::poller::TrafficPoller;
use crate::status::{StatusAction, StatusPresenter, StatusSink, StatusView};
use crate::tunnel::{StartOutcome, TunnelController, TunnelError, TunnelState};
use crossbeam_channel::Receiver;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use verge_config::{ConfigError, ConfigValidator, PreferenceStore, ServiceSettings, SessionParams};

/// Errors surfaced to the caller of a session operation
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Config invalid: {}", path.display())]
    InvalidConfig { path: PathBuf },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),
}

/// Timing knobs, usually taken from [`ServiceSettings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    pub engine_timeout: Duration,
    pub poll_interval: Duration,
}

impl From<&ServiceSettings> for SessionTiming {
    fn from(settings: &ServiceSettings) -> Self {
        Self {
            engine_timeout: settings.engine_timeout(),
            poll_interval: settings.traffic_poll_interval(),
        }
    }
}

/// What a successful `start` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub outcome: StartOutcome,
    /// Engine answer to the config load, when a config document was used
    pub config_load: Option<EngineSignal>,
}

/// Snapshot for callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: TunnelState,
    pub view: StatusView,
}

impl SessionStatus {
    pub fn is_connected(&self) -> bool {
        self.view.connected
    }
}

/// Whether the dispatch loop should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchFlow {
    Continue,
    Shutdown,
}

pub struct SessionOrchestrator {
    tunnel: Arc<TunnelController>,
    engine: Arc<dyn ProxyEngine>,
    presenter: StatusPresenter,
    preferences: PreferenceStore,
    bus: EventBus,
    timing: SessionTiming,
    /// Serializes start/stop/restart as whole compositions
    transition: Mutex<()>,
    poller: StdMutex<Option<TrafficPoller>>,
    /// Params of the current or most recent session
    active_params: StdMutex<Option<SessionParams>>,
}

impl SessionOrchestrator {
    pub fn new(
        tunnel: Arc<TunnelController>,
        engine: Arc<dyn ProxyEngine>,
        sink: Arc<dyn StatusSink>,
        preferences: PreferenceStore,
        bus: EventBus,
        timing: SessionTiming,
    ) -> Self {
        Self {
            tunnel,
            engine,
            presenter: StatusPresenter::new(sink),
            preferences,
            bus,
            timing,
            transition: Mutex::new(()),
            poller: StdMutex::new(None),
            active_params: StdMutex::new(None),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn tunnel(&self) -> &Arc<TunnelController> {
        &self.tunnel
    }

    /// Show the initial (disconnected) status.
    pub fn present_initial(&self) {
        self.presenter.present(StatusView::disconnected());
    }

    pub async fn current_status(&self) -> SessionStatus {
        let state = self.tunnel.state().await;
        let view = self.presenter.current().unwrap_or_else(|| StatusView {
            connected: state.is_running(),
            ..StatusView::default()
        });
        SessionStatus { state, view }
    }

    /// Validate the config (if any), bring the tunnel up and present it.
    pub async fn start(&self, params: SessionParams) -> Result<SessionReport, SessionError> {
        let _transition = self.transition.lock().await;
        self.start_locked(params).await
    }

    /// Tear the tunnel down and present it.
    pub async fn stop(&self) {
        let _transition = self.transition.lock().await;
        self.stop_locked().await;
    }

    /// Stop then start, with no other transition in between.
    pub async fn restart(&self, params: SessionParams) -> Result<SessionReport, SessionError> {
        let _transition = self.transition.lock().await;
        info!("Restarting session");
        self.stop_locked().await;
        self.start_locked(params).await
    }

    /// Flip based on the actual tunnel state. Returns the resulting state.
    pub async fn toggle(&self) -> Result<TunnelState, SessionError> {
        let state = self.tunnel.state().await;
        if state.is_active() {
            self.stop().await;
        } else {
            self.start(self.resume_params()).await?;
        }
        Ok(self.tunnel.state().await)
    }

    /// The OS revoked tunnel permission.
    pub async fn revoke(&self) {
        let _transition = self.transition.lock().await;
        self.stop_poller();
        self.tunnel.revoke().await;
        self.presenter.present(StatusView::disconnected());
    }

    /// React to one bus event. Failures are logged, never returned.
    pub async fn dispatch(&self, event: SessionEvent) -> DispatchFlow {
        debug!("Dispatching {:?}", event);
        match event {
            SessionEvent::BootCompleted => {
                let params = self.preferences.load().auto_start_params();
                self.log_start(self.start(params).await);
            }
            SessionEvent::ConnectivityChanged { connected: false } => {
                debug!("Network lost, keeping tunnel as is");
            }
            SessionEvent::ConnectivityChanged { connected: true } => {
                match self.tunnel.state().await {
                    TunnelState::Running => {
                        let params = self.resume_params();
                        self.log_start(self.restart(params).await);
                    }
                    TunnelState::Failed => {
                        let params = self.resume_params();
                        self.log_start(self.start(params).await);
                    }
                    state => debug!("Network available, tunnel {:?}, nothing to do", state),
                }
            }
            SessionEvent::EngineStatus(traffic) => {
                if self.tunnel.state().await.is_running() {
                    self.presenter.present(StatusView::connected(traffic));
                }
            }
            SessionEvent::Action(StatusAction::Connect) => {
                self.log_start(self.start(self.resume_params()).await);
            }
            SessionEvent::Action(StatusAction::Disconnect) => self.stop().await,
            SessionEvent::Action(StatusAction::OpenApp) => {
                debug!("Open app requested");
            }
            SessionEvent::TileClicked => {
                if let Err(e) = self.toggle().await {
                    error!("Tile toggle failed: {}", e);
                }
            }
            SessionEvent::Revoked => self.revoke().await,
            SessionEvent::Shutdown => {
                self.stop().await;
                return DispatchFlow::Shutdown;
            }
        }
        DispatchFlow::Continue
    }

    async fn start_locked(&self, params: SessionParams) -> Result<SessionReport, SessionError> {
        let state = self.tunnel.state().await;
        if state.is_running() {
            warn!("Session start ignored, tunnel already {:?}", state);
            return Ok(SessionReport {
                outcome: StartOutcome::AlreadyActive(state),
                config_load: None,
            });
        }

        let config_load = match &params.config_path {
            Some(path) => {
                self.preflight(path, params.tolerate_invalid_config)?;
                Some(self.load_config(path).await)
            }
            None => None,
        };

        let outcome = match self
            .tunnel
            .start(&params.server_address, params.server_port, &params.dns_servers)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.presenter.present(StatusView::disconnected());
                return Err(e.into());
            }
        };

        if let StartOutcome::Started(_) = &outcome {
            self.presenter.present(StatusView::connected(Default::default()));
            self.record_session(&params);
            self.start_poller();
        }

        Ok(SessionReport { outcome, config_load })
    }

    async fn stop_locked(&self) {
        self.stop_poller();
        self.tunnel.stop().await;
        self.presenter.present(StatusView::disconnected());
    }

    /// Create the default document if missing, then validate and repair.
    fn preflight(&self, path: &Path, tolerate_invalid: bool) -> Result<(), SessionError> {
        match ConfigValidator::ensure_default(path) {
            Ok(_) => {}
            Err(e) if tolerate_invalid => warn!("Cannot create default config: {}", e),
            Err(e) => return Err(e.into()),
        }

        if ConfigValidator::validate_and_fix(path) {
            return Ok(());
        }
        if tolerate_invalid {
            warn!("Config {} invalid, continuing as requested", path.display());
            Ok(())
        } else {
            error!("Config {} invalid, not starting", path.display());
            Err(SessionError::InvalidConfig {
                path: path.to_path_buf(),
            })
        }
    }

    async fn load_config(&self, path: &Path) -> EngineSignal {
        match timeout(self.timing.engine_timeout, self.engine.load_config(path)).await {
            Ok(Ok(())) => {
                info!("Engine loaded config {}", path.display());
                EngineSignal::Acknowledged
            }
            Ok(Err(e)) => {
                warn!("Engine config load failed: {}", e);
                EngineSignal::Failed(e.to_string())
            }
            Err(_) => {
                warn!("Engine config load timed out after {:?}", self.timing.engine_timeout);
                EngineSignal::TimedOut
            }
        }
    }

    fn record_session(&self, params: &SessionParams) {
        *self
            .active_params
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(params.clone());

        if let Err(e) = self
            .preferences
            .update(|p| p.last_session = Some(params.clone()))
        {
            warn!("Failed to record last session: {}", e);
        }
    }

    /// Current session's params, else the stored ones, else defaults.
    fn resume_params(&self) -> SessionParams {
        self.active_params
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| self.preferences.load().auto_start_params())
    }

    fn start_poller(&self) {
        let poller = TrafficPoller::spawn(
            self.engine.clone(),
            self.tunnel.state_handle(),
            self.bus.clone(),
            self.timing.poll_interval,
            self.timing.engine_timeout,
        );
        *self.poller.lock().unwrap_or_else(PoisonError::into_inner) = Some(poller);
    }

    fn stop_poller(&self) {
        let poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(poller) = poller {
            poller.abort();
        }
    }

    fn log_start(&self, result: Result<SessionReport, SessionError>) {
        match result {
            Ok(report) => debug!("Session start: {:?}", report.outcome),
            Err(e) => error!("Session start failed: {}", e),
        }
    }
}

/// Run the dispatch loop on a dedicated thread, driving async work on
/// `runtime`. Ends after `Shutdown` or once every publisher is gone.
pub fn spawn_dispatcher(
    orchestrator: Arc<SessionOrchestrator>,
    events: Receiver<SessionEvent>,
    runtime: Handle,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("event-dispatch".to_string())
        .spawn(move || {
            info!("Event dispatch started");
            while let Ok(event) = events.recv() {
                if runtime.block_on(orchestrator.dispatch(event)) == DispatchFlow::Shutdown {
                    break;
                }
            }
            info!("Event dispatch stopped");
        })
}

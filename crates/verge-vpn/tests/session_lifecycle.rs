//! End-to-end session lifecycle through the public API.

use async_trait::async_trait;
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use verge_config::{PreferenceStore, SessionParams};
use verge_vpn::{
    EngineError, EventBus, ForegroundHost, InterfaceSpec, NotificationContent, PlatformError,
    ProxyEngine, RouteTarget, SessionEvent, SessionOrchestrator, SessionTiming, StatusAction,
    StatusSink, TileContent, TileState, TrafficSnapshot, TunInterface, TunnelController,
    TunnelState, VpnPlatform, spawn_dispatcher,
};

struct Interface {
    open: Arc<AtomicUsize>,
}

impl TunInterface for Interface {
    fn name(&self) -> &str {
        "tun7"
    }

    fn close(&mut self) -> Result<(), PlatformError> {
        self.open.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct Platform {
    open: Arc<AtomicUsize>,
    established: AtomicUsize,
}

impl VpnPlatform for Platform {
    fn establish(
        &self,
        _spec: &InterfaceSpec,
    ) -> Result<Option<Box<dyn TunInterface>>, PlatformError> {
        self.established.fetch_add(1, Ordering::SeqCst);
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Box::new(Interface {
            open: self.open.clone(),
        })))
    }
}

struct Foreground;

impl ForegroundHost for Foreground {
    fn promote(&self, _notification: &NotificationContent) {}
    fn release(&self) {}
}

struct Engine;

#[async_trait]
impl ProxyEngine for Engine {
    async fn load_config(&self, _path: &Path) -> Result<(), EngineError> {
        Ok(())
    }

    async fn start_routing(&self, _target: &RouteTarget) -> Result<(), EngineError> {
        Ok(())
    }

    async fn stop_routing(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn query_traffic(&self) -> Result<TrafficSnapshot, EngineError> {
        Ok(TrafficSnapshot::default())
    }
}

#[derive(Default)]
struct Surfaces {
    tiles: Mutex<Vec<TileContent>>,
}

impl StatusSink for Surfaces {
    fn show_notification(&self, _notification: &NotificationContent) {}

    fn update_tile(&self, tile: &TileContent) {
        self.tiles.lock().unwrap().push(tile.clone());
    }
}

struct Context {
    _tmp: TempDir,
    platform: Arc<Platform>,
    surfaces: Arc<Surfaces>,
    orchestrator: Arc<SessionOrchestrator>,
}

fn context() -> Context {
    let tmp = TempDir::new().unwrap();
    let platform = Arc::new(Platform::default());
    let surfaces = Arc::new(Surfaces::default());
    let engine = Arc::new(Engine);
    let timing = SessionTiming {
        engine_timeout: Duration::from_secs(1),
        poll_interval: Duration::from_millis(50),
    };
    let tunnel = Arc::new(TunnelController::new(
        platform.clone(),
        engine.clone(),
        Arc::new(Foreground),
        "io.github.clashverge.mobile",
        timing.engine_timeout,
    ));
    let orchestrator = Arc::new(SessionOrchestrator::new(
        tunnel,
        engine,
        surfaces.clone(),
        PreferenceStore::new(tmp.path().join("preferences.json")),
        EventBus::new(),
        timing,
    ));
    Context {
        _tmp: tmp,
        platform,
        surfaces,
        orchestrator,
    }
}

fn params() -> SessionParams {
    let dns: Vec<IpAddr> = vec!["1.1.1.1".parse().unwrap()];
    SessionParams::new("203.0.113.5", 443, dns)
}

#[tokio::test]
async fn test_start_then_stop_on_fresh_process() {
    let ctx = context();

    ctx.orchestrator.start(params()).await.unwrap();
    let status = ctx.orchestrator.current_status().await;
    assert_eq!(status.state, TunnelState::Running);
    assert!(status.is_connected());

    ctx.orchestrator.stop().await;
    let status = ctx.orchestrator.current_status().await;
    assert_eq!(status.state, TunnelState::Stopped);
    assert!(!status.is_connected());
    assert_eq!(ctx.platform.open.load(Ordering::SeqCst), 0);
    assert!(ctx.orchestrator.tunnel().session_info().await.interface_name.is_none());

    let tiles = ctx.surfaces.tiles.lock().unwrap();
    assert_eq!(tiles.first().unwrap().state, TileState::Active);
    assert_eq!(tiles.last().unwrap().state, TileState::Inactive);
}

#[tokio::test]
async fn test_repeated_start_creates_one_interface() {
    let ctx = context();

    ctx.orchestrator.start(params()).await.unwrap();
    ctx.orchestrator.start(params()).await.unwrap();

    assert_eq!(ctx.platform.established.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.orchestrator.current_status().await.state, TunnelState::Running);
    ctx.orchestrator.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_interleaved_calls_never_leave_handle_when_stopped() {
    let ctx = context();

    let mut tasks = Vec::new();
    for i in 0..16 {
        let orchestrator = ctx.orchestrator.clone();
        tasks.push(tokio::spawn(async move {
            if i % 3 == 0 {
                orchestrator.stop().await;
            } else {
                let _ = orchestrator.start(params()).await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    ctx.orchestrator.stop().await;

    let info = ctx.orchestrator.tunnel().session_info().await;
    assert_eq!(info.state, TunnelState::Stopped);
    assert!(info.interface_name.is_none());
    assert_eq!(ctx.platform.open.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_actions_through_dispatcher() {
    let ctx = context();
    let bus = ctx.orchestrator.bus().clone();
    let dispatcher = spawn_dispatcher(
        ctx.orchestrator.clone(),
        bus.subscribe(),
        tokio::runtime::Handle::current(),
    )
    .unwrap();

    bus.publish(SessionEvent::Action(StatusAction::Connect));
    bus.publish(SessionEvent::Action(StatusAction::Disconnect));
    bus.publish(SessionEvent::Shutdown);

    tokio::task::spawn_blocking(move || dispatcher.join().unwrap())
        .await
        .unwrap();

    assert_eq!(ctx.platform.established.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.orchestrator.current_status().await.state, TunnelState::Stopped);
}

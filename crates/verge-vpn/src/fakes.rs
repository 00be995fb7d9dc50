//! In-memory platform, engine and sink doubles for unit tests.

use crate::engine::{EngineError, ProxyEngine, RouteTarget, TrafficSnapshot};
use crate::platform::{ForegroundHost, InterfaceSpec, PlatformError, TunInterface, VpnPlatform};
use crate::status::{NotificationContent, StatusSink, TileContent};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct FakeInterface {
    open: Arc<AtomicUsize>,
}

impl TunInterface for FakeInterface {
    fn name(&self) -> &str {
        "tun0"
    }

    fn close(&mut self) -> Result<(), PlatformError> {
        self.open.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePlatform {
    refusing: AtomicBool,
    failing: bool,
    delay: Option<Duration>,
    open: Arc<AtomicUsize>,
    specs: Mutex<Vec<InterfaceSpec>>,
}

impl FakePlatform {
    /// Returns no interface
    pub fn refusing() -> Self {
        Self {
            refusing: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Fails with a permission error
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    pub fn specs(&self) -> Vec<InterfaceSpec> {
        self.specs.lock().unwrap().clone()
    }

    pub fn open_interfaces(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

impl VpnPlatform for FakePlatform {
    fn establish(
        &self,
        spec: &InterfaceSpec,
    ) -> Result<Option<Box<dyn TunInterface>>, PlatformError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.specs.lock().unwrap().push(spec.clone());
        if self.failing {
            return Err(PlatformError::PermissionDenied);
        }
        if self.refusing.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Box::new(FakeInterface {
            open: self.open.clone(),
        })))
    }
}

#[derive(Default)]
pub struct FakeForeground {
    promoted: AtomicBool,
}

impl FakeForeground {
    pub fn is_promoted(&self) -> bool {
        self.promoted.load(Ordering::SeqCst)
    }
}

impl ForegroundHost for FakeForeground {
    fn promote(&self, _notification: &NotificationContent) {
        self.promoted.store(true, Ordering::SeqCst);
    }

    fn release(&self) {
        self.promoted.store(false, Ordering::SeqCst);
    }
}

#[derive(Default, Clone, Copy, PartialEq, Eq)]
enum EngineMode {
    #[default]
    Healthy,
    Failing,
    Hanging,
}

#[derive(Default)]
pub struct FakeEngine {
    mode: EngineMode,
    traffic: Mutex<TrafficSnapshot>,
    loaded: Mutex<Vec<PathBuf>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl FakeEngine {
    pub fn failing() -> Self {
        Self {
            mode: EngineMode::Failing,
            ..Self::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            mode: EngineMode::Hanging,
            ..Self::default()
        }
    }

    pub fn set_traffic(&self, traffic: TrafficSnapshot) {
        *self.traffic.lock().unwrap() = traffic;
    }

    pub fn loaded_configs(&self) -> Vec<PathBuf> {
        self.loaded.lock().unwrap().clone()
    }

    pub fn start_calls(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    async fn answer(&self) -> Result<(), EngineError> {
        match self.mode {
            EngineMode::Healthy => Ok(()),
            EngineMode::Failing => Err(EngineError::Connect("connection refused".to_string())),
            EngineMode::Hanging => std::future::pending().await,
        }
    }
}

#[async_trait]
impl ProxyEngine for FakeEngine {
    async fn load_config(&self, path: &Path) -> Result<(), EngineError> {
        self.loaded.lock().unwrap().push(path.to_path_buf());
        self.answer().await
    }

    async fn start_routing(&self, _target: &RouteTarget) -> Result<(), EngineError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.answer().await
    }

    async fn stop_routing(&self) -> Result<(), EngineError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.answer().await
    }

    async fn query_traffic(&self) -> Result<TrafficSnapshot, EngineError> {
        self.answer().await?;
        Ok(*self.traffic.lock().unwrap())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    notifications: Mutex<Vec<NotificationContent>>,
    tiles: Mutex<Vec<TileContent>>,
}

impl RecordingSink {
    pub fn notifications(&self) -> Vec<NotificationContent> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn tile_updates(&self) -> usize {
        self.tiles.lock().unwrap().len()
    }

    pub fn last_tile(&self) -> Option<TileContent> {
        self.tiles.lock().unwrap().last().cloned()
    }
}

impl StatusSink for RecordingSink {
    fn show_notification(&self, notification: &NotificationContent) {
        self.notifications.lock().unwrap().push(notification.clone());
    }

    fn update_tile(&self, tile: &TileContent) {
        self.tiles.lock().unwrap().push(tile.clone());
    }
}

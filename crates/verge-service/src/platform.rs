//! Host-side platform adapters.
//!
//! On a desktop host there is no OS VPN service to hand the
//! `InterfaceSpec` to, so establishment is simulated and the status surfaces are
//! rendered into the log.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::info;
use verge_vpn::{
    ForegroundHost, InterfaceSpec, NotificationContent, PlatformError, StatusSink, TileContent,
    TunInterface, VpnPlatform,
};

/// Simulated interface; logs its lifecycle.
struct HostInterface {
    name: String,
}

impl TunInterface for HostInterface {
    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<(), PlatformError> {
        info!("Interface {} closed", self.name);
        Ok(())
    }
}

#[derive(Default)]
pub struct HostPlatform {
    next_index: AtomicU32,
    /// Set while VPN permission is withheld
    denied: AtomicBool,
}

impl HostPlatform {
    pub fn set_permission(&self, granted: bool) {
        self.denied.store(!granted, Ordering::SeqCst);
    }
}

impl VpnPlatform for HostPlatform {
    fn establish(
        &self,
        spec: &InterfaceSpec,
    ) -> Result<Option<Box<dyn TunInterface>>, PlatformError> {
        if self.denied.load(Ordering::SeqCst) {
            return Err(PlatformError::PermissionDenied);
        }

        let name = format!("tun{}", self.next_index.fetch_add(1, Ordering::SeqCst));
        info!(
            "Interface {} up: session={} addr={}/{} mtu={} dns={:?} excluded={:?}",
            name,
            spec.session_name,
            spec.address.0,
            spec.address.1,
            spec.mtu,
            spec.dns_servers,
            spec.disallowed_applications
        );
        Ok(Some(Box::new(HostInterface { name })))
    }
}

#[derive(Default)]
pub struct HostForeground {
    promoted: AtomicBool,
}

impl ForegroundHost for HostForeground {
    fn promote(&self, notification: &NotificationContent) {
        if !self.promoted.swap(true, Ordering::SeqCst) {
            info!("Foreground promotion: {}", notification.title);
        }
    }

    fn release(&self) {
        if self.promoted.swap(false, Ordering::SeqCst) {
            info!("Foreground promotion released");
        }
    }
}

/// Renders both surfaces as log lines.
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn show_notification(&self, notification: &NotificationContent) {
        let actions: Vec<&str> = notification.actions.iter().map(|a| a.label()).collect();
        info!(
            "[notification #{} {}] {} | {} {:?}",
            notification.id, notification.channel, notification.title, notification.text, actions
        );
    }

    fn update_tile(&self, tile: &TileContent) {
        info!("[tile {:?}] {} | {}", tile.state, tile.label, tile.subtitle);
    }
}


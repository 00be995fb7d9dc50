//! Boot and network triggers.
//!
//! Translate OS broadcasts into bus events, gated on the user's stored
//! preferences. A missing preference file means every gate is closed.

use crate::events::{EventBus, SessionEvent};
use tracing::{debug, info};
use verge_config::PreferenceStore;

/// Boot-related broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootBroadcast {
    BootCompleted,
    QuickBootPowerOn,
    PackageReplaced,
}

impl BootBroadcast {
    /// Map an OS action string.
    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "android.intent.action.BOOT_COMPLETED" => Some(Self::BootCompleted),
            "android.intent.action.QUICKBOOT_POWERON" => Some(Self::QuickBootPowerOn),
            "android.intent.action.MY_PACKAGE_REPLACED" => Some(Self::PackageReplaced),
            _ => None,
        }
    }
}

pub struct BootTrigger {
    preferences: PreferenceStore,
    bus: EventBus,
}

impl BootTrigger {
    pub fn new(preferences: PreferenceStore, bus: EventBus) -> Self {
        Self { preferences, bus }
    }

    /// Returns true when a `BootCompleted` event was published.
    pub fn on_broadcast(&self, broadcast: BootBroadcast) -> bool {
        match broadcast {
            BootBroadcast::BootCompleted | BootBroadcast::QuickBootPowerOn => {
                if !self.preferences.auto_start_on_boot() {
                    debug!("Boot completed, auto-start disabled");
                    return false;
                }
                info!("Boot completed, auto-starting tunnel");
                self.bus.publish(SessionEvent::BootCompleted);
                true
            }
            BootBroadcast::PackageReplaced => {
                info!("Package replaced");
                false
            }
        }
    }
}

pub struct NetworkTrigger {
    preferences: PreferenceStore,
    bus: EventBus,
}

impl NetworkTrigger {
    pub fn new(preferences: PreferenceStore, bus: EventBus) -> Self {
        Self { preferences, bus }
    }

    /// Returns true when a `ConnectivityChanged` event was published.
    pub fn on_connectivity_changed(&self, connected: bool) -> bool {
        if !self.preferences.reconnect_on_network_change() {
            debug!("Connectivity changed (connected: {}), reconnect disabled", connected);
            return false;
        }
        info!("Connectivity changed (connected: {})", connected);
        self.bus.publish(SessionEvent::ConnectivityChanged { connected });
        true
    }
}

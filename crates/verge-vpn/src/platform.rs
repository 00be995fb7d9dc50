//! OS seams: tunnel interface establishment and foreground promotion.
//!
//! The host runtime implements these traits. Everything above them treats
//! the interface handle as an opaque resource that must be closed exactly
//! once.

use crate::status::NotificationContent;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Session name shown by the OS for our tunnel
pub const SESSION_NAME: &str = "Clash Verge";

/// Private point-to-point address of the tunnel interface
pub const INTERFACE_ADDRESS: (Ipv4Addr, u8) = (Ipv4Addr::new(172, 19, 0, 1), 30);

/// Interface MTU
pub const INTERFACE_MTU: u16 = 1500;

/// Platform errors
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("VPN permission not granted")]
    PermissionDenied,

    #[error("Interface establishment failed: {0}")]
    Establish(String),

    #[error("Interface close failed: {0}")]
    Close(String),
}

/// Parameters handed to the OS when establishing the tunnel interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSpec {
    pub session_name: String,
    pub address: (IpAddr, u8),
    pub routes: Vec<(IpAddr, u8)>,
    pub mtu: u16,
    pub blocking: bool,
    pub dns_servers: Vec<IpAddr>,
    /// Applications whose traffic bypasses the tunnel
    pub disallowed_applications: Vec<String>,
}

impl InterfaceSpec {
    /// Full-device tunnel that excludes `own_package` to avoid routing
    /// the engine's own traffic back into itself.
    pub fn for_session(dns_servers: &[IpAddr], own_package: &str) -> Self {
        Self {
            session_name: SESSION_NAME.to_string(),
            address: (IpAddr::V4(INTERFACE_ADDRESS.0), INTERFACE_ADDRESS.1),
            routes: vec![(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)],
            mtu: INTERFACE_MTU,
            blocking: false,
            dns_servers: dns_servers.to_vec(),
            disallowed_applications: vec![own_package.to_string()],
        }
    }
}

/// An established tunnel interface.
pub trait TunInterface: Send {
    /// OS name of the interface (e.g. `tun0`)
    fn name(&self) -> &str;

    /// Release the OS resource. Called at most once.
    fn close(&mut self) -> Result<(), PlatformError>;
}

/// Establishes tunnel interfaces.
pub trait VpnPlatform: Send + Sync {
    /// Blocking. `Ok(None)` means the OS returned no interface, which
    /// happens when permission was revoked between prepare and establish.
    fn establish(
        &self,
        spec: &InterfaceSpec,
    ) -> Result<Option<Box<dyn TunInterface>>, PlatformError>;
}

/// Keeps the process alive while a tunnel is up.
pub trait ForegroundHost: Send + Sync {
    fn promote(&self, notification: &NotificationContent);

    /// Idempotent.
    fn release(&self);
}

//! Parameters for one tunnel session.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

/// What a caller asks the session controller to start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParams {
    /// Upstream proxy server address handed to the engine
    pub server_address: String,
    /// Upstream proxy server port
    pub server_port: u16,
    /// DNS servers pushed into the tunnel, in order
    pub dns_servers: Vec<IpAddr>,
    /// Engine config document, when launching with a file-backed config
    #[serde(default)]
    pub config_path: Option<PathBuf>,
    /// Proceed even if the config document is unreadable or unrepairable
    #[serde(default)]
    pub tolerate_invalid_config: bool,
}

impl SessionParams {
    pub fn new(
        server_address: impl Into<String>,
        server_port: u16,
        dns_servers: Vec<IpAddr>,
    ) -> Self {
        Self {
            server_address: server_address.into(),
            server_port,
            dns_servers,
            config_path: None,
            tolerate_invalid_config: false,
        }
    }

    pub fn with_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn tolerating_invalid_config(mut self) -> Self {
        self.tolerate_invalid_config = true;
        self
    }
}

impl Default for SessionParams {
    /// Local mixed port with Google DNS.
    fn default() -> Self {
        Self::new(
            "127.0.0.1",
            7897,
            vec![
                IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
                IpAddr::V4(Ipv4Addr::new(8, 8, 4, 4)),
            ],
        )
    }
}

//! Control API Client
//!
//! [`ProxyEngine`] over the engine's local HTTP control surface. One
//! HTTP/1.1 connection per call; every call is bounded by the configured
//! timeout.

use crate::engine::{EngineError, ProxyEngine, RouteTarget, TrafficSnapshot};
use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{AUTHORIZATION, CONTENT_TYPE, HOST};
use hyper::{Method, Request, Response};
use std::net::Ipv6Addr;
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, warn};
use verge_config::{ConfigValidator, ControlAddress};

pub struct ControlApiClient {
    address: ControlAddress,
    /// Dialed instead of loopback when the directive binds a wildcard
    dial_host: Option<String>,
    secret: Option<String>,
    timeout: Duration,
}

impl ControlApiClient {
    pub fn new(address: ControlAddress, timeout: Duration) -> Self {
        Self {
            address,
            dial_host: None,
            secret: None,
            timeout,
        }
    }

    /// Client for the controller declared in the config document at `path`,
    /// authenticating with the document's `secret:` when one is set.
    pub fn from_config(path: &Path, timeout: Duration) -> Self {
        Self::new(ConfigValidator::extract_control_address(path), timeout)
            .with_secret(ConfigValidator::extract_control_secret(path))
    }

    /// Send `Authorization: Bearer <secret>`; an empty secret sends nothing.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        self.secret = (!secret.is_empty()).then_some(secret);
        self
    }

    pub fn with_dial_host(mut self, host: impl Into<String>) -> Self {
        self.dial_host = Some(host.into());
        self
    }

    pub fn address(&self) -> &ControlAddress {
        &self.address
    }

    /// Engine version string from `GET /version`.
    pub async fn version(&self) -> Result<String, EngineError> {
        let bytes = self.call(Method::GET, "/version", None).await?;
        let value: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| EngineError::Decode(e.to_string()))?;
        Ok(value
            .get("version")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    /// Full round trip: send, check status, collect the body.
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Bytes, EngineError> {
        tokio::time::timeout(self.timeout, self.collect(method, path, body))
            .await
            .map_err(|_| EngineError::Timeout)?
    }

    /// Send and read only the first data frame, for streaming endpoints.
    async fn first_frame(&self, path: &str) -> Result<Bytes, EngineError> {
        tokio::time::timeout(self.timeout, self.read_first_frame(path))
            .await
            .map_err(|_| EngineError::Timeout)?
    }

    async fn collect(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Bytes, EngineError> {
        let response = self.send(method, path, body).await?;
        let collected = response
            .into_body()
            .collect()
            .await
            .map_err(|e| EngineError::Body(e.to_string()))?;
        Ok(collected.to_bytes())
    }

    async fn read_first_frame(&self, path: &str) -> Result<Bytes, EngineError> {
        let mut body = self.send(Method::GET, path, None).await?.into_body();
        loop {
            let frame = body
                .frame()
                .await
                .ok_or_else(|| EngineError::Body("stream ended before first frame".to_string()))?
                .map_err(|e| EngineError::Body(e.to_string()))?;
            if let Ok(data) = frame.into_data() {
                return Ok(data);
            }
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Response<Incoming>, EngineError> {
        let host = match &self.dial_host {
            Some(host) if self.address.is_wildcard() => host.as_str(),
            _ => self.address.connect_host(),
        };
        let authority = authority(host, self.address.port);

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(path)
            .header(HOST, &authority);
        if let Some(secret) = &self.secret {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", secret));
        }
        if body.is_some() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        let request = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| EngineError::Http(e.to_string()))?;

        let stream = TcpStream::connect(&authority)
            .await
            .map_err(|e| EngineError::Connect(e.to_string()))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| EngineError::Http(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Control API connection closed: {}", e);
            }
        });

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| EngineError::Http(e.to_string()))?;

        let status = response.status();
        debug!("Control API {} {} -> {}", method, path, status);
        if !status.is_success() {
            return Err(EngineError::Status(status.as_u16()));
        }
        Ok(response)
    }
}

/// `host:port`, bracketing bare IPv6 literals.
fn authority(host: &str, port: u16) -> String {
    if host.parse::<Ipv6Addr>().is_ok() {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

#[async_trait]
impl ProxyEngine for ControlApiClient {
    async fn load_config(&self, path: &Path) -> Result<(), EngineError> {
        let absolute = std::path::absolute(path).map_err(|e| EngineError::Http(e.to_string()))?;
        let body = serde_json::json!({ "path": absolute.display().to_string() });
        let bytes = serde_json::to_vec(&body).map_err(|e| EngineError::Decode(e.to_string()))?;

        self.call(Method::PUT, "/configs?force=true", Some(bytes)).await?;
        Ok(())
    }

    /// The engine owns the data path; routing is ready once its control
    /// surface answers.
    async fn start_routing(&self, target: &RouteTarget) -> Result<(), EngineError> {
        let version = self.version().await?;
        debug!(
            "Engine {} ready to route {} via {}:{}",
            version, target.interface_name, target.server_address, target.server_port
        );
        Ok(())
    }

    async fn stop_routing(&self) -> Result<(), EngineError> {
        self.call(Method::DELETE, "/connections", None).await?;
        Ok(())
    }

    async fn query_traffic(&self) -> Result<TrafficSnapshot, EngineError> {
        let data = self.first_frame("/traffic").await?;
        let line = data
            .split(|b| *b == b'\n')
            .find(|line| !line.is_empty())
            .unwrap_or_default();
        serde_json::from_slice(line).map_err(|e| {
            warn!("Unreadable traffic frame: {}", String::from_utf8_lossy(&data));
            EngineError::Decode(e.to_string())
        })
    }
}

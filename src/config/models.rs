// src/config/models.rs
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub rotation: RotationMode,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Path prefix reserved for worker registration and removal.
    pub admin_prefix: String,
    /// Also treat mutating calls for a host without workers as admin calls.
    pub legacy_admin: bool,
    /// Largest admin request body accepted, in bytes.
    pub max_admin_body_bytes: usize,
    /// How long open connections may keep running after shutdown starts.
    pub shutdown_timeout_ms: u64,
}

impl ServerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8081)),
            admin_prefix: "/_balancer".to_string(),
            legacy_admin: true,
            max_admin_body_bytes: 16 * 1024,
            shutdown_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            connect_timeout_ms: 5_000,
        }
    }
}

/// How the per-host cursor moves past the worker that served a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationMode {
    /// Read the cursor on selection, advance it from a spawned task once the
    /// upstream answered. Concurrent requests may share a worker.
    #[default]
    Deferred,
    /// Select and advance under the host lock in one step.
    Atomic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
            path: "/metrics".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "host_balancer=info,hyper=info".to_string(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.upstream.timeout_ms == 0 {
            bail!("upstream.timeout_ms must be greater than zero");
        }
        if self.upstream.connect_timeout_ms == 0 {
            bail!("upstream.connect_timeout_ms must be greater than zero");
        }

        let prefix = &self.server.admin_prefix;
        if !prefix.starts_with('/') || prefix.len() < 2 || prefix.ends_with('/') {
            bail!(
                "server.admin_prefix must be an absolute path without a trailing slash, got {:?}",
                prefix
            );
        }

        if self.server.max_admin_body_bytes == 0 {
            bail!("server.max_admin_body_bytes must be greater than zero");
        }

        if !self.metrics.path.starts_with('/') {
            bail!("metrics.path must start with '/', got {:?}", self.metrics.path);
        }
        if self.metrics.enabled && self.metrics.port == self.server.listen.port() {
            bail!(
                "metrics.port {} collides with the listener port",
                self.metrics.port
            );
        }

        Ok(())
    }
}

// src/registry/worker.rs
use serde::{Deserialize, Serialize};
use std::fmt;

/// An upstream server registered for one virtual host.
///
/// Field names follow the admin wire format: `Host`, `Address`, `Port`,
/// `HealthcheckPath`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Worker {
    pub host: String,
    pub address: String,
    pub port: u16,
    /// Stored and listed, never probed.
    #[serde(default)]
    pub healthcheck_path: String,
}

impl Worker {
    pub fn new(host: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            address: address.into(),
            port,
            healthcheck_path: String::new(),
        }
    }

    /// Two workers are the same backend when address and port match; the
    /// host they are registered under is not part of the identity.
    pub fn same_endpoint(&self, other: &Worker) -> bool {
        self.address == other.address && self.port == other.port
    }

    /// `address:port`, bracketing bare IPv6 addresses so the result is a
    /// valid URI authority.
    pub fn authority(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

impl fmt::Display for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

//! Configuration for the proxy server
//!
//! This module provides configuration options for the audit proxy. Values
//! come from an optional config file layered with `DB_AUDIT_*` environment
//! variables; command-line flags are applied on top in `main`.

use crate::audit::AuditTarget;
use crate::error::{ProxyError, Result};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};

/// Environment variable prefix for configuration values
pub const ENV_PREFIX: &str = "DB_AUDIT";

/// Proxy configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Local address to listen on
    pub bind_host: String,

    /// Local port to listen on
    pub bind_port: u16,

    /// Upstream database host
    pub remote_host: String,

    /// Upstream database port
    pub remote_port: u16,

    /// Where decoded events are recorded
    pub audit_log: AuditTarget,

    /// Dump every relayed chunk at trace level
    pub hexdump: bool,

    /// Log level
    pub log_level: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            bind_port: 8080,
            remote_host: String::new(),
            remote_port: 0,
            audit_log: AuditTarget::default(),
            hexdump: false,
            log_level: "info".to_string(),
        }
    }
}

impl ProxyConfig {
    /// Create a new proxy configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a file (TOML, YAML or JSON), layered with
    /// `DB_AUDIT_*` environment variables
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix(ENV_PREFIX))
            .build()
            .map_err(|e| ProxyError::Config(format!("Failed to load {}: {}", path, e)))?;

        settings
            .try_deserialize()
            .map_err(|e| ProxyError::Config(format!("Invalid configuration in {}: {}", path, e)))
    }

    /// Check that everything needed to start the listener is present
    pub fn validate(&self) -> Result<()> {
        if self.remote_host.trim().is_empty() {
            return Err(ProxyError::Config("remote host is required".to_string()));
        }
        if self.remote_port == 0 {
            return Err(ProxyError::Config("remote port is required".to_string()));
        }
        self.bind_addr()?;
        Ok(())
    }

    /// Address the listener binds to
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.bind_host.trim().parse()?;
        Ok(SocketAddr::new(ip, self.bind_port))
    }

    /// Upstream host and port
    pub fn upstream(&self) -> (&str, u16) {
        (self.remote_host.trim(), self.remote_port)
    }

    /// Configuration used by tests: ephemeral bind port, no audit file
    pub fn for_testing(remote: SocketAddr) -> Self {
        Self {
            bind_port: 0,
            remote_host: remote.ip().to_string(),
            remote_port: remote.port(),
            audit_log: AuditTarget::Null,
            log_level: "debug".to_string(),
            ..Default::default()
        }
    }
}

//! Configuration module for echoprobe.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::net::IpAddr;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address to bind the HTTP server to (default: 0.0.0.0)
    pub listen_addr: IpAddr,
    /// HTTP port for the web server (default: 9427)
    pub http_port: u16,
    /// Path of the probe endpoint (default: "/probe")
    pub probe_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: IpAddr::from([0, 0, 0, 0]),
            http_port: 9427,
            probe_path: "/probe".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `ECHOPROBE_LISTEN_ADDR`: bind address (default: 0.0.0.0)
    /// - `ECHOPROBE_HTTP_PORT`: HTTP port (default: 9427)
    /// - `ECHOPROBE_PROBE_PATH`: probe endpoint path (default: "/probe")
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(addr_str) = lookup("ECHOPROBE_LISTEN_ADDR") {
            match addr_str.parse() {
                Ok(addr) => cfg.listen_addr = addr,
                Err(_) => tracing::warn!("Ignoring invalid ECHOPROBE_LISTEN_ADDR {:?}", addr_str),
            }
        }

        if let Some(port_str) = lookup("ECHOPROBE_HTTP_PORT") {
            match port_str.parse() {
                Ok(port) => cfg.http_port = port,
                Err(_) => tracing::warn!("Ignoring invalid ECHOPROBE_HTTP_PORT {:?}", port_str),
            }
        }

        if let Some(path) = lookup("ECHOPROBE_PROBE_PATH") {
            if path.starts_with('/') && path.len() > 1 && path != "/healthz" {
                cfg.probe_path = path;
            } else {
                tracing::warn!("Ignoring invalid ECHOPROBE_PROBE_PATH {:?}", path);
            }
        }

        cfg
    }
}

//! Listener configuration
//!
//! Loaded from TOML; every field except the credentials has a default so a
//! minimal file only needs `[ami] username` and `secret`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{
    constants::{
        DEFAULT_AMI_PORT, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_READ_TIMEOUT_MS,
        DEFAULT_RECONNECT_DELAY_MS, DEFAULT_RELAY_TIMEOUT_MS,
    },
    error::{AmiError, AmiResult},
    listener::ListenerConfig,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ami: AmiConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Connection to the Asterisk manager interface
#[derive(Clone, Serialize, Deserialize)]
pub struct AmiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub secret: String,

    /// TCP connect bound in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Per-read bound in milliseconds, also the stop latency
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Fixed delay between reconnect attempts in milliseconds
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Mask sent in an `Events` action after login (e.g. `call,agent`)
    #[serde(default)]
    pub event_mask: Option<String>,
}

impl std::fmt::Debug for AmiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmiConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"[REDACTED]")
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("read_timeout_ms", &self.read_timeout_ms)
            .field("reconnect_delay_ms", &self.reconnect_delay_ms)
            .field("event_mask", &self.event_mask)
            .finish()
    }
}

/// Forwarding of events to an HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Endpoint receiving one JSON POST per event; relay is off when unset
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_relay_timeout")]
    pub timeout_ms: u64,

    /// Event types to forward; empty forwards every event
    #[serde(default)]
    pub event_types: Vec<String>,
}

fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { DEFAULT_AMI_PORT }
fn default_connect_timeout() -> u64 { DEFAULT_CONNECT_TIMEOUT_MS }
fn default_read_timeout() -> u64 { DEFAULT_READ_TIMEOUT_MS }
fn default_reconnect_delay() -> u64 { DEFAULT_RECONNECT_DELAY_MS }
fn default_relay_timeout() -> u64 { DEFAULT_RELAY_TIMEOUT_MS }

impl Default for AmiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: String::new(),
            secret: String::new(),
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
            reconnect_delay_ms: default_reconnect_delay(),
            event_mask: None,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_relay_timeout(),
            event_types: Vec::new(),
        }
    }
}

impl RelayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> AmiResult<Self> {
        toml::from_str(content).map_err(|e| AmiError::config_error(e.to_string()))
    }

    /// Read `path`, or return defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> AmiResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| AmiError::config_error(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Reject configurations the listener cannot run with.
    pub fn validate(&self) -> AmiResult<()> {
        if self.ami.host.trim().is_empty() {
            return Err(AmiError::config_error("ami.host is empty"));
        }
        if self.ami.username.is_empty() {
            return Err(AmiError::config_error("ami.username is required"));
        }
        if self.ami.read_timeout_ms == 0 {
            return Err(AmiError::config_error("ami.read_timeout_ms must be positive"));
        }
        if let Some(url) = &self.relay.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(AmiError::config_error(format!(
                    "relay.url must be http(s): {}",
                    url
                )));
            }
        }
        Ok(())
    }

    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            host: self.ami.host.clone(),
            port: self.ami.port,
            username: self.ami.username.clone(),
            secret: self.ami.secret.clone(),
            connect_timeout: Duration::from_millis(self.ami.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.ami.read_timeout_ms),
            reconnect_delay: Duration::from_millis(self.ami.reconnect_delay_ms),
            event_mask: self
                .ami
                .event_mask
                .clone(),
        }
    }
}

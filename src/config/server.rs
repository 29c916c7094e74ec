//! Server configuration types
//!
//! Defines the listener, SOCKS5 policy and timeout settings.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// SOCKS5 policy
    #[serde(default)]
    pub socks: SocksConfig,
}

impl Config {
    /// Validate the whole configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.server.listen_addr.is_empty() {
            return Err("listen_addr must not be empty".to_string());
        }
        self.socks.validate()
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:1080".to_string()
}

fn default_backlog() -> u32 {
    1024
}

/// Listener configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Address to accept SOCKS5 clients on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: u32,

    /// Socket options for client and upstream TCP connections
    #[serde(default)]
    pub tcp: TcpConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_addr: default_listen_addr(),
            backlog: default_backlog(),
            tcp: TcpConfig::default(),
        }
    }
}

/// Default keepalive seconds
fn default_keepalive_secs() -> u64 {
    20
}

/// Default keepalive interval
fn default_keepalive_interval() -> u64 {
    8
}

fn default_true() -> bool {
    true
}

/// TCP socket configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TcpConfig {
    /// Enable TCP_NODELAY
    #[serde(default = "default_true")]
    pub nodelay: bool,

    /// TCP keepalive timeout in seconds
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// TCP keepalive interval in seconds
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig {
            nodelay: true,
            keepalive_secs: default_keepalive_secs(),
            keepalive_interval: default_keepalive_interval(),
        }
    }
}

/// A username/password pair accepted by the server
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UserConfig {
    /// Username (1 to 255 bytes)
    pub username: String,
    /// Password (at most 255 bytes)
    pub password: String,
}

fn default_relay_buffer_size() -> usize {
    8192
}

/// SOCKS5 server configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SocksConfig {
    /// Refuse clients that cannot do username/password
    #[serde(default)]
    pub auth_required: bool,

    /// Accepted users
    #[serde(default)]
    pub users: Vec<UserConfig>,

    /// Choose no-auth over username/password when a client offers both
    #[serde(default)]
    pub prefer_no_auth: bool,

    /// Allow the BIND command
    #[serde(default = "default_true")]
    pub allow_bind: bool,

    /// Allow the UDP ASSOCIATE command
    #[serde(default = "default_true")]
    pub allow_udp: bool,

    /// Only dial IPv4 candidates
    #[serde(default)]
    pub ipv4_only: bool,

    /// Only dial IPv6 candidates
    #[serde(default)]
    pub ipv6_only: bool,

    /// Local address for outbound CONNECT sockets
    #[serde(default)]
    pub outbound_bind_addr: Option<IpAddr>,

    /// Only accept a BIND peer whose IP matches the request's DST.ADDR
    #[serde(default)]
    pub bind_validate_peer: bool,

    /// Only accept client datagrams from the control connection's IP
    #[serde(default = "default_true")]
    pub udp_validate_source: bool,

    /// Per-direction copy buffer size
    #[serde(default = "default_relay_buffer_size")]
    pub relay_buffer_size: usize,

    /// Stage timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl Default for SocksConfig {
    fn default() -> Self {
        Self {
            auth_required: false,
            users: Vec::new(),
            prefer_no_auth: false,
            allow_bind: true,
            allow_udp: true,
            ipv4_only: false,
            ipv6_only: false,
            outbound_bind_addr: None,
            bind_validate_peer: false,
            udp_validate_source: true,
            relay_buffer_size: default_relay_buffer_size(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl SocksConfig {
    /// Check if authentication credentials are configured
    pub fn has_credentials(&self) -> bool {
        !self.users.is_empty()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.auth_required && !self.has_credentials() {
            return Err("Authentication required but no users configured".to_string());
        }
        for user in &self.users {
            if user.username.is_empty() || user.username.len() > 255 {
                return Err(format!(
                    "Username must be 1 to 255 bytes: {:?}",
                    user.username
                ));
            }
            if user.password.len() > 255 {
                return Err(format!(
                    "Password for {} exceeds 255 bytes",
                    user.username
                ));
            }
        }
        if self.ipv4_only && self.ipv6_only {
            return Err("ipv4_only and ipv6_only are mutually exclusive".to_string());
        }
        if self.relay_buffer_size == 0 {
            return Err("relay_buffer_size must be positive".to_string());
        }
        self.timeouts.validate()
    }
}

fn default_stage_timeout() -> u64 {
    10
}

fn default_bind_accept_timeout() -> u64 {
    60
}

fn default_shutdown_grace() -> u64 {
    5
}

/// Per-stage timeouts in seconds; all must be non-zero
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Reading the method-selection message
    #[serde(default = "default_stage_timeout")]
    pub handshake: u64,

    /// Username/password sub-negotiation
    #[serde(default = "default_stage_timeout")]
    pub auth: u64,

    /// Reading the request
    #[serde(default = "default_stage_timeout")]
    pub request: u64,

    /// DNS resolution
    #[serde(default = "default_stage_timeout")]
    pub resolve: u64,

    /// Each outbound connection attempt
    #[serde(default = "default_stage_timeout")]
    pub dial: u64,

    /// Waiting for the BIND peer
    #[serde(default = "default_bind_accept_timeout")]
    pub bind_accept: u64,

    /// How long the relay waits for the second direction to drain
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            handshake: default_stage_timeout(),
            auth: default_stage_timeout(),
            request: default_stage_timeout(),
            resolve: default_stage_timeout(),
            dial: default_stage_timeout(),
            bind_accept: default_bind_accept_timeout(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

impl TimeoutConfig {
    /// Reject zero timeouts
    pub fn validate(&self) -> Result<(), String> {
        let fields = [
            ("handshake", self.handshake),
            ("auth", self.auth),
            ("request", self.request),
            ("resolve", self.resolve),
            ("dial", self.dial),
            ("bind_accept", self.bind_accept),
            ("shutdown_grace", self.shutdown_grace),
        ];
        match fields.iter().find(|(_, secs)| *secs == 0) {
            Some((name, _)) => Err(format!("timeout {} must be positive", name)),
            None => Ok(()),
        }
    }

    /// Handshake timeout
    pub fn handshake(&self) -> Duration {
        Duration::from_secs(self.handshake)
    }

    /// Auth timeout
    pub fn auth(&self) -> Duration {
        Duration::from_secs(self.auth)
    }

    /// Request timeout
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request)
    }

    /// Resolve timeout
    pub fn resolve(&self) -> Duration {
        Duration::from_secs(self.resolve)
    }

    /// Dial timeout
    pub fn dial(&self) -> Duration {
        Duration::from_secs(self.dial)
    }

    /// BIND accept timeout
    pub fn bind_accept(&self) -> Duration {
        Duration::from_secs(self.bind_accept)
    }

    /// Relay shutdown grace period
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace)
    }
}

//! Server configuration
//!
//! Read from `CHAT_*` environment variables, falling back to defaults.

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use crate::codec::DEFAULT_MAX_LINE_BYTES;
use crate::error::ConfigError;

/// Default listen port
pub const DEFAULT_PORT: u16 = 6677;

/// Default name shown in the connection banner
pub const DEFAULT_SERVER_NAME: &str = "Mukul";

/// Default per-participant outbox capacity
pub const DEFAULT_OUTBOX_CAPACITY: usize = 64;

/// Default room event channel capacity
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// What the Room does when a login picks a username that is already registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// The newcomer replaces the current holder, whose connection is closed
    ///
    /// Peers see the newcomer's join notice but no disconnect notice for the
    /// displaced connection.
    #[default]
    Takeover,
    /// The newcomer is told the name is taken and disconnected
    Reject,
}

impl FromStr for DuplicatePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "takeover" => Ok(Self::Takeover),
            "reject" => Ok(Self::Reject),
            _ => Err(ConfigError::InvalidValue {
                name: "CHAT_DUPLICATE_USERNAMES",
                value: s.to_string(),
            }),
        }
    }
}

/// Complete server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind
    pub host: IpAddr,
    /// Port to bind; 0 picks an ephemeral port
    pub port: u16,
    /// Name shown in the connection banner
    pub server_name: String,
    /// Lines queued per participant before new ones are dropped
    pub outbox_capacity: usize,
    /// Room events queued before senders wait
    pub event_buffer: usize,
    /// Longest accepted inbound line, terminator included
    pub max_line_bytes: usize,
    /// Handling of username collisions
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            server_name: DEFAULT_SERVER_NAME.to_string(),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            event_buffer: DEFAULT_EVENT_BUFFER,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            duplicate_policy: DuplicatePolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Ok(Self {
            host: parse_or("CHAT_HOST", &lookup, defaults.host)?,
            port: parse_or("CHAT_PORT", &lookup, defaults.port)?,
            server_name: lookup("CHAT_SERVER_NAME")
                .filter(|name| !name.trim().is_empty())
                .unwrap_or(defaults.server_name),
            outbox_capacity: non_zero(
                "CHAT_OUTBOX_CAPACITY",
                parse_or("CHAT_OUTBOX_CAPACITY", &lookup, defaults.outbox_capacity)?,
            )?,
            event_buffer: non_zero(
                "CHAT_EVENT_BUFFER",
                parse_or("CHAT_EVENT_BUFFER", &lookup, defaults.event_buffer)?,
            )?,
            max_line_bytes: non_zero(
                "CHAT_MAX_LINE_BYTES",
                parse_or("CHAT_MAX_LINE_BYTES", &lookup, defaults.max_line_bytes)?,
            )?,
            duplicate_policy: match lookup("CHAT_DUPLICATE_USERNAMES") {
                Some(value) => value.parse()?,
                None => defaults.duplicate_policy,
            },
        })
    }

    /// Socket address the listener binds to
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parse_or<T, F>(name: &'static str, lookup: &F, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => match value.trim().parse() {
            Ok(parsed) => Ok(parsed),
            Err(_) => Err(ConfigError::InvalidValue { name, value }),
        },
        None => Ok(default),
    }
}

fn non_zero(name: &'static str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        Err(ConfigError::Zero { name })
    } else {
        Ok(value)
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ChatError;

pub const DEFAULT_PORT: u16 = 8081;
pub const DEFAULT_MAX_USERS: usize = 10;
pub const DEFAULT_REJECT_GRACE: Duration = Duration::from_secs(10);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport the relay listens on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(ChatError::UnsupportedProtocol(other.to_string())),
        }
    }
}

/// Startup parameters consumed by [`ChatServer`](crate::ChatServer).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    /// Port to listen on (0 picks a free port)
    pub port: u16,
    pub protocol: Protocol,
    /// Maximum number of admitted connections, named or still in the handshake
    pub max_users: usize,
    /// How long a rejected connection is kept open after the rejection message
    pub reject_grace: Duration,
    /// Upper bound for each drain step during shutdown
    pub shutdown_grace: Duration,
    /// How long one broadcast write may stall before that recipient is cut off
    pub write_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            protocol: Protocol::Tcp,
            max_users: DEFAULT_MAX_USERS,
            reject_grace: DEFAULT_REJECT_GRACE,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

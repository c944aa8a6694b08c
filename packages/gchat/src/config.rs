use anyhow::{Context, Result, ensure};
use chat_relay::{DEFAULT_MAX_USERS, DEFAULT_PORT, Protocol, ServerConfig};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::cli::{ClientArgs, ServerArgs};

// =============================================================================
// Layered config: defaults < gchat.toml < GCHAT_* env vars < CLI flags
// =============================================================================
//
//   gchat.toml:      [server]
//                    max_users = 4
//
//   env var:         GCHAT_SERVER__MAX_USERS=4   (double underscore = nesting)

const DEFAULT_CONFIG_FILE: &str = "gchat.toml";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub client: ClientFileConfig,
}

/// Lives under `[server]` in gchat.toml.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_max_users")]
    pub max_users: usize,
    /// How long a rejected client is kept connected after the "chat is full" notice
    #[serde(default = "default_reject_grace_secs")]
    pub reject_grace_secs: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// A client that stalls a broadcast this long is cut off
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            protocol: Protocol::default(),
            max_users: default_max_users(),
            reject_grace_secs: default_reject_grace_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            write_timeout_secs: default_write_timeout_secs(),
        }
    }
}

impl ServerFileConfig {
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            protocol: self.protocol,
            max_users: self.max_users,
            reject_grace: Duration::from_secs(self.reject_grace_secs),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
        }
    }
}

/// Lives under `[client]` in gchat.toml.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientFileConfig {
    #[serde(default = "default_ip")]
    pub ip: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

impl Default for ClientFileConfig {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            port: default_port(),
            protocol: Protocol::default(),
        }
    }
}

impl ClientFileConfig {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_users() -> usize {
    DEFAULT_MAX_USERS
}

fn default_reject_grace_secs() -> u64 {
    10
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

fn default_write_timeout_secs() -> u64 {
    5
}

/// Defaults, then the config file, then `GCHAT_*` env vars.
///
/// An explicitly requested file must exist; the default `gchat.toml` is
/// optional.
pub fn load_config(path: Option<&Path>) -> Result<Figment> {
    if let Some(path) = path {
        ensure!(path.exists(), "config file {} not found", path.display());
    }
    let file = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));

    Ok(Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(file))
        .merge(Env::prefixed("GCHAT_").split("__")))
}

pub fn server_config(path: Option<&Path>, args: &ServerArgs) -> Result<ServerConfig> {
    let fc: ServerFileConfig = load_config(path)?
        .merge(Serialized::default("server", args))
        .extract_inner("server")
        .context("invalid server configuration")?;
    ensure!(fc.max_users > 0, "max_users must be at least 1");
    ensure!(fc.write_timeout_secs > 0, "write_timeout_secs must be at least 1");
    Ok(fc.to_server_config())
}

pub fn client_config(path: Option<&Path>, args: &ClientArgs) -> Result<ClientFileConfig> {
    load_config(path)?
        .merge(Serialized::default("client", args))
        .extract_inner("client")
        .context("invalid client configuration")
}

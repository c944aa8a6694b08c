//! Chat Relay - group chat server core
//!
//! Clients connect over TCP (or UDP pseudo-connections), pick a unique name,
//! and every line they send is relayed to everyone in the chat. This crate
//! has no terminal or CLI knowledge; the `gchat` binary wraps it.
//!
//! # Example
//!
//! ```no_run
//! use chat_relay::{ChatServer, Protocol, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> chat_relay::Result<()> {
//!     let config = ServerConfig {
//!         port: 8081,
//!         protocol: Protocol::Tcp,
//!         max_users: 10,
//!         ..Default::default()
//!     };
//!
//!     let server = ChatServer::bind(config).await?;
//!     println!("listening on {}", server.local_addr()?);
//!
//!     server
//!         .run(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```

mod acceptor;
mod broadcast;
mod config;
mod connection;
mod error;
mod listener;
pub mod protocol;
mod registry;
mod server;
mod shutdown;
mod worker;

#[cfg(test)]
mod test_helpers;

pub use broadcast::{BroadcastQueue, BroadcastReceiver, Broadcaster};
pub use config::{
    DEFAULT_MAX_USERS, DEFAULT_PORT, DEFAULT_REJECT_GRACE, DEFAULT_SHUTDOWN_GRACE,
    DEFAULT_WRITE_TIMEOUT, Protocol, ServerConfig,
};
pub use connection::{Connection, ConnectionWriter};
pub use error::{ChatError, Result};
pub use listener::{Listener, UdpListener};
pub use protocol::NameError;
pub use registry::Registry;
pub use server::{ChatServer, ServerContext};

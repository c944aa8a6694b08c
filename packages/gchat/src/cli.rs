use chat_relay::Protocol;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "gchat")]
#[command(about = "Group chat relay over TCP or UDP")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to ./gchat.toml if present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the chat server in the foreground
    Server(ServerArgs),

    /// Connect to a chat server from this terminal
    Client(ClientArgs),
}

// Flags left unset are skipped when serialized, so they only override the
// file and env layers when given on the command line.

#[derive(Parser, Debug, Default, Serialize)]
pub struct ServerArgs {
    /// Port to listen on [default: 8081]
    #[arg(short, long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Transport: tcp or udp [default: tcp]
    #[arg(short = 'P', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,

    /// Maximum number of users in the chat [default: 10]
    #[arg(short, long)]
    #[serde(rename = "max_users", skip_serializing_if = "Option::is_none")]
    pub users_max: Option<usize>,

    /// Host to bind to [default: 0.0.0.0]
    #[arg(short = 'b', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    #[serde(skip)]
    pub debug: bool,
}

#[derive(Parser, Debug, Default, Serialize)]
pub struct ClientArgs {
    /// Server port [default: 8081]
    #[arg(short, long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Transport: tcp or udp [default: tcp]
    #[arg(short = 'P', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,

    /// Server address [default: 127.0.0.1]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    /// Enable debug logging (to stderr)
    #[arg(short, long)]
    #[serde(skip)]
    pub debug: bool,
}

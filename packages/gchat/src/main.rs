use anyhow::{Context, Result};
use chat_relay::ChatServer;
use clap::Parser;
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

mod cli;
mod client;
mod config;

use crate::cli::{Cli, ClientArgs, Commands, ServerArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Server(args) => run_server(config_path, args).await,
        Commands::Client(args) => run_client(config_path, args).await,
    }
}

fn init_logging(default_directive: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

async fn run_server(config_path: Option<&Path>, args: ServerArgs) -> Result<()> {
    init_logging(if args.debug {
        "gchat=debug,chat_relay=debug,info"
    } else {
        "gchat=info,chat_relay=info,warn"
    });

    let config = config::server_config(config_path, &args)?;
    info!("Starting gchat server");

    let server = ChatServer::bind(config)
        .await
        .context("Failed to start chat server")?;

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    server.run(shutdown_signal).await?;
    Ok(())
}

async fn run_client(config_path: Option<&Path>, args: ClientArgs) -> Result<()> {
    // stdout belongs to the chat; logs go to stderr and stay quiet by default.
    init_logging(if args.debug {
        "gchat=debug,chat_relay=debug,warn"
    } else {
        "gchat=warn,warn"
    });

    let config = config::client_config(config_path, &args)?;
    client::run(config).await
}

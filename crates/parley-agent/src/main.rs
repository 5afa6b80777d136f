//! # parley
//!
//! Relay binary: `parley [PORT]` (or `parley serve`) runs the WebSocket relay
//! and the optional line relay until ctrl-c; `parley chat` joins a line relay
//! from the terminal.

#![deny(unsafe_code)]

mod chat;
mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use parley_server::{RelayServer, ServerConfig};
use tracing::{info, warn};

use crate::cli::{Cli, Command, ServeArgs};

#[tokio::main]
async fn main() -> Result<()> {
    match Cli::parse().into_command() {
        Command::Serve(args) => serve(&args).await,
        Command::Chat(args) => chat::run(&args).await,
    }
}

async fn serve(args: &ServeArgs) -> Result<()> {
    let settings = args.load_settings()?;
    parley_logging::init_logging(&settings.logging).context("failed to initialize logging")?;

    let server = RelayServer::new(ServerConfig::from(&settings.server));
    let handle = server.listen().await.context("failed to start relay")?;
    info!(
        websocket = %handle.websocket_addr,
        line = ?handle.line_addr,
        max_send_queue = settings.server.max_send_queue,
        "parley relay started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("ctrl-c received, shutting down");

    if !server.stop(None).await {
        warn!("some connections did not close before the shutdown timeout");
    }
    info!("parley relay stopped");
    Ok(())
}

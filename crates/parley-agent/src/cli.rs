//! Command-line interface.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use parley_settings::{ParleySettings, load_settings_from_path, settings_path};

/// WebSocket and line chat relay.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about = "WebSocket and line chat relay")]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub serve: ServeArgs,
}

impl Cli {
    /// The subcommand to run; `serve` when none was given.
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Serve(self.serve))
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay (default).
    Serve(ServeArgs),
    /// Join a line relay from the terminal.
    Chat(ChatArgs),
}

#[derive(Args, Debug, Default, Clone)]
pub struct ServeArgs {
    /// WebSocket port (0 for auto-assign). Overrides settings and `PORT`.
    pub port: Option<u16>,

    /// Host to bind.
    #[arg(long)]
    pub host: Option<String>,

    /// Also serve newline-delimited text on this port.
    #[arg(long)]
    pub line_port: Option<u16>,

    /// Close connections that stay silent this long.
    #[arg(long)]
    pub read_timeout_ms: Option<u64>,

    /// Settings file (default `~/.parley/settings.json`).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl ServeArgs {
    /// Load settings from file and environment, then apply these flags.
    pub fn load_settings(&self) -> Result<ParleySettings> {
        let path = self.config.clone().unwrap_or_else(settings_path);
        let mut settings = load_settings_from_path(&path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?;
        self.apply(&mut settings);
        settings.validate().context("invalid settings")?;
        Ok(settings)
    }

    /// Overlay the flags that were given.
    pub fn apply(&self, settings: &mut ParleySettings) {
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(line_port) = self.line_port {
            settings.server.line_port = Some(line_port);
        }
        if let Some(ms) = self.read_timeout_ms {
            settings.server.read_timeout_ms = Some(ms);
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ChatArgs {
    /// Relay host.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Line relay port.
    #[arg(long, default_value_t = 8888)]
    pub port: u16,
}

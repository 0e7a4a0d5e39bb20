//! ircrelay: IRC-to-WebSocket relay.
//!
//! Holds one connection to an IRC server and relays it to any number of
//! browser clients connected over WebSocket. Every client sees every server
//! line; every client line goes to the server.

mod config;
mod server;
mod transport;

use clap::Parser;
use config::{CliOverrides, RelayConfig};
use ircrelay_core::HubExit;
use server::RelayServer;
use std::path::PathBuf;
use tracing::{error, info};

/// ircrelay — IRC to WebSocket relay
#[derive(Parser, Debug)]
#[command(name = "ircrelay", version, about = "Relay one IRC session to many WebSocket clients")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "~/.ircrelay/config.toml")]
    config: String,

    /// IRC server host
    #[arg(long)]
    irc_host: Option<String>,

    /// IRC server port
    #[arg(long)]
    irc_port: Option<u16>,

    /// Nick to register with on connect (omit to let the first client register)
    #[arg(long)]
    nick: Option<String>,

    /// Address to accept WebSocket clients on
    #[arg(long)]
    bind: Option<String>,

    /// WebSocket listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting ircrelay");

    let overrides = CliOverrides {
        irc_host: cli.irc_host,
        irc_port: cli.irc_port,
        nick: cli.nick,
        bind: cli.bind,
        port: cli.port,
    };
    let config_path = PathBuf::from(&cli.config);
    let relay_config = match RelayConfig::load(Some(&config_path), &overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    info!(
        upstream = %format!("{}:{}", relay_config.upstream.host, relay_config.upstream.port),
        listen = %relay_config.listen_addr,
        "relay configured"
    );

    match RelayServer::new(relay_config).run(shutdown_signal()).await {
        Ok(HubExit::Shutdown) => info!("ircrelay stopped"),
        Ok(HubExit::UpstreamLost(e)) => {
            error!(error = %e, "lost connection to IRC server");
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "relay error");
            std::process::exit(1);
        }
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

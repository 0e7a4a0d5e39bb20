//! Relay configuration: TOML file + CLI overrides.

use ircrelay_core::{HubConfig, RelayError, RelayResult};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub upstream: UpstreamSection,
    #[serde(default)]
    pub listen: ListenSection,
    #[serde(default)]
    pub hub: HubSection,
}

/// `[upstream]` section: the IRC server to relay.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamSection {
    #[serde(default = "default_irc_host")]
    pub host: String,
    #[serde(default = "default_irc_port")]
    pub port: u16,
    pub nick: Option<String>,
    pub username: Option<String>,
    pub realname: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            host: default_irc_host(),
            port: default_irc_port(),
            nick: None,
            username: None,
            realname: None,
            password: None,
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// `[listen]` section: where browsers connect.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_listen_port")]
    pub port: u16,
}

impl Default for ListenSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_listen_port(),
        }
    }
}

/// `[hub]` section: queue sizing and client send limit.
#[derive(Debug, Clone, Deserialize)]
pub struct HubSection {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_registration_capacity")]
    pub registration_capacity: usize,
    /// Seconds a single client send may take before the client is dropped.
    #[serde(default = "default_send_timeout")]
    pub send_timeout: u64,
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            registration_capacity: default_registration_capacity(),
            send_timeout: default_send_timeout(),
        }
    }
}

fn default_irc_host() -> String {
    "127.0.0.1".to_string()
}
fn default_irc_port() -> u16 {
    6667
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_listen_port() -> u16 {
    8080
}
fn default_queue_capacity() -> usize {
    HubConfig::default().queue_capacity
}
fn default_registration_capacity() -> usize {
    HubConfig::default().registration_capacity
}
fn default_send_timeout() -> u64 {
    HubConfig::default().send_timeout.as_secs()
}

/// Values given on the command line; each one wins over the file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub irc_host: Option<String>,
    pub irc_port: Option<u16>,
    pub nick: Option<String>,
    pub bind: Option<String>,
    pub port: Option<u16>,
}

/// Resolved upstream settings.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub host: String,
    pub port: u16,
    pub nick: Option<String>,
    pub username: Option<String>,
    pub realname: Option<String>,
    pub password: Option<String>,
    pub connect_timeout_secs: u64,
}

/// Resolved relay configuration (CLI overrides applied, values checked).
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub upstream: UpstreamConfig,
    pub listen_addr: SocketAddr,
    pub hub: HubConfig,
}

impl RelayConfig {
    /// Load config from TOML file, then apply CLI overrides.
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load(config_path: Option<&Path>, cli: &CliOverrides) -> RelayResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    parse_config(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Self::resolve(file_config, cli)
    }

    /// Merge CLI overrides into a parsed file and validate the result.
    pub fn resolve(file: ConfigFile, cli: &CliOverrides) -> RelayResult<Self> {
        let host = cli.irc_host.clone().unwrap_or(file.upstream.host);
        if host.trim().is_empty() {
            return Err(RelayError::Config("upstream host must not be empty".into()));
        }
        let nick = cli.nick.clone().or(file.upstream.nick);
        if let Some(nick) = &nick {
            if nick.is_empty() || nick.contains([' ', '\r', '\n']) {
                return Err(RelayError::Config(format!("invalid nick: {nick:?}")));
            }
        }

        let bind = cli.bind.clone().unwrap_or(file.listen.bind);
        let port = cli.port.unwrap_or(file.listen.port);
        let ip: IpAddr = bind
            .parse()
            .map_err(|e| RelayError::Config(format!("invalid bind address {bind:?}: {e}")))?;
        let listen_addr = SocketAddr::new(ip, port);

        if file.hub.queue_capacity == 0 || file.hub.registration_capacity == 0 {
            return Err(RelayError::Config("hub queue capacities must be at least 1".into()));
        }
        if file.hub.send_timeout == 0 {
            return Err(RelayError::Config("hub send_timeout must be at least 1 second".into()));
        }

        Ok(Self {
            upstream: UpstreamConfig {
                host,
                port: cli.irc_port.unwrap_or(file.upstream.port),
                nick,
                username: file.upstream.username,
                realname: file.upstream.realname,
                password: file.upstream.password,
                connect_timeout_secs: file.upstream.connect_timeout,
            },
            listen_addr,
            hub: HubConfig {
                queue_capacity: file.hub.queue_capacity,
                registration_capacity: file.hub.registration_capacity,
                send_timeout: Duration::from_secs(file.hub.send_timeout),
            },
        })
    }
}

/// Parse the TOML config file body.
pub fn parse_config(content: &str) -> RelayResult<ConfigFile> {
    toml::from_str::<ConfigFile>(content)
        .map_err(|e| RelayError::Config(format!("config parse error: {e}")))
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

//! TOML configuration loading and validation.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration: one `[http]` block and one or more
/// `[[network]]` blocks.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(rename = "network")]
    pub networks: Vec<NetworkConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { listen: default_http_listen(), enabled: true }
    }
}

/// One IRC network to watch.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Configured name, also the key in HTTP routes. The on-wire network
    /// name learned from the welcome reply is matched case-insensitively
    /// against lookups as well.
    pub network: String,
    /// `host:port` of the server to connect to.
    pub server: String,
    pub nick: String,
    #[serde(default = "default_ident")]
    pub ident: String,
    #[serde(default = "default_realname")]
    pub realname: String,
    /// Channels to join once registered.
    #[serde(default)]
    pub channels: Vec<String>,
    /// Raw lines sent verbatim right after the welcome reply, before
    /// anything else (typically oper-up commands).
    #[serde(default)]
    pub connect_cmds: Vec<String>,
    #[serde(default = "default_reconnect_wait")]
    pub reconnect_wait_secs: u64,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// Nick of the oper service that answers gline commands.
    #[serde(default = "default_operserv_nick")]
    pub operserv_nick: String,
    /// Login line sent to the oper service, verbatim.
    #[serde(default)]
    pub operserv_login: String,
    /// Re-send the login when a command is issued while logged out.
    #[serde(default)]
    pub autologin_if_operserv_missing: bool,
    /// Notice substrings from the oper service that confirm a login.
    #[serde(default)]
    pub auth_success_msgs: Vec<String>,
    /// Removal command template; `{mask}` is replaced with the gline mask.
    /// Empty disables the removal endpoint for this network.
    #[serde(default)]
    pub operserv_remgline_cmd: String,
    /// Reject CIDR arguments on the HTTP lookup endpoint.
    #[serde(default)]
    pub forbid_cidr_lookups_via_api: bool,
}

fn default_http_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 2000))
}

fn default_true() -> bool {
    true
}

fn default_ident() -> String {
    "glinewatch".to_string()
}

fn default_realname() -> String {
    "gline tracker".to_string()
}

fn default_reconnect_wait() -> u64 {
    30
}

fn default_ping_interval() -> u64 {
    60
}

fn default_operserv_nick() -> String {
    "OperServ".to_string()
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.networks.is_empty() {
            return Err(ConfigError::Invalid("no [[network]] blocks".into()));
        }
        let mut seen = Vec::with_capacity(self.networks.len());
        for net in &self.networks {
            if net.network.is_empty() {
                return Err(ConfigError::Invalid("network name is empty".into()));
            }
            if net.server.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "network {}: server is empty",
                    net.network
                )));
            }
            if net.nick.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "network {}: nick is empty",
                    net.network
                )));
            }
            let key = net.network.to_ascii_lowercase();
            if seen.contains(&key) {
                return Err(ConfigError::Invalid(format!(
                    "network {} configured twice",
                    net.network
                )));
            }
            seen.push(key);
        }
        Ok(())
    }
}

//! Configuration types for guardup

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration structure
///
/// The configuration file uses TOML format. Only the `[host]` section is
/// required; paths, key generation and tool locations have defaults.
///
/// # Example Configuration
///
/// ```toml
/// [host]
/// internal_address = "10.0.0.1"
/// external_address = "192.168.1.10"
/// listen_port = 51820
/// interface = "eth0"
/// wg_interface = "wg0"
/// dns_server = "1.0.0.1"
///
/// [paths]
/// state_dir = "/var/guardup"
/// system_config_dir = "/etc/wireguard"
///
/// [keygen]
/// backend = "wg"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host endpoint settings
    pub host: HostSettings,

    /// Filesystem locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Key generation backend
    #[serde(default)]
    pub keygen: KeygenConfig,

    /// External program locations
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.host.validate()?;

        if self.paths.state_dir.as_os_str().is_empty() {
            return Err(Error::Config("paths.state_dir must not be empty".into()));
        }
        if self.paths.system_config_dir.as_os_str().is_empty() {
            return Err(Error::Config(
                "paths.system_config_dir must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Managed interface file, e.g. `/var/guardup/wg0.conf`
    pub fn interface_file_path(&self) -> PathBuf {
        self.paths
            .state_dir
            .join(format!("{}.conf", self.host.wg_interface))
    }

    /// Canonical location wg-quick reads, e.g. `/etc/wireguard/wg0.conf`
    pub fn canonical_config_path(&self) -> PathBuf {
        self.paths
            .system_config_dir
            .join(format!("{}.conf", self.host.wg_interface))
    }

    /// SQLite database holding the peer records
    pub fn database_path(&self) -> PathBuf {
        self.paths
            .database
            .clone()
            .unwrap_or_else(|| self.paths.state_dir.join("db.sql"))
    }

    /// Generate a sample configuration
    pub fn sample() -> String {
        r#"# guardup configuration

# Host endpoint settings (required)
[host]
# Address of the host inside the VPN
internal_address = "10.0.0.1"

# Prefix length of the VPN network (default: 24)
network_prefix = 24

# Public address clients use to reach the host
external_address = "192.168.1.10"

# UDP port WireGuard listens on (default: 51820)
listen_port = 51820

# Outbound interface used for NAT in PostUp/PostDown
interface = "eth0"

# WireGuard interface name (default: "wg0")
wg_interface = "wg0"

# DNS server pushed to clients (default: "1.0.0.1")
dns_server = "1.0.0.1"

# Subnets clients route through the tunnel (default: "0.0.0.0/0")
client_allowed_ips = "0.0.0.0/0"

[paths]
# Directory holding the database and the managed interface file
state_dir = "/var/guardup"

# Directory wg-quick reads interface files from
system_config_dir = "/etc/wireguard"

# SQLite database (default: <state_dir>/db.sql)
# database = "/var/guardup/db.sql"

# Directory with wg_server.conf, wg_peer.conf and wg_client.conf overrides
# If not set, built-in templates are used.
# template_dir = "/var/guardup/templates"

[keygen]
# Key generation backend:
# - "wg": run `wg genkey` / `wg pubkey` (default)
# - "native": generate Curve25519 keys in-process
backend = "wg"

[tools]
# wg = "wg"
# qrencode = "qrencode"
"#
        .to_string()
    }
}

/// Host endpoint settings
///
/// Passed by value into the peer manager and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSettings {
    /// Host address inside the VPN
    pub internal_address: IpAddr,

    /// Prefix length of the VPN network
    #[serde(default = "default_network_prefix")]
    pub network_prefix: u8,

    /// Public address (IP or hostname) clients connect to
    pub external_address: String,

    /// WireGuard listen port
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Outbound network interface
    #[serde(default = "default_interface")]
    pub interface: String,

    /// WireGuard interface name
    #[serde(default = "default_wg_interface")]
    pub wg_interface: String,

    /// DNS server written into client configurations
    #[serde(default = "default_dns_server")]
    pub dns_server: String,

    /// Subnets clients send through the tunnel
    #[serde(default = "default_client_allowed_ips")]
    pub client_allowed_ips: String,
}

impl HostSettings {
    /// Validate host settings
    pub fn validate(&self) -> Result<()> {
        let max_prefix = match self.internal_address {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if self.network_prefix > max_prefix {
            return Err(Error::Config(format!(
                "network_prefix {} is too large for {}",
                self.network_prefix, self.internal_address
            )));
        }

        if self.listen_port == 0 {
            return Err(Error::Config("listen_port cannot be 0".into()));
        }

        if self.external_address.trim().is_empty()
            || self.external_address.chars().any(char::is_whitespace)
        {
            return Err(Error::Config(format!(
                "invalid external_address: '{}'",
                self.external_address
            )));
        }

        for (key, value) in [("interface", &self.interface), ("wg_interface", &self.wg_interface)] {
            if value.is_empty() || value.contains('/') || value.chars().any(char::is_whitespace) {
                return Err(Error::Config(format!("invalid {}: '{}'", key, value)));
            }
        }

        if self.dns_server.trim().is_empty() {
            return Err(Error::Config("dns_server must not be empty".into()));
        }

        parse_cidr_list(&self.client_allowed_ips)
            .map_err(|e| Error::Config(format!("invalid client_allowed_ips: {}", e)))?;

        Ok(())
    }
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding the database and the managed interface file
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Directory wg-quick reads interface files from
    #[serde(default = "default_system_config_dir")]
    pub system_config_dir: PathBuf,

    /// Database file (defaults to `<state_dir>/db.sql`)
    #[serde(default)]
    pub database: Option<PathBuf>,

    /// Template override directory
    #[serde(default)]
    pub template_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            system_config_dir: default_system_config_dir(),
            database: None,
            template_dir: None,
        }
    }
}

/// Key generation backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeygenBackend {
    /// Shell out to `wg genkey` / `wg pubkey`
    #[default]
    Wg,
    /// In-process Curve25519
    Native,
}

/// Key generation settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeygenConfig {
    #[serde(default)]
    pub backend: KeygenBackend,
}

/// External program locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// `wg` binary
    #[serde(default = "default_wg_binary")]
    pub wg: String,

    /// `qrencode` binary
    #[serde(default = "default_qrencode_binary")]
    pub qrencode: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            wg: default_wg_binary(),
            qrencode: default_qrencode_binary(),
        }
    }
}

/// Parse a comma-separated CIDR list such as `"10.0.0.2/32, fd00::2/128"`
pub fn parse_cidr_list(list: &str) -> std::result::Result<Vec<IpNet>, String> {
    let nets = list
        .split(',')
        .map(str::trim)
        .map(|entry| {
            entry
                .parse::<IpNet>()
                .map_err(|e| format!("'{}': {}", entry, e))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if nets.is_empty() {
        return Err("empty subnet list".into());
    }
    Ok(nets)
}

fn default_network_prefix() -> u8 {
    24
}

fn default_listen_port() -> u16 {
    51820
}

fn default_interface() -> String {
    "eth0".to_string()
}

fn default_wg_interface() -> String {
    "wg0".to_string()
}

fn default_dns_server() -> String {
    "1.0.0.1".to_string()
}

fn default_client_allowed_ips() -> String {
    "0.0.0.0/0".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/guardup")
}

fn default_system_config_dir() -> PathBuf {
    PathBuf::from("/etc/wireguard")
}

fn default_wg_binary() -> String {
    "wg".to_string()
}

fn default_qrencode_binary() -> String {
    "qrencode".to_string()
}

//! Gofer Configuration System
//!
//! Loads configuration from YAML files with a cascading priority system:
//! 1. `./gofer.yaml` (current directory - highest priority)
//! 2. `~/.gofer.yaml` (home directory)
//! 3. `~/.config/gofer/gofer.yaml` (user config directory)
//! 4. `/etc/gofer/gofer.yaml` (system - lowest priority)
//!
//! Values from higher priority files override those from lower priority files.
//!
//! # YAML Structure
//!
//! ```yaml
//! tunnel:
//!   kind: tun
//!   name: gofer0
//!   subnet: "10.8.0.0/30"
//!   mtu: 1400
//!   key: "<64 hex chars>"
//! transport:
//!   proto: udp
//!   port: 4000
//!   remote: "203.0.113.7"   # omit on the server
//!   multi_send: 1.5
//!   keepalive_secs: 10
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default config filename.
const CONFIG_FILENAME: &str = "gofer.yaml";

/// Default interface name.
const DEFAULT_TUNNEL_NAME: &str = "gofer0";

/// Default tunnel subnet.
const DEFAULT_TUNNEL_SUBNET: &str = "10.8.0.0/30";

/// Default interface MTU.
const DEFAULT_TUNNEL_MTU: u16 = 1400;

/// Smallest MTU an IPv4 link may carry.
pub const MIN_MTU: u16 = 68;

/// Largest MTU whose sealed packets still fit in one UDP datagram.
pub const MAX_MTU: u16 = 65_000;

/// Default transport port.
const DEFAULT_PORT: u16 = 4000;

/// Default redundant-send multiplier.
const DEFAULT_MULTI_SEND: f64 = 1.0;

/// Largest redundant-send multiplier accepted.
pub const MAX_MULTI_SEND: f64 = 16.0;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("no pre-shared key configured (tunnel.key)")]
    MissingKey,

    #[error("mtu {mtu} out of range {min}..={max}")]
    InvalidMtu { mtu: u16, min: u16, max: u16 },

    #[error("multi_send must be between 0 and {max}, got {value}")]
    InvalidMultiSend { value: f64, max: f64 },
}

/// Virtual interface kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    /// Layer-3 device carrying IP packets.
    #[default]
    Tun,
    /// Layer-2 device carrying Ethernet frames.
    Tap,
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceKind::Tun => write!(f, "tun"),
            InterfaceKind::Tap => write!(f, "tap"),
        }
    }
}

/// Transport protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Udp,
    Tcp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Udp => write!(f, "udp"),
            Protocol::Tcp => write!(f, "tcp"),
        }
    }
}

/// Endpoint role, decided solely by whether a remote is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Listens and learns the peer from inbound traffic.
    Server,
    /// Dials the fixed configured remote.
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => write!(f, "server"),
            Role::Client => write!(f, "client"),
        }
    }
}

/// Interface and crypto settings (`tunnel.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TunnelConfig {
    /// Interface kind (`tunnel.kind`). Defaults to tun.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<InterfaceKind>,

    /// Interface name (`tunnel.name`). Defaults to "gofer0".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Tunnel subnet (`tunnel.subnet`), always used as a /30.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,

    /// Interface MTU (`tunnel.mtu`). Defaults to 1400.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u16>,

    /// Hex-encoded 32-byte pre-shared key (`tunnel.key`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl TunnelConfig {
    /// Get the interface kind, using default if not configured.
    pub fn kind(&self) -> InterfaceKind {
        self.kind.unwrap_or_default()
    }

    /// Get the interface name, using default if not configured.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_TUNNEL_NAME)
    }

    /// Get the tunnel subnet, using default if not configured.
    pub fn subnet(&self) -> &str {
        self.subnet.as_deref().unwrap_or(DEFAULT_TUNNEL_SUBNET)
    }

    /// Get the MTU, using default if not configured.
    pub fn mtu(&self) -> u16 {
        self.mtu.unwrap_or(DEFAULT_TUNNEL_MTU)
    }

    /// Merge another section into this one; `other` wins where set.
    pub fn merge(&mut self, other: TunnelConfig) {
        if other.kind.is_some() {
            self.kind = other.kind;
        }
        if other.name.is_some() {
            self.name = other.name;
        }
        if other.subnet.is_some() {
            self.subnet = other.subnet;
        }
        if other.mtu.is_some() {
            self.mtu = other.mtu;
        }
        if other.key.is_some() {
            self.key = other.key;
        }
    }
}

/// Transport settings (`transport.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    /// Protocol (`transport.proto`). Defaults to udp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proto: Option<Protocol>,

    /// Port to listen on or dial (`transport.port`). Defaults to 4000.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Remote host (`transport.remote`). Absent or empty means server role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,

    /// Average transmissions per packet (`transport.multi_send`). Defaults to 1.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_send: Option<f64>,

    /// Keepalive interval in seconds (`transport.keepalive_secs`). 0 disables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keepalive_secs: Option<u64>,
}

impl TransportConfig {
    /// Get the protocol, using default if not configured.
    pub fn proto(&self) -> Protocol {
        self.proto.unwrap_or_default()
    }

    /// Get the port, using default if not configured.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// Get the remote host, treating an empty string as unset.
    pub fn remote(&self) -> Option<&str> {
        self.remote.as_deref().map(str::trim).filter(|r| !r.is_empty())
    }

    /// Get the redundant-send multiplier, using default if not configured.
    pub fn multi_send(&self) -> f64 {
        self.multi_send.unwrap_or(DEFAULT_MULTI_SEND)
    }

    /// Get the keepalive interval, if enabled.
    pub fn keepalive_interval(&self) -> Option<Duration> {
        self.keepalive_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Merge another section into this one; `other` wins where set.
    pub fn merge(&mut self, other: TransportConfig) {
        if other.proto.is_some() {
            self.proto = other.proto;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.remote.is_some() {
            self.remote = other.remote;
        }
        if other.multi_send.is_some() {
            self.multi_send = other.multi_send;
        }
        if other.keepalive_secs.is_some() {
            self.keepalive_secs = other.keepalive_secs;
        }
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Interface and crypto settings (`tunnel.*`).
    #[serde(default)]
    pub tunnel: TunnelConfig,

    /// Transport settings (`transport.*`).
    #[serde(default)]
    pub transport: TransportConfig,
}

impl Config {
    /// Create a new empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the standard search paths.
    ///
    /// Returns a tuple of (config, paths_loaded) where paths_loaded contains
    /// the paths that were successfully loaded.
    pub fn load() -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let search_paths = Self::search_paths();
        Self::load_from_paths(&search_paths)
    }

    /// Load configuration from specific paths.
    ///
    /// Paths are processed in order, with later paths overriding earlier ones.
    pub fn load_from_paths(paths: &[PathBuf]) -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let mut config = Config::default();
        let mut loaded_paths = Vec::new();

        for path in paths {
            if path.exists() {
                let file_config = Self::load_file(path)?;
                config.merge(file_config);
                loaded_paths.push(path.clone());
            }
        }

        Ok((config, loaded_paths))
    }

    /// Load configuration from a single file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        serde_yaml::from_str(&contents).map_err(|e| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the standard search paths in priority order (lowest to highest).
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // System config (lowest priority)
        paths.push(PathBuf::from("/etc/gofer").join(CONFIG_FILENAME));

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("gofer").join(CONFIG_FILENAME));
        }

        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".gofer.yaml"));
        }

        // Current directory (highest priority)
        paths.push(PathBuf::from(".").join(CONFIG_FILENAME));

        paths
    }

    /// Merge another configuration into this one.
    ///
    /// Values from `other` override values in `self` when present.
    pub fn merge(&mut self, other: Config) {
        self.tunnel.merge(other.tunnel);
        self.transport.merge(other.transport);
    }

    /// Check the settings that cannot be defaulted or clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tunnel.key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            return Err(ConfigError::MissingKey);
        }

        let mtu = self.tunnel.mtu();
        if !(MIN_MTU..=MAX_MTU).contains(&mtu) {
            return Err(ConfigError::InvalidMtu {
                mtu,
                min: MIN_MTU,
                max: MAX_MTU,
            });
        }

        let multi_send = self.transport.multi_send();
        if !(0.0..=MAX_MULTI_SEND).contains(&multi_send) {
            return Err(ConfigError::InvalidMultiSend {
                value: multi_send,
                max: MAX_MULTI_SEND,
            });
        }

        Ok(())
    }

    /// Endpoint role implied by the transport section.
    pub fn role(&self) -> Role {
        match self.transport.remote() {
            Some(_) => Role::Client,
            None => Role::Server,
        }
    }

    /// Serialize this configuration to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn keyed() -> Config {
        let mut config = Config::new();
        config.tunnel.key = Some(KEY.to_string());
        config
    }

    #[test]
    fn test_empty_config_defaults() {
        let config = Config::new();
        assert_eq!(config.tunnel.kind(), InterfaceKind::Tun);
        assert_eq!(config.tunnel.name(), "gofer0");
        assert_eq!(config.tunnel.subnet(), "10.8.0.0/30");
        assert_eq!(config.tunnel.mtu(), 1400);
        assert_eq!(config.transport.proto(), Protocol::Udp);
        assert_eq!(config.transport.port(), 4000);
        assert_eq!(config.transport.multi_send(), 1.0);
        assert!(config.transport.keepalive_interval().is_none());
        assert_eq!(config.role(), Role::Server);
    }

    #[test]
    fn test_parse_yaml_full() {
        let yaml = r#"
tunnel:
  kind: tap
  name: tap7
  subnet: "10.9.0.4"
  mtu: 1300
  key: "abcd"
transport:
  proto: udp
  port: 5001
  remote: "198.51.100.1"
  multi_send: 2.5
  keepalive_secs: 15
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.tunnel.kind(), InterfaceKind::Tap);
        assert_eq!(config.tunnel.name(), "tap7");
        assert_eq!(config.tunnel.subnet(), "10.9.0.4");
        assert_eq!(config.tunnel.mtu(), 1300);
        assert_eq!(config.tunnel.key.as_deref(), Some("abcd"));
        assert_eq!(config.transport.port(), 5001);
        assert_eq!(config.transport.remote(), Some("198.51.100.1"));
        assert_eq!(config.transport.multi_send(), 2.5);
        assert_eq!(
            config.transport.keepalive_interval(),
            Some(Duration::from_secs(15))
        );
        assert_eq!(config.role(), Role::Client);
    }

    #[test]
    fn test_parse_yaml_empty() {
        let config: Config = serde_yaml::from_str("").unwrap();
        assert!(config.tunnel.key.is_none());
        assert_eq!(config.role(), Role::Server);
    }

    #[test]
    fn test_parse_rejects_unknown_fields() {
        let yaml = r#"
tunnel:
  colour: blue
"#;
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn test_empty_remote_is_server() {
        let mut config = keyed();
        config.transport.remote = Some("  ".to_string());
        assert_eq!(config.role(), Role::Server);
        assert_eq!(config.transport.remote(), None);
    }

    #[test]
    fn test_zero_keepalive_disabled() {
        let mut config = Config::new();
        config.transport.keepalive_secs = Some(0);
        assert!(config.transport.keepalive_interval().is_none());
    }

    #[test]
    fn test_validate() {
        assert!(keyed().validate().is_ok());
        assert!(matches!(Config::new().validate(), Err(ConfigError::MissingKey)));

        let mut config = keyed();
        config.tunnel.mtu = Some(40);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidMtu { mtu: 40, .. })));

        let mut config = keyed();
        config.transport.multi_send = Some(-0.5);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidMultiSend { .. })));

        let mut config = keyed();
        config.transport.multi_send = Some(f64::NAN);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidMultiSend { .. })));

        let mut config = keyed();
        config.transport.multi_send = Some(0.0);
        assert!(config.validate().is_ok());

        let mut config = keyed();
        config.transport.multi_send = Some(MAX_MULTI_SEND);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_caps_multi_send() {
        for value in [MAX_MULTI_SEND + 0.5, 1e12, f64::INFINITY] {
            let mut config = keyed();
            config.transport.multi_send = Some(value);
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidMultiSend { max, .. }) if max == MAX_MULTI_SEND),
                "{} accepted",
                value
            );
        }
    }

    #[test]
    fn test_merge_configs() {
        let mut base = keyed();
        base.tunnel.mtu = Some(1200);
        base.transport.port = Some(7000);

        let mut over = Config::new();
        over.transport.port = Some(7001);
        over.transport.remote = Some("peer.example".to_string());
        base.merge(over);

        assert_eq!(base.tunnel.key.as_deref(), Some(KEY));
        assert_eq!(base.tunnel.mtu(), 1200);
        assert_eq!(base.transport.port(), 7001);
        assert_eq!(base.role(), Role::Client);
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("gofer.yaml");
        fs::write(&config_path, format!("tunnel:\n  key: \"{}\"\n", KEY)).unwrap();

        let config = Config::load_file(&config_path).unwrap();
        assert_eq!(config.tunnel.key.as_deref(), Some(KEY));
    }

    #[test]
    fn test_load_from_file_bad_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("gofer.yaml");
        fs::write(&config_path, "tunnel: [1, 2").unwrap();

        assert!(matches!(
            Config::load_file(&config_path),
            Err(ConfigError::ParseYaml { .. })
        ));
    }

    #[test]
    fn test_load_from_paths_merges() {
        let temp_dir = TempDir::new().unwrap();
        let low_priority = temp_dir.path().join("low.yaml");
        let high_priority = temp_dir.path().join("high.yaml");
        let missing = temp_dir.path().join("missing.yaml");

        fs::write(&low_priority, "tunnel:\n  mtu: 1300\n  name: low0\n").unwrap();
        fs::write(&high_priority, "tunnel:\n  name: high0\n").unwrap();

        let paths = vec![low_priority.clone(), missing, high_priority.clone()];
        let (config, loaded) = Config::load_from_paths(&paths).unwrap();

        assert_eq!(loaded, vec![low_priority, high_priority]);
        assert_eq!(config.tunnel.name(), "high0");
        assert_eq!(config.tunnel.mtu(), 1300);
    }

    #[test]
    fn test_search_paths_includes_expected() {
        let paths = Config::search_paths();
        assert!(paths
            .iter()
            .any(|p| p.starts_with("/etc/gofer") && p.ends_with("gofer.yaml")));
        assert_eq!(paths.last(), Some(&PathBuf::from("./gofer.yaml")));
    }

    #[test]
    fn test_to_yaml_omits_unset() {
        let yaml = keyed().to_yaml().unwrap();
        assert!(yaml.contains("key:"));
        assert!(!yaml.contains("remote:"));
        assert!(!yaml.contains("mtu:"));
    }
}

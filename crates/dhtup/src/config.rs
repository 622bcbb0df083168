use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};

use crate::crypto::PublicKey;

/// Where a same-host publisher is expected to be listening
pub const DEFAULT_LOOPBACK_PEER: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 42069);
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MANIFEST_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings of a shared [`crate::Context`]
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// directory the swarm keeps downloaded content in,
    ///  if not set content is kept in memory
    pub data_dir: Option<PathBuf>,
    /// address for the swarm node to listen on,
    ///  if not set an ephemeral port will be used
    pub listen_addr: Option<SocketAddr>,
    /// publish and resolve swarm node addresses through the mainline dht
    pub mainline_discovery: bool,
    /// peer every session trusts, covering a publisher on this host
    pub loopback_peer: SocketAddr,
    /// nodes known to seed published content
    pub providers: Vec<PublicKey>,
    /// udp port of the mainline dht node,
    ///  if not set an ephemeral port will be used
    pub dht_port: Option<u16>,
    /// `host:port` nodes to bootstrap from besides the defaults
    pub dht_bootstrap: Vec<String>,
    /// answer other nodes' dht requests
    pub dht_server_mode: bool,
    /// publisher keys whose records the mainline store can look up
    pub publishers: Vec<PublicKey>,
    /// bound on a single record lookup
    #[serde_as(as = "DurationSeconds<u64>")]
    pub lookup_timeout: Duration,
    /// bound on waiting for a content manifest
    #[serde_as(as = "DurationSeconds<u64>")]
    pub manifest_timeout: Duration,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            listen_addr: None,
            mainline_discovery: true,
            loopback_peer: SocketAddr::V4(DEFAULT_LOOPBACK_PEER),
            providers: Vec::new(),
            dht_port: None,
            dht_bootstrap: Vec::new(),
            dht_server_mode: false,
            publishers: Vec::new(),
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            manifest_timeout: DEFAULT_MANIFEST_TIMEOUT,
        }
    }
}

impl ContextConfig {
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        Self::from_toml(&contents)
    }
}

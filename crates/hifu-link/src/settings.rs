//! Endpoint settings persistence
//!
//! Settings are stored as a small TOML file with a `Receive` and a `Send`
//! section, each holding an `IpAddress` and a `Port`:
//!
//! ```toml
//! [Receive]
//! IpAddress = "192.168.1.10"
//! Port = 6000
//!
//! [Send]
//! IpAddress = "192.168.1.20"
//! Port = 6001
//! ```

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Address used to pick the interface facing the treatment network.
/// Connecting a UDP socket sends nothing; it only selects a route.
const DISCOVERY_PROBE: &str = "192.168.0.1:9";

/// One side of the link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Endpoint {
    #[serde(rename = "IpAddress", default)]
    pub ip_address: String,
    #[serde(rename = "Port", default)]
    pub port: u16,
}

impl Endpoint {
    pub fn new(ip_address: impl Into<String>, port: u16) -> Self {
        Self {
            ip_address: ip_address.into(),
            port,
        }
    }

    /// Parse into a socket address
    pub fn socket_addr(&self) -> Result<SocketAddr, SettingsError> {
        let ip: IpAddr = self
            .ip_address
            .parse()
            .map_err(|_| SettingsError::InvalidAddress(self.ip_address.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Receive and send endpoints of one side of the link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LinkSettings {
    /// Where this side listens
    #[serde(rename = "Receive", default)]
    pub receive: Endpoint,
    /// Where this side connects to
    #[serde(rename = "Send", default)]
    pub send: Endpoint,
}

impl LinkSettings {
    pub fn new(receive: Endpoint, send: Endpoint) -> Self {
        Self { receive, send }
    }

    /// Load settings from a file; a missing file yields empty settings
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            debug!("No settings at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| SettingsError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let settings = toml::from_str(&contents).map_err(|e| SettingsError::ParseToml {
            path: path.to_path_buf(),
            source: e,
        })?;
        info!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Save settings, merging into an existing file so unknown keys survive
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let serialize_error = |e: toml::ser::Error| SettingsError::SerializeToml {
            path: path.to_path_buf(),
            source: e,
        };

        let mut table: toml::Table = if path.exists() {
            let existing = std::fs::read_to_string(path).map_err(|e| SettingsError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
            toml::from_str(&existing).map_err(|e| SettingsError::ParseToml {
                path: path.to_path_buf(),
                source: e,
            })?
        } else {
            toml::Table::new()
        };

        let ours = match toml::Value::try_from(self).map_err(serialize_error)? {
            toml::Value::Table(ours) => ours,
            _ => toml::Table::new(),
        };
        for (section, value) in ours {
            match (table.get_mut(&section), value) {
                (Some(toml::Value::Table(existing)), toml::Value::Table(update)) => {
                    existing.extend(update);
                }
                (_, value) => {
                    table.insert(section, value);
                }
            }
        }

        let contents = toml::to_string_pretty(&table).map_err(serialize_error)?;
        std::fs::write(path, contents).map_err(|e| SettingsError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }
}

/// Settings together with the file they are persisted to
#[derive(Debug, Clone, Default)]
pub struct SettingsStore {
    pub settings: LinkSettings,
    pub path: Option<PathBuf>,
}

impl SettingsStore {
    /// Settings that are never written back
    pub fn in_memory(settings: LinkSettings) -> Self {
        Self {
            settings,
            path: None,
        }
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let settings = LinkSettings::load(&path)?;
        Ok(Self {
            settings,
            path: Some(path),
        })
    }

    /// Write the settings back if a file is attached
    pub fn store(&self) -> Result<(), SettingsError> {
        match &self.path {
            Some(path) => self.settings.save(path),
            None => Ok(()),
        }
    }

    /// Fill in the receive address when it is empty, persisting the result
    pub fn ensure_receive_address(&mut self) -> Result<(), SettingsError> {
        if self.settings.receive.ip_address.is_empty() {
            let ip = discover_local_ip();
            info!("Discovered local address {}", ip);
            self.settings.receive.ip_address = ip.to_string();
            self.store()?;
        }
        Ok(())
    }
}

/// Best local IPv4 address for the treatment network, loopback otherwise
pub fn discover_local_ip() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(DISCOVERY_PROBE)?;
        Ok(socket.local_addr()?.ip())
    };

    match probe() {
        Ok(ip) if !ip.is_loopback() && !ip.is_unspecified() => ip,
        Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Err(e) => {
            debug!("Local address discovery failed: {}", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

/// Errors that can occur during settings operations
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize TOML for {path}: {source}")]
    SerializeToml {
        path: PathBuf,
        source: toml::ser::Error,
    },
    #[error("Invalid IP address: {0:?}")]
    InvalidAddress(String),
}

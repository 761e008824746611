//! Configuration file support for the reconciler.
//!
//! Loads and validates reconciler settings from TOML files.
//! Default location: /etc/topo-reconcile/reconciler.toml

use crate::error::{ReconcileError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use topo_types::MacAddress;
use tracing::info;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/topo-reconcile/reconciler.toml";

/// Hardware address shared by the OpenBMC interface of many switches.
pub const SWITCH_OPENBMC_MAC: MacAddress = MacAddress::new([0x02, 0, 0, 0, 0, 0x02]);

/// Network discovery settings, read once per snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Active scanning of attached networks. Consumed by the scanning
    /// service; the engine only carries it.
    #[serde(default = "default_active_discovery")]
    pub active: bool,

    /// Passive observation (neighbour and mDNS listening).
    #[serde(default = "default_passive_discovery")]
    pub passive: bool,
}

/// Engine behaviour settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interfaces reporting one of these hardware addresses are never
    /// modeled.
    #[serde(default = "default_ignored_mac_addresses")]
    pub ignored_mac_addresses: Vec<MacAddress>,

    /// Widen /32 and /128 addresses to a containing prefix seen on the
    /// same interface.
    #[serde(default = "default_widen_host_prefixes")]
    pub widen_host_prefixes: bool,
}

/// Complete reconciler configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_active_discovery() -> bool {
    false
}

fn default_passive_discovery() -> bool {
    true
}

fn default_ignored_mac_addresses() -> Vec<MacAddress> {
    vec![SWITCH_OPENBMC_MAC]
}

fn default_widen_host_prefixes() -> bool {
    true
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            active: default_active_discovery(),
            passive: default_passive_discovery(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ignored_mac_addresses: default_ignored_mac_addresses(),
            widen_host_prefixes: default_widen_host_prefixes(),
        }
    }
}

impl ReconcilerConfig {
    /// Load configuration from file, falling back to defaults if the file
    /// does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => {
                let config: Self = toml::from_str(&content).map_err(|e| {
                    ReconcileError::config(format!(
                        "failed to parse config file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(ReconcileError::Io(e)),
        }
    }

    /// Load from the default location or defaults.
    pub fn load() -> Result<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Save configuration to file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ReconcileError::config(format!("failed to serialize config: {e}")))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for mac in &self.engine.ignored_mac_addresses {
            if !seen.insert(mac) {
                return Err(ReconcileError::config(format!(
                    "ignored_mac_addresses lists {mac} more than once"
                )));
            }
        }
        Ok(())
    }

    /// Returns true if interfaces with this hardware address are skipped.
    pub fn is_ignored_mac(&self, mac: &MacAddress) -> bool {
        self.engine.ignored_mac_addresses.contains(mac)
    }
}

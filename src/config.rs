use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::crypto::Pubkey;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LifecycleConfig {
    pub node: NodeConfig,
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NodeConfig {
    pub db_path: String,
    pub log_level: String,
    #[serde(default = "default_identity_file")]
    pub identity_file: String,
    /// Key of the ephemeral validator run next to the base layer
    #[serde(default = "default_validator_identity_file")]
    pub validator_identity_file: String,
}

fn default_identity_file() -> String {
    "identity.json".to_string()
}

fn default_validator_identity_file() -> String {
    "validator.json".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProtocolConfig {
    #[serde(default = "default_namespace_tag")]
    pub namespace_tag: String,
    /// Hex program id mixed into address derivation
    pub program_id: String,
    /// Resources reserved at initialize, refunded at close
    pub rent_reserve: u64,
    #[serde(default)]
    pub trusted_vrf_signers: Vec<String>,
}

fn default_namespace_tag() -> String {
    "user".to_string()
}

impl ProtocolConfig {
    pub fn program_id(&self) -> Result<Pubkey, String> {
        self.program_id.parse()
    }

    /// Parsed trusted oracle keys; malformed entries are skipped with a warning
    pub fn trusted_signers(&self) -> Vec<Pubkey> {
        self.trusted_vrf_signers
            .iter()
            .filter_map(|s| match s.parse::<Pubkey>() {
                Ok(pk) => Some(pk),
                Err(e) => {
                    warn!("Ignoring trusted VRF signer '{}': {}", s, e);
                    None
                }
            })
            .collect()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RelayConfig {
    /// Time for a delegation/undelegation to reach the other layer
    pub delegation_delay_ms: u64,
    /// Time for a scheduled commit to land on the base layer
    pub commit_delay_ms: u64,
    pub tick_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            delegation_delay_ms: 500,
            commit_delay_ms: 250,
            tick_ms: 50,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ClientConfig {
    pub poll_initial_ms: u64,
    pub poll_max_ms: u64,
    pub commit_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_initial_ms: 100,
            poll_max_ms: 2_000,
            commit_timeout_ms: 30_000,
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig {
                db_path: "./data/base".to_string(),
                log_level: "info".to_string(),
                identity_file: default_identity_file(),
                validator_identity_file: default_validator_identity_file(),
            },
            protocol: ProtocolConfig {
                namespace_tag: default_namespace_tag(),
                program_id: hex::encode([0x11u8; 32]),
                rent_reserve: 1_447_680,
                trusted_vrf_signers: vec![],
            },
            relay: RelayConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

impl LifecycleConfig {
    /// Like [`LifecycleConfig::load_or_default`] but never writes a file
    pub fn read_or_default(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => match toml::from_str(&s) {
                Ok(c) => {
                    info!("Config loaded from {}", path);
                    c
                }
                Err(e) => {
                    warn!("Error parsing config: {}. Using Defaults.", e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn load_or_default(path: &str) -> Self {
        if std::path::Path::new(path).exists() {
            match std::fs::read_to_string(path) {
                Ok(s) => match toml::from_str(&s) {
                    Ok(c) => {
                        info!("Config loaded from {}", path);
                        c
                    }
                    Err(e) => {
                        warn!("Error parsing config: {}. Using Defaults.", e);
                        Self::default()
                    }
                },
                Err(e) => {
                    warn!("Error reading config: {}. Using Defaults.", e);
                    Self::default()
                }
            }
        } else {
            info!("Config file not found at '{}'. Creating default.", path);
            let config = Self::default();
            if let Ok(s) = toml::to_string_pretty(&config) {
                if let Err(e) = std::fs::write(path, s) {
                    warn!("Could not write default config: {}", e);
                }
            }
            config
        }
    }
}

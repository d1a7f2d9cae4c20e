//! Cluster configuration (spec §3, §9 "Declarative wiring").
//!
//! Deserialized from TOML by the facade crate; kept here so protocol code
//! can depend on the shape of the config without depending on the facade.

use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ids::NodeId;

/// One statically-known peer to dial or accept from.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PeerConfig {
    pub id: NodeId,
    pub host: IpAddr,
    pub port: u16,
}

/// Top-level cluster configuration.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ClusterConfig {
    pub self_id: NodeId,
    #[serde(default)]
    pub key: String,
    pub bind_host: IpAddr,
    pub bind_port: u16,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_rediscovery_interval_ms")]
    pub rediscovery_interval_ms: u64,
}

/// 1-second connect probe (spec §5).
fn default_connect_timeout_ms() -> u64 {
    1_000
}

/// Fixed 5-second retry interval (spec §5, "retry loop with fixed back-off").
fn default_backoff_base_ms() -> u64 {
    5_000
}

fn default_rediscovery_interval_ms() -> u64 {
    10_000
}

impl ClusterConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn rediscovery_interval(&self) -> Duration {
        Duration::from_millis(self.rediscovery_interval_ms)
    }

    /// Parses a `ClusterConfig` from a TOML document.
    pub fn from_toml(src: &str) -> Result<Self, ConfigError> {
        toml::from_str(src).map_err(|source| ConfigError::Parse { source })
    }
}

/// Configuration-loading errors, kept distinct from [`crate::error::SyncError`]
/// since they surface at startup, before any protocol state exists.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse cluster config: {source}")]
    Parse {
        #[source]
        source: toml::de::Error,
    },
    #[error("config validation failed: {reason}")]
    Invalid { reason: String },
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.self_id == crate::ids::UNKNOWN_NODE_ID {
            return Err(ConfigError::Invalid {
                reason: "self_id must not be the reserved UNKNOWN_NODE_ID sentinel".into(),
            });
        }
        for peer in &self.peers {
            if peer.id == self.self_id {
                return Err(ConfigError::Invalid {
                    reason: format!("peer list contains this node's own id ({})", peer.id),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let src = r#"
            self_id = 1
            bind_host = "127.0.0.1"
            bind_port = 7000
        "#;
        let cfg = ClusterConfig::from_toml(src).unwrap();
        assert_eq!(cfg.self_id, 1);
        assert_eq!(cfg.connect_timeout_ms, 1_000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_self_in_peer_list() {
        let src = r#"
            self_id = 1
            bind_host = "127.0.0.1"
            bind_port = 7000

            [[peers]]
            id = 1
            host = "127.0.0.1"
            port = 7001
        "#;
        let cfg = ClusterConfig::from_toml(src).unwrap();
        assert!(cfg.validate().is_err());
    }
}

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::util::id::Guid;

/// Top-level YAML configuration. Unknown keys anywhere in the tree are
/// ignored so configs can carry deployment-specific extras.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub container: ContainerConfig,
    #[serde(default)]
    pub time: TimeConfig,
    pub actor: ActorConfig,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Worker threads for the bus runtime.
    #[serde(default = "default_bus_workers")]
    pub bus_workers: usize,
    /// Bind address for the TCP bus; absent means local-only operation.
    #[serde(default)]
    pub bus_listen: Option<String>,
}

fn default_bus_workers() -> usize {
    2
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_log_file() -> String {
    "actor.log".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_dir: default_log_dir(),
            log_file: default_log_file(),
            log_level: default_log_level(),
        }
    }
}

/// Token-validation material. Absent keys put the access checker into open
/// mode, which is only sensible for development rigs.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct OAuthConfig {
    #[serde(default)]
    pub keys: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub trusted_issuers: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "state".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig { path: default_db_path() }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ContainerConfig {
    #[serde(default)]
    pub guid: Option<Guid>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TimeConfig {
    /// Epoch of cycle 0, milliseconds since the Unix epoch.
    #[serde(default)]
    pub beginning_of_time: i64,
    #[serde(default = "default_cycle_millis")]
    pub cycle_millis: u64,
    /// Manual clocks tick only through the management plane; used by tests
    /// and simulations.
    #[serde(default)]
    pub manual: bool,
}

fn default_cycle_millis() -> u64 {
    1000
}

impl Default for TimeConfig {
    fn default() -> Self {
        TimeConfig { beginning_of_time: 0, cycle_millis: default_cycle_millis(), manual: false }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ActorConfig {
    #[serde(rename = "type")]
    pub actor_type: String,
    pub name: String,
    #[serde(default)]
    pub guid: Option<Guid>,
    #[serde(rename = "kafka-topic", default)]
    pub kafka_topic: Option<String>,
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
    #[serde(default)]
    pub controls: Vec<ControlConfig>,
    #[serde(default)]
    pub policy: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PoolConfig {
    #[serde(rename = "type")]
    pub rtype: String,
    pub units: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ControlConfig {
    #[serde(rename = "type")]
    pub control_type: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PeerConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub peer_type: String,
    #[serde(default)]
    pub guid: Option<Guid>,
    #[serde(rename = "kafka-topic", default)]
    pub kafka_topic: Option<String>,
    /// Bus address (`host:port`); absent peers are expected in-process.
    #[serde(default)]
    pub addr: Option<String>,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::InvalidArguments(format!("cannot read config {}: {}", path.as_ref().display(), e)))?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| Error::InvalidArguments(format!("malformed config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config_and_ignores_unknown_keys() {
        let raw = r#"
runtime:
  bus_workers: 4
  extra-key: ignored
logging:
  log_dir: /tmp/logs
  log_level: debug
database:
  path: /tmp/state
time:
  cycle_millis: 50
  manual: true
actor:
  type: authority
  name: site-a
  kafka-topic: site-a-topic
  pools:
    - type: vm
      units: 16
  policy: authority-unit
peers:
  - name: broker-1
    type: broker
    addr: 127.0.0.1:7001
unknown-section:
  whatever: true
"#;
        let config = Config::from_yaml(raw).unwrap();
        assert_eq!(config.actor.actor_type, "authority");
        assert_eq!(config.actor.name, "site-a");
        assert_eq!(config.actor.pools[0].units, 16);
        assert_eq!(config.time.cycle_millis, 50);
        assert!(config.time.manual);
        assert_eq!(config.peers.len(), 1);
        assert_eq!(config.peers[0].addr.as_deref(), Some("127.0.0.1:7001"));
        assert_eq!(config.runtime.bus_workers, 4);
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let raw = "actor:\n  type: orchestrator\n  name: orch\n";
        let config = Config::from_yaml(raw).unwrap();
        assert_eq!(config.time.cycle_millis, 1000);
        assert_eq!(config.logging.log_level, "info");
        assert_eq!(config.database.path, "state");
        assert!(config.peers.is_empty());
    }
}

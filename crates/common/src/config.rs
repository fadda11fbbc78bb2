//! SDK configuration using TOML and serde.
//!
//! Every recognized option has a built-in default. Resolution order,
//! strongest first:
//!
//! 1. Environment variable: `FABRIC_SDK_` + the option key upper-cased
//!    with `.` and `-` mapped to `_` (e.g. `proposal.wait.time` →
//!    `FABRIC_SDK_PROPOSAL_WAIT_TIME`)
//! 2. TOML file handed to [`SdkConfig::load`]
//! 3. Built-in default
//!
//! | Key | Default | Effect |
//! |---|---|---|
//! | `proposal.wait.time` | 30000 ms | Per-peer endorsement deadline |
//! | `channelconfig.wait_time` | 15000 ms | Config-block fetch timeout |
//! | `transaction_cleanup_timeout` | 600000 ms | Commit-listener lifetime |
//! | `orderer.retry_wait_time` | 200 ms | Broadcast retry backoff |
//! | `orderer.wait_time` | 10000 ms | Per-broadcast deadline |
//! | `peer.event_registration.wait_time` | 5000 ms | Register-ack deadline |
//! | `peer.retry_wait_time` | 500 ms | Event-hub reconnect backoff |
//! | `eventhub.reconnection_warning_rate` | 50 | Warn every N failures |
//! | `channel.genesisblock_wait_time` | 5000 ms | Genesis-block deadline |
//! | `security_level` | 256 | EC key strength |
//! | `security_curve_mapping` | `256=P-256:384=P-384` | Strength → curve |
//! | `hash_algorithm` | `SHA2` | Hash family |
//! | `signature_algorithm` | `SHA256withECDSA` | Signing algorithm |
//! | `proposal.consistency_validation` | true | Enforce consistent endorsements |
//! | `service_discovery.frequency_sec` | 120 | Discovery cadence |

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("environment override {key} is not a valid value: {value}")]
    BadOverride { key: &'static str, value: String },
}

/// Typed SDK settings. Construct with [`SdkConfig::default`] or
/// [`SdkConfig::load`]; all timing fields are milliseconds unless the
/// name says otherwise.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SdkConfig {
    pub proposal_wait_time: u64,
    pub channel_config_wait_time: u64,
    pub transaction_cleanup_timeout: u64,
    pub orderer_retry_wait_time: u64,
    pub orderer_wait_time: u64,
    pub peer_event_registration_wait_time: u64,
    pub peer_retry_wait_time: u64,
    pub eventhub_reconnection_warning_rate: u64,
    pub genesis_block_wait_time: u64,
    pub security_level: u32,
    pub security_curve_mapping: String,
    pub hash_algorithm: String,
    pub signature_algorithm: String,
    pub proposal_consistency_validation: bool,
    pub service_discovery_frequency_sec: u64,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            proposal_wait_time: 30_000,
            channel_config_wait_time: 15_000,
            transaction_cleanup_timeout: 600_000,
            orderer_retry_wait_time: 200,
            orderer_wait_time: 10_000,
            peer_event_registration_wait_time: 5_000,
            peer_retry_wait_time: 500,
            eventhub_reconnection_warning_rate: 50,
            genesis_block_wait_time: 5_000,
            security_level: 256,
            security_curve_mapping: "256=P-256:384=P-384".to_string(),
            hash_algorithm: "SHA2".to_string(),
            signature_algorithm: "SHA256withECDSA".to_string(),
            proposal_consistency_validation: true,
            service_discovery_frequency_sec: 120,
        }
    }
}

/// One (env key, setter) pair per overridable field.
macro_rules! env_overrides {
    ($cfg:ident, $(($env:literal, $field:ident, $ty:ty)),+ $(,)?) => {
        $(
            if let Ok(raw) = std::env::var($env) {
                let parsed: $ty = raw.parse().map_err(|_| ConfigError::BadOverride {
                    key: $env,
                    value: raw.clone(),
                })?;
                debug!(key = $env, value = %raw, "config override from environment");
                $cfg.$field = parsed;
            }
        )+
    };
}

impl SdkConfig {
    /// Loads settings: defaults, then the optional TOML file, then
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(p) => {
                let raw = fs::read_to_string(p)?;
                toml::from_str(&raw)?
            }
            None => Self::default(),
        };
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    /// Applies `FABRIC_SDK_*` environment overrides in place.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        env_overrides!(
            self,
            ("FABRIC_SDK_PROPOSAL_WAIT_TIME", proposal_wait_time, u64),
            ("FABRIC_SDK_CHANNELCONFIG_WAIT_TIME", channel_config_wait_time, u64),
            ("FABRIC_SDK_TRANSACTION_CLEANUP_TIMEOUT", transaction_cleanup_timeout, u64),
            ("FABRIC_SDK_ORDERER_RETRY_WAIT_TIME", orderer_retry_wait_time, u64),
            ("FABRIC_SDK_ORDERER_WAIT_TIME", orderer_wait_time, u64),
            (
                "FABRIC_SDK_PEER_EVENT_REGISTRATION_WAIT_TIME",
                peer_event_registration_wait_time,
                u64
            ),
            ("FABRIC_SDK_PEER_RETRY_WAIT_TIME", peer_retry_wait_time, u64),
            (
                "FABRIC_SDK_EVENTHUB_RECONNECTION_WARNING_RATE",
                eventhub_reconnection_warning_rate,
                u64
            ),
            ("FABRIC_SDK_CHANNEL_GENESISBLOCK_WAIT_TIME", genesis_block_wait_time, u64),
            ("FABRIC_SDK_SECURITY_LEVEL", security_level, u32),
            ("FABRIC_SDK_SECURITY_CURVE_MAPPING", security_curve_mapping, String),
            ("FABRIC_SDK_HASH_ALGORITHM", hash_algorithm, String),
            ("FABRIC_SDK_SIGNATURE_ALGORITHM", signature_algorithm, String),
            (
                "FABRIC_SDK_PROPOSAL_CONSISTENCY_VALIDATION",
                proposal_consistency_validation,
                bool
            ),
            (
                "FABRIC_SDK_SERVICE_DISCOVERY_FREQUENCY_SEC",
                service_discovery_frequency_sec,
                u64
            ),
        );
        Ok(())
    }

    /// Parses `security_curve_mapping` (`256=P-256:384=P-384`) into
    /// (level, curve-name) pairs. Malformed segments are skipped.
    pub fn curve_mapping(&self) -> Vec<(u32, String)> {
        self.security_curve_mapping
            .split(':')
            .filter_map(|seg| {
                let (level, curve) = seg.split_once('=')?;
                Some((level.trim().parse().ok()?, curve.trim().to_string()))
            })
            .collect()
    }

    pub fn proposal_wait(&self) -> Duration {
        Duration::from_millis(self.proposal_wait_time)
    }

    pub fn channel_config_wait(&self) -> Duration {
        Duration::from_millis(self.channel_config_wait_time)
    }

    pub fn transaction_cleanup(&self) -> Duration {
        Duration::from_millis(self.transaction_cleanup_timeout)
    }

    pub fn orderer_retry_wait(&self) -> Duration {
        Duration::from_millis(self.orderer_retry_wait_time)
    }

    pub fn orderer_wait(&self) -> Duration {
        Duration::from_millis(self.orderer_wait_time)
    }

    pub fn peer_event_registration_wait(&self) -> Duration {
        Duration::from_millis(self.peer_event_registration_wait_time)
    }

    pub fn peer_retry_wait(&self) -> Duration {
        Duration::from_millis(self.peer_retry_wait_time)
    }

    pub fn genesis_block_wait(&self) -> Duration {
        Duration::from_millis(self.genesis_block_wait_time)
    }

    pub fn service_discovery_frequency(&self) -> Duration {
        Duration::from_secs(self.service_discovery_frequency_sec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_option_table() {
        let cfg = SdkConfig::default();
        assert_eq!(cfg.proposal_wait_time, 30_000);
        assert_eq!(cfg.channel_config_wait_time, 15_000);
        assert_eq!(cfg.transaction_cleanup_timeout, 600_000);
        assert_eq!(cfg.orderer_retry_wait_time, 200);
        assert_eq!(cfg.orderer_wait_time, 10_000);
        assert_eq!(cfg.peer_event_registration_wait_time, 5_000);
        assert_eq!(cfg.peer_retry_wait_time, 500);
        assert_eq!(cfg.eventhub_reconnection_warning_rate, 50);
        assert_eq!(cfg.genesis_block_wait_time, 5_000);
        assert_eq!(cfg.security_level, 256);
        assert_eq!(cfg.hash_algorithm, "SHA2");
        assert!(cfg.proposal_consistency_validation);
        assert_eq!(cfg.service_discovery_frequency_sec, 120);
    }

    #[test]
    fn file_overrides_defaults() {
        let mut tmp = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            tmp,
            r#"
            proposal_wait_time = 1234
            hash_algorithm = "SHA3"
            proposal_consistency_validation = false
            "#
        )
        .expect("write");

        let cfg = SdkConfig::load(Some(tmp.path())).expect("load");
        assert_eq!(cfg.proposal_wait_time, 1234);
        assert_eq!(cfg.hash_algorithm, "SHA3");
        assert!(!cfg.proposal_consistency_validation);
        // Untouched keys keep their defaults.
        assert_eq!(cfg.orderer_wait_time, 10_000);
    }

    #[test]
    fn env_beats_file() {
        let mut tmp = tempfile::NamedTempFile::new().expect("temp file");
        write!(tmp, "orderer_retry_wait_time = 900").expect("write");

        std::env::set_var("FABRIC_SDK_ORDERER_RETRY_WAIT_TIME", "77");
        let cfg = SdkConfig::load(Some(tmp.path())).expect("load");
        std::env::remove_var("FABRIC_SDK_ORDERER_RETRY_WAIT_TIME");

        assert_eq!(cfg.orderer_retry_wait_time, 77);
    }

    #[test]
    fn bad_env_value_is_an_error() {
        std::env::set_var("FABRIC_SDK_SECURITY_LEVEL", "not-a-number");
        let mut cfg = SdkConfig::default();
        let result = cfg.apply_env_overrides();
        std::env::remove_var("FABRIC_SDK_SECURITY_LEVEL");

        assert!(matches!(result, Err(ConfigError::BadOverride { .. })));
    }

    #[test]
    fn curve_mapping_parses_default() {
        let cfg = SdkConfig::default();
        let mapping = cfg.curve_mapping();
        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping[0], (256, "P-256".to_string()));
        assert_eq!(mapping[1], (384, "P-384".to_string()));
    }

    #[test]
    fn curve_mapping_skips_malformed_segments() {
        let cfg = SdkConfig {
            security_curve_mapping: "256=P-256:broken:x=P-521".to_string(),
            ..SdkConfig::default()
        };
        assert_eq!(cfg.curve_mapping(), vec![(256, "P-256".to_string())]);
    }

    #[test]
    fn duration_accessors() {
        let cfg = SdkConfig::default();
        assert_eq!(cfg.proposal_wait(), Duration::from_secs(30));
        assert_eq!(cfg.transaction_cleanup(), Duration::from_secs(600));
        assert_eq!(cfg.service_discovery_frequency(), Duration::from_secs(120));
    }
}

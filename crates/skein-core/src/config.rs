//! Configuration for the transfer subsystem.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $SKEIN_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/skein/config.toml
//!   3. ~/.config/skein/config.toml
//!
//! The dynamic-rebalance thresholds are empirically tuned values with no
//! derivation behind them; they live here so they can be re-tuned without
//! a rebuild.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::wire::MAX_PACKET_DATA_SIZE;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub throttle: ThrottleConfig,
    pub rebalance: RebalanceConfig,
    pub transfer: TransferTuning,
    pub asset: AssetConfig,
}

/// Nominal per-category bandwidth. These are the operator-configured
/// baselines; the group rebalances around them at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub resend_bps: f64,
    pub land_bps: f64,
    pub wind_bps: f64,
    pub cloud_bps: f64,
    pub task_bps: f64,
    pub texture_bps: f64,
    pub asset_bps: f64,
    /// Seconds of burst credit a bucket may accrue while idle.
    pub lookahead_secs: f64,
}

impl ThrottleConfig {
    /// Nominal rates in fixed category order:
    /// [Resend, Land, Wind, Cloud, Task, Texture, Asset].
    pub fn nominal_bps(&self) -> [f64; 7] {
        [
            self.resend_bps,
            self.land_bps,
            self.wind_bps,
            self.cloud_bps,
            self.task_bps,
            self.texture_bps,
            self.asset_bps,
        ]
    }
}

/// Dynamic rebalancing tuning. A category is "busy" when its send history
/// reaches `busy_fraction` of its current rate, "idle" below
/// `idle_fraction` with unspent credit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RebalanceConfig {
    /// Minimum seconds between adjustment passes.
    pub interval_secs: f64,
    pub busy_fraction: f64,
    pub idle_fraction: f64,
    /// Fraction of unused capacity an idle category surrenders while
    /// someone is busy.
    pub surrender_fraction: f64,
    /// Fraction of above-nominal excess given back per pass when nobody
    /// is busy.
    pub giveback_fraction: f64,
    /// No category grows past `cap_multiple * nominal`; overflow beyond
    /// the cap lands on the Task category.
    pub cap_multiple: f64,
    /// No category shrinks below `floor_fraction * nominal`.
    pub floor_fraction: f64,
}

/// Packet sizing and buffering limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferTuning {
    /// Data bytes per TransferPacket. Clamped to the wire maximum.
    pub packet_data_size: usize,
    /// Out-of-order packets a target will buffer before giving up on the
    /// transfer.
    pub max_delayed_packets: usize,
}

/// Asset request lifecycle limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Absolute timeout for pending downloads. Uploads are exempt.
    pub request_timeout_secs: f64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            resend_bps: 100_000.0,
            land_bps: 144_000.0,
            wind_bps: 20_000.0,
            cloud_bps: 20_000.0,
            task_bps: 170_000.0,
            texture_bps: 446_000.0,
            asset_bps: 100_000.0,
            lookahead_secs: 0.25,
        }
    }
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: 1.0,
            busy_fraction: 0.75,
            idle_fraction: 0.70,
            surrender_fraction: 0.90,
            giveback_fraction: 0.25,
            cap_multiple: 4.0,
            floor_fraction: 0.10,
        }
    }
}

impl Default for TransferTuning {
    fn default() -> Self {
        Self {
            packet_data_size: 1000,
            max_delayed_packets: 100,
        }
    }
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 300.0,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            std::env::var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("skein")
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl TransferConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            TransferConfig::default()
        };
        config.apply_env_overrides();
        config.clamp();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("SKEIN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&TransferConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply SKEIN_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SKEIN_TRANSFER__PACKET_DATA_SIZE") {
            if let Ok(n) = v.parse() {
                self.transfer.packet_data_size = n;
            }
        }
        if let Ok(v) = std::env::var("SKEIN_ASSET__REQUEST_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.asset.request_timeout_secs = n;
            }
        }
    }

    /// Keep tunables inside wire limits.
    fn clamp(&mut self) {
        if self.transfer.packet_data_size > MAX_PACKET_DATA_SIZE {
            self.transfer.packet_data_size = MAX_PACKET_DATA_SIZE;
        }
        if self.transfer.packet_data_size == 0 {
            self.transfer.packet_data_size = TransferTuning::default().packet_data_size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rebalance_constants_match_tuning() {
        let config = TransferConfig::default();
        assert_eq!(config.rebalance.busy_fraction, 0.75);
        assert_eq!(config.rebalance.idle_fraction, 0.70);
        assert_eq!(config.rebalance.surrender_fraction, 0.90);
        assert_eq!(config.rebalance.giveback_fraction, 0.25);
        assert_eq!(config.rebalance.cap_multiple, 4.0);
    }

    #[test]
    fn default_packet_size_fits_wire_limit() {
        let config = TransferConfig::default();
        assert!(config.transfer.packet_data_size <= MAX_PACKET_DATA_SIZE);
        assert_eq!(config.transfer.max_delayed_packets, 100);
    }

    #[test]
    fn toml_round_trip() {
        let config = TransferConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: TransferConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.throttle.texture_bps, config.throttle.texture_bps);
        assert_eq!(back.asset.request_timeout_secs, 300.0);
    }

    #[test]
    fn partial_file_fills_from_defaults() {
        let back: TransferConfig = toml::from_str("[asset]\nrequest_timeout_secs = 60.0\n").unwrap();
        assert_eq!(back.asset.request_timeout_secs, 60.0);
        assert_eq!(back.transfer.packet_data_size, 1000);
    }

    #[test]
    fn clamp_bounds_packet_size() {
        let mut config = TransferConfig::default();
        config.transfer.packet_data_size = 1 << 20;
        config.clamp();
        assert_eq!(config.transfer.packet_data_size, MAX_PACKET_DATA_SIZE);
    }
}

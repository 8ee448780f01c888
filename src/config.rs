//! Runtime configuration
//!
//! Every section falls back to its defaults, so a config file only needs the
//! keys it changes. Command line flags override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::assets::{
    COLOR_FRAME_RATE, DEFAULT_LISTEN_ADDR, FINALIZE_GRACE_MS, FPS_WINDOW_MS,
    MAX_FRAME_PAYLOAD_SIZE, STATS_LOG_INTERVAL_SECS,
};
use crate::depth::DepthRange;
use crate::error::{Error, Result};
use crate::pipeline::clock::EpochPolicy;
use crate::pipeline::receiver::DecodeMode;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub depth: DepthRange,
    pub recording: RecordingConfig,
    pub receiver: ReceiverConfig,
    pub stats: StatsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Listen address for `serve`, peer address for `stream`
    pub addr: String,
    pub max_payload_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_LISTEN_ADDR.to_string(),
            max_payload_size: MAX_FRAME_PAYLOAD_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub output_dir: PathBuf,
    /// Upper bound on waiting for both outputs to finalize
    pub grace_timeout_ms: u64,
    pub epoch_stream: EpochPolicy,
    /// Constant frame rate of the written files
    pub frame_rate: u32,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("recordings"),
            grace_timeout_ms: FINALIZE_GRACE_MS,
            epoch_stream: EpochPolicy::Rgb,
            frame_rate: COLOR_FRAME_RATE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub decode_mode: DecodeMode,
    /// Consecutive color decode failures before the session is rebuilt
    pub consecutive_failure_reset: u32,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            decode_mode: DecodeMode::PerStream,
            consecutive_failure_reset: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub fps_window_ms: u64,
    pub log_interval_secs: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            fps_window_ms: FPS_WINDOW_MS,
            log_interval_secs: STATS_LOG_INTERVAL_SECS,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: AppConfig = serde_json::from_str(text)
            .map_err(|e| Error::Configuration(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.depth.validate()?;
        if self.network.max_payload_size == 0 {
            return Err(Error::Configuration(
                "network.max_payload_size must be positive".into(),
            ));
        }
        if self.recording.frame_rate == 0 {
            return Err(Error::Configuration(
                "recording.frame_rate must be positive".into(),
            ));
        }
        if self.receiver.consecutive_failure_reset == 0 {
            return Err(Error::Configuration(
                "receiver.consecutive_failure_reset must be positive".into(),
            ));
        }
        if self.stats.fps_window_ms == 0 || self.stats.log_interval_secs == 0 {
            return Err(Error::Configuration(
                "stats windows must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn grace_timeout(&self) -> Duration {
        Duration::from_millis(self.recording.grace_timeout_ms)
    }

    pub fn fps_window(&self) -> Duration {
        Duration::from_millis(self.stats.fps_window_ms)
    }

    pub fn log_interval(&self) -> Duration {
        Duration::from_secs(self.stats.log_interval_secs)
    }
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = AppConfig::from_json("{}").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.network.max_payload_size, 16 * 1024 * 1024);
        assert_eq!(config.recording.epoch_stream, EpochPolicy::Rgb);
        assert_eq!(config.receiver.decode_mode, DecodeMode::PerStream);
        assert_eq!(config.grace_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_sections() {
        let config = AppConfig::from_json(
            r#"{
                "depth": { "max_depth": 8.0 },
                "recording": { "epoch_stream": "any" },
                "receiver": { "decode_mode": "inline" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.depth.min_depth, 0.5);
        assert_eq!(config.depth.max_depth, 8.0);
        assert_eq!(config.recording.epoch_stream, EpochPolicy::Any);
        assert_eq!(config.receiver.decode_mode, DecodeMode::Inline);
        assert_eq!(config.receiver.consecutive_failure_reset, 10);
    }

    #[test]
    fn test_rejects_inverted_range() {
        let err = AppConfig::from_json(r#"{ "depth": { "min_depth": 6.0 } }"#).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_rejects_unknown_epoch_stream() {
        assert!(AppConfig::from_json(r#"{ "recording": { "epoch_stream": "depth" } }"#).is_err());
    }
}

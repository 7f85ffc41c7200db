// Timing, topics, and bring-up configuration
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::actuator::{DEFAULT_BAUDRATE, DEFAULT_BOARD_ID};
use crate::controller::ControllerConfig;

// Poll and ramp tick for every blocking wait
pub const TICK_MS: u32 = 8;
pub const TICK: Duration = Duration::from_millis(TICK_MS as u64);

// Longest a primitive may take to settle before it is reported as a fault
pub const DEFAULT_SETTLE_TIMEOUT_MS: u64 = 10_000;

// Runtime status/watchdog loop frequency
pub const LOOP_HZ: u64 = 50;

// Stop walking if no walk or velocity command arrives for this long
pub const DEFAULT_CMD_TIMEOUT_MS: u64 = 1_000;

// Zenoh topics
pub const TOPIC_CMD_MOTION: &str = "robot/cmd/motion"; // commands
pub const TOPIC_SENSE_FALL: &str = "robot/sense/fall"; // fall direction from the IMU node
pub const TOPIC_ACK: &str = "robot/state/ack"; // per-command results
pub const TOPIC_STATUS: &str = "robot/state/motion"; // periodic motion status

// Serial port for the motion board
pub const DEFAULT_DEVICE: &str = "/dev/ttyUSB0";

/// Which actuator backend to bring up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Hardware,
    Stub,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Startup configuration for the runtime binary
///
/// Every field has a default, so an empty JSON object is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub backend: BackendKind,
    pub device: String,
    pub baudrate: u32,
    pub board_id: u8,
    /// Paged motion file listing the available actions
    pub motion_file: Option<PathBuf>,
    /// Program used to play action audio, e.g. "mpg123"
    pub audio_player: Option<String>,
    pub audio_args: Vec<String>,
    /// `None` disables the walking watchdog
    pub watchdog_timeout_ms: Option<u64>,
    pub controller: ControllerConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            device: DEFAULT_DEVICE.to_string(),
            baudrate: DEFAULT_BAUDRATE,
            board_id: DEFAULT_BOARD_ID,
            motion_file: None,
            audio_player: None,
            audio_args: Vec::new(),
            watchdog_timeout_ms: Some(DEFAULT_CMD_TIMEOUT_MS),
            controller: ControllerConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading config from {}", path.display());
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn watchdog_timeout(&self) -> Option<Duration> {
        self.watchdog_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ActionIndex;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = RuntimeConfig::from_json("{}").unwrap();
        assert_eq!(config.backend, BackendKind::Hardware);
        assert_eq!(config.device, DEFAULT_DEVICE);
        assert_eq!(config.board_id, DEFAULT_BOARD_ID);
        assert_eq!(
            config.watchdog_timeout(),
            Some(Duration::from_millis(DEFAULT_CMD_TIMEOUT_MS))
        );
        assert_eq!(config.controller.forward_recovery_action, ActionIndex(10));
        assert_eq!(config.controller.backward_recovery_action, ActionIndex(11));
    }

    #[test]
    fn test_partial_config() {
        let config = RuntimeConfig::from_json(
            r#"{
                "backend": "stub",
                "motion_file": "/opt/robot/motion_4096.bin",
                "watchdog_timeout_ms": null,
                "controller": { "walk_ready_action": 9, "settle_timeout_ms": 500 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.backend, BackendKind::Stub);
        assert_eq!(
            config.motion_file.as_deref(),
            Some(Path::new("/opt/robot/motion_4096.bin"))
        );
        assert_eq!(config.watchdog_timeout(), None);
        assert_eq!(config.controller.walk_ready_action, Some(ActionIndex(9)));
        assert_eq!(config.controller.settle_timeout(), Duration::from_millis(500));
        assert_eq!(config.controller.init_action, None);
    }

    #[test]
    fn test_missing_file() {
        let err = RuntimeConfig::load(Path::new("/nonexistent/motion.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}

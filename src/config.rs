// Timeouts, topics, motor configuration
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::motion::WatchdogTiming;
use crate::motor::DutyCalibration;
use crate::motor::pwm::period_ns;

// Fixed PWM frequency for both motor drivers
pub const PWM_FREQ_HZ: u32 = 20_000;

// Watchdog tick period and inactivity windows
pub const WATCHDOG_TICK: Duration = Duration::from_millis(100);
pub const LINEAR_WINDOW: Duration = Duration::from_millis(1000);
pub const ROTATION_WINDOW: Duration = Duration::from_millis(500);

// State publishing frequency
pub const STATE_HZ: u64 = 10;

// HTTP control page and command endpoint
pub const HTTP_ADDR: &str = "0.0.0.0:8080";

// Zenoh topics
pub const TOPIC_CMD_MOTION: &str = "diffbot/cmd/motion"; // commands
pub const TOPIC_STATE_MOTION: &str = "diffbot/state/motion"; // controller state
pub const TOPIC_HEALTH: &str = "diffbot/state/health"; // health status

// Calibrated duty cycles (ns at 20kHz), tuned per wheel
pub const LEFT_DUTY_NS: u32 = 15_450;
pub const RIGHT_DUTY_NS: u32 = 14_500;

/// Error types for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Sysfs channels and calibration for one wheel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorConfig {
    pub chip: u32,
    pub forward_channel: u32,
    pub backward_channel: u32,
    pub calibration: DutyCalibration,
}

/// Watchdog timing in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub tick_ms: u64,
    pub linear_window_ms: u64,
    pub rotation_window_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_ms: WATCHDOG_TICK.as_millis() as u64,
            linear_window_ms: LINEAR_WINDOW.as_millis() as u64,
            rotation_window_ms: ROTATION_WINDOW.as_millis() as u64,
        }
    }
}

/// Robot hardware configuration, loaded from JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    pub left: MotorConfig,
    pub right: MotorConfig,
    pub timing: TimingConfig,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            left: MotorConfig {
                chip: 0,
                forward_channel: 0,
                backward_channel: 1,
                calibration: DutyCalibration::symmetric(LEFT_DUTY_NS),
            },
            right: MotorConfig {
                chip: 1,
                forward_channel: 0,
                backward_channel: 1,
                calibration: DutyCalibration::symmetric(RIGHT_DUTY_NS),
            },
            timing: TimingConfig::default(),
        }
    }
}

impl RobotConfig {
    /// Load and validate a JSON config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Parse and validate a JSON document; missing sections use defaults
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let period = period_ns(PWM_FREQ_HZ).map_err(|e| ConfigError::Invalid(e.to_string()))?;

        for (name, motor) in [("left", &self.left), ("right", &self.right)] {
            if motor.forward_channel == motor.backward_channel {
                return Err(ConfigError::Invalid(format!(
                    "{} motor uses channel {} for both directions",
                    name, motor.forward_channel
                )));
            }
            let cal = motor.calibration;
            if cal.forward_ns > period || cal.backward_ns > period {
                return Err(ConfigError::Invalid(format!(
                    "{} motor duty exceeds {}ns period",
                    name, period
                )));
            }
        }

        let t = &self.timing;
        if t.tick_ms == 0 {
            return Err(ConfigError::Invalid("watchdog tick must be non-zero".into()));
        }
        if t.linear_window_ms <= t.tick_ms || t.rotation_window_ms <= t.tick_ms {
            return Err(ConfigError::Invalid(
                "inactivity windows must be longer than the watchdog tick".into(),
            ));
        }
        Ok(())
    }

    pub fn watchdog_timing(&self) -> WatchdogTiming {
        WatchdogTiming {
            tick: Duration::from_millis(self.timing.tick_ms),
            linear_window: Duration::from_millis(self.timing.linear_window_ms),
            rotation_window: Duration::from_millis(self.timing.rotation_window_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RobotConfig::default();
        config.validate().unwrap();
        assert_eq!(config.watchdog_timing(), WatchdogTiming::default());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = RobotConfig::from_json(r#"{"timing": {"rotation_window_ms": 400}}"#).unwrap();
        assert_eq!(config.timing.rotation_window_ms, 400);
        assert_eq!(config.timing.linear_window_ms, 1000);
        assert_eq!(config.left.calibration.forward_ns, LEFT_DUTY_NS);
    }

    #[test]
    fn test_asymmetric_calibration() {
        let json = r#"{
            "left": {"chip": 0, "forward_channel": 0, "backward_channel": 1,
                     "calibration": {"forward_ns": 16000, "backward_ns": 15000}}
        }"#;
        let config = RobotConfig::from_json(json).unwrap();
        assert_eq!(config.left.calibration, DutyCalibration::new(16_000, 15_000));
        assert_eq!(config.right.calibration.forward_ns, RIGHT_DUTY_NS);
    }

    #[test]
    fn test_rejects_duty_above_period() {
        let mut config = RobotConfig::default();
        config.right.calibration = DutyCalibration::symmetric(60_000);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_window_shorter_than_tick() {
        let mut config = RobotConfig::default();
        config.timing.rotation_window_ms = 50;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_shared_channel() {
        let mut config = RobotConfig::default();
        config.left.backward_channel = config.left.forward_channel;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            RobotConfig::from_json("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}

// Two-channel motor driver (H-bridge style)
//
// One channel spins the wheel forward, the other backward. At most one of
// them carries a non-zero duty at any time.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::pwm::{PwmChannel, Result};
use crate::config::PWM_FREQ_HZ;

/// Wheel spin direction for a single motor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Forward,
    Backward,
}

/// Command for a single motor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorCommand {
    Stop,
    Drive { duty_ns: u32, polarity: Polarity },
}

/// Calibrated duty magnitudes for one wheel
///
/// Wheels are tuned independently to compensate mechanical bias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DutyCalibration {
    pub forward_ns: u32,
    pub backward_ns: u32,
}

impl DutyCalibration {
    pub fn new(forward_ns: u32, backward_ns: u32) -> Self {
        Self {
            forward_ns,
            backward_ns,
        }
    }

    /// Same magnitude in both directions
    pub fn symmetric(duty_ns: u32) -> Self {
        Self::new(duty_ns, duty_ns)
    }
}

/// Duty currently output on each channel of a driver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DutyPair {
    pub forward_ns: u32,
    pub backward_ns: u32,
}

impl DutyPair {
    pub fn is_zero(&self) -> bool {
        self.forward_ns == 0 && self.backward_ns == 0
    }

    /// True when at most one channel is active
    pub fn is_exclusive(&self) -> bool {
        self.forward_ns == 0 || self.backward_ns == 0
    }
}

/// Motor driver for one wheel
pub struct MotorDriver<P: PwmChannel> {
    name: &'static str,
    forward: P,
    backward: P,
    calibration: DutyCalibration,
}

impl<P: PwmChannel> MotorDriver<P> {
    /// Create a driver from its two channels
    ///
    /// Both channels are set to the fixed PWM frequency and left at zero duty.
    pub fn new(
        name: &'static str,
        mut forward: P,
        mut backward: P,
        calibration: DutyCalibration,
    ) -> Result<Self> {
        forward.set_frequency(PWM_FREQ_HZ)?;
        backward.set_frequency(PWM_FREQ_HZ)?;
        info!(
            "Motor {} ready at {}Hz (forward={}ns, backward={}ns)",
            name, PWM_FREQ_HZ, calibration.forward_ns, calibration.backward_ns
        );

        let mut driver = Self {
            name,
            forward,
            backward,
            calibration,
        };
        driver.stop()?;
        Ok(driver)
    }

    /// Zero both channels
    pub fn stop(&mut self) -> Result<()> {
        let forward = self.forward.set_duty_ns(0);
        let backward = self.backward.set_duty_ns(0);
        forward.and(backward)
    }

    /// Spin the wheel at its calibrated duty
    pub fn drive(&mut self, polarity: Polarity) -> Result<()> {
        let command = self.command_for(polarity);
        self.apply(command)
    }

    /// Resolve a polarity to the calibrated command for this wheel
    pub fn command_for(&self, polarity: Polarity) -> MotorCommand {
        let duty_ns = match polarity {
            Polarity::Forward => self.calibration.forward_ns,
            Polarity::Backward => self.calibration.backward_ns,
        };
        MotorCommand::Drive { duty_ns, polarity }
    }

    /// Execute a motor command
    pub fn apply(&mut self, command: MotorCommand) -> Result<()> {
        // Always clear both channels first so they never overlap
        self.stop()?;

        match command {
            MotorCommand::Stop => Ok(()),
            MotorCommand::Drive { duty_ns, polarity } => {
                debug!("Motor {}: {:?} at {}ns", self.name, polarity, duty_ns);
                let channel = match polarity {
                    Polarity::Forward => &mut self.forward,
                    Polarity::Backward => &mut self.backward,
                };
                channel.set_duty_ns(duty_ns)
            }
        }
    }

    /// Duty currently output on both channels
    pub fn duties(&self) -> DutyPair {
        DutyPair {
            forward_ns: self.forward.duty_ns(),
            backward_ns: self.backward.duty_ns(),
        }
    }

    pub fn calibration(&self) -> DutyCalibration {
        self.calibration
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<P: PwmChannel> Drop for MotorDriver<P> {
    fn drop(&mut self) {
        // Try to stop the wheel when the driver is dropped
        if let Err(e) = self.stop() {
            warn!("Failed to stop motor {} on drop: {}", self.name, e);
        }
    }
}
